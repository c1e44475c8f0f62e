pub mod ask;
pub mod chat;
pub mod doctor;
pub mod onboard;
pub mod providers;
pub mod status;

use chrono::{DateTime, Utc};
use sitrep_config::AppConfig;
use sitrep_engine::Response;

pub fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

pub fn parse_at(value: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("Invalid --at time '{value}': {e} (expected RFC 3339)"))
}

/// Human-readable rendering of a response.
pub fn format_response(response: &Response) -> String {
    let mut out = String::new();
    out.push_str(&response.narrative);
    out.push_str("\n\n");

    if !response.suggestions.is_empty() {
        out.push_str("Try next:\n");
        for s in &response.suggestions {
            out.push_str(&format!("  - {s}\n"));
        }
        out.push('\n');
    }

    if !response.data.dashboards.is_empty() {
        out.push_str("Dashboards:\n");
        for (name, url) in &response.data.dashboards {
            out.push_str(&format!("  - {name}: {url}\n"));
        }
        out.push('\n');
    }

    let via = match (&response.provider, &response.model) {
        (Some(p), Some(m)) => format!(" via {p} ({m})"),
        (Some(p), None) => format!(" via {p}"),
        _ => String::new(),
    };
    out.push_str(&format!(
        "[{}{} | {} signals, {} correlations | context {}]",
        response.analysis.as_str(),
        via,
        response.data.counts.total(),
        response.data.top_correlations.len(),
        response.context_id
    ));
    out
}
