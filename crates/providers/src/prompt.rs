//! Prompt rendering from an incident context.

use sitrep_core::incident::IncidentContext;
use sitrep_core::provider::Prompt;

pub const SYSTEM_PROMPT: &str = "You are an expert incident response analyst with deep knowledge of \
system monitoring, troubleshooting, and root cause analysis. You help teams quickly identify and \
resolve production issues.

Your role:
- Analyze monitoring data and correlate events
- Identify patterns in errors and performance metrics
- Suggest investigation steps and remediation actions
- Prioritize incidents based on impact and urgency

Guidelines:
- Be concise but thorough
- Prefer actionable insights over general advice
- Include specific commands, queries, or steps when helpful
- Call out the strongest correlations first
- Suggest both immediate fixes and long-term improvements

You receive recent deployments, active alerts, metric anomalies, error spikes and an automated \
correlation analysis. Treat the correlation confidence as a heuristic, not proof.";

/// Instruction sent in place of the user's words when they ask for an
/// incident summary.
pub const INCIDENT_SUMMARY_REQUEST: &str = "Provide a concise executive summary of this incident \
including impact, root cause hypothesis, and recommended next steps.";

/// Render the prompt for `ctx`. History is passed through verbatim.
pub fn render(ctx: &IncidentContext) -> Prompt {
    let mut system = SYSTEM_PROMPT.to_string();
    system.push_str(&format!(
        "\n\nTime window: {} to {}",
        ctx.window.start.to_rfc3339(),
        ctx.window.end.to_rfc3339()
    ));
    if !ctx.degraded.is_empty() {
        let missing: Vec<String> = ctx
            .degraded
            .iter()
            .map(|d| format!("{} ({})", d.source, d.kind))
            .collect();
        system.push_str(&format!(
            "\nUnavailable sources, data may be incomplete: {}",
            missing.join(", ")
        ));
    }

    let mut correlation_lines = Vec::new();
    if ctx.affected_services.len() > 1 {
        correlation_lines.push(format!(
            "Multi-service impact: {} services affected: {}",
            ctx.affected_services.len(),
            ctx.affected_services.join(", ")
        ));
    }
    correlation_lines.extend(ctx.correlations.iter().map(|c| c.render_line()));

    Prompt {
        system,
        correlation_lines,
        signal_lines: ctx.signals.iter().map(|s| s.render_line()).collect(),
        history: ctx.history.clone(),
        query: ctx.query.clone(),
    }
}

/// Render an executive-summary prompt for `ctx`.
pub fn render_incident_summary(ctx: &IncidentContext) -> Prompt {
    Prompt {
        query: INCIDENT_SUMMARY_REQUEST.to_string(),
        ..render(ctx)
    }
}
