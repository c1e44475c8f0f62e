//! `sitrep status`: show the effective configuration.

use sitrep_config::AppConfig;

use super::load_config;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;

    println!("sitrep status");
    println!("=============");
    println!("  Config:       {}", AppConfig::config_path().display());
    println!(
        "  Preferred:    {}",
        config.preferred_provider.as_deref().unwrap_or("(priority order)")
    );
    println!(
        "  Correlation:  {}m window, {}m lookback",
        config.correlation.window_minutes, config.correlation.lookback_minutes
    );
    println!("  Token budget: {}", config.context.token_budget);
    println!(
        "  Timeouts:     {}ms per connector, {}s per provider, {}s per request",
        config.timeouts.per_connector_ms, config.timeouts.per_provider_secs, config.timeouts.request_secs
    );

    println!("\n  Providers ({}):", config.providers.len());
    for p in config.providers_by_priority() {
        let key = match (&p.api_key_env, p.resolve_api_key()) {
            (Some(var), Some(_)) => format!("{var} set"),
            (Some(var), None) => format!("{var} missing"),
            (None, _) => "no key".into(),
        };
        println!("    {}. {} [{}] {} ({key})", p.priority, p.name, p.kind, p.model);
    }

    let enabled = config.enabled_connectors().count();
    println!("\n  Connectors ({enabled} enabled):");
    for c in &config.connectors {
        let target = c
            .url
            .clone()
            .or_else(|| c.path.as_ref().map(|p| p.display().to_string()))
            .unwrap_or_else(|| "-".into());
        let state = if c.enabled { "" } else { " (disabled)" };
        println!("    {} [{:?}] {target}{state}", c.name, c.kind);
    }

    if !AppConfig::config_path().exists() {
        println!("\n  No config file, using defaults. Run `sitrep onboard` to create one.");
    }

    Ok(())
}
