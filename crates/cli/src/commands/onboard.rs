//! `sitrep onboard`: first-time setup.

use sitrep_config::AppConfig;

const EXAMPLE: &str = r#"
# ── Examples ────────────────────────────────────────────────────────────────
#
# [[providers]]
# name = "azure"
# kind = "azure_open_ai"
# priority = 1
# api_url = "https://my-resource.openai.azure.com"
# api_key_env = "AZURE_OPENAI_API_KEY"
# model = "gpt-4"
#
# [[providers]]
# name = "claude"
# kind = "anthropic"
# priority = 2
# api_key_env = "ANTHROPIC_API_KEY"
# model = "claude-sonnet-4-20250514"
#
# [[connectors]]
# name = "elasticsearch"
# kind = "elasticsearch"
# url = "http://localhost:9200"
# index = "logs-*"
# username = "elastic"
# password_env = "ELASTIC_PASSWORD"
#
# [[connectors]]
# name = "replay"
# kind = "fixture"
# path = "demos/incident.json"
#
# [dashboards]
# deployments = "https://grafana.example.com/d/deployments"
# performance = "https://grafana.example.com/d/performance"
# errors = "https://grafana.example.com/d/errors"
# system_health = "https://nagios.example.com/nagios/cgi-bin/status.cgi"
"#;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = AppConfig::config_path();

    println!("sitrep setup");
    println!("============\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("  Created {}", config_dir.display());
    }

    if config_path.exists() {
        println!("  Config already exists at: {}", config_path.display());
        println!("  Edit it manually or delete it and re-run onboard.\n");
        return Ok(());
    }

    let mut content = AppConfig::default_toml();
    content.push_str(EXAMPLE);
    std::fs::write(&config_path, content)?;
    println!("  Created {}", config_path.display());
    println!("\n  Next steps:");
    println!("    1. Add [[connectors]] for your monitoring backends");
    println!("    2. Add [[providers]] and export their API key variables");
    println!("    3. Run: sitrep doctor");
    println!("    4. Run: sitrep ask \"what changed in the last 2 hours\"\n");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_with_examples_still_parses() {
        let mut content = AppConfig::default_toml();
        content.push_str(EXAMPLE);
        let parsed: AppConfig = toml::from_str(&content).unwrap();
        assert!(parsed.validate().is_ok());
        assert!(parsed.providers.is_empty());
    }
}
