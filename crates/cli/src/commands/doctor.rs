//! `sitrep doctor`: check configuration, connectors and providers.

use sitrep_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("sitrep doctor");
    println!("=============\n");

    let mut issues = 0;

    let config = match AppConfig::load() {
        Ok(config) => {
            println!("  ok    Config valid");
            config
        }
        Err(e) => {
            println!("  FAIL  Config invalid: {e}");
            return Ok(());
        }
    };

    let connectors = sitrep_connectors::build_from_config(&config);
    if connectors.len() < config.enabled_connectors().count() {
        println!("  warn  Some connectors could not be built (see log)");
        issues += 1;
    }
    if connectors.is_empty() {
        println!("  warn  No connectors configured; answers will have no data");
        issues += 1;
    }
    for entry in connectors.entries() {
        let name = entry.connector.name();
        if entry.connector.health_check().await {
            println!("  ok    Connector {name}");
        } else {
            println!("  FAIL  Connector {name} unreachable");
            issues += 1;
        }
    }

    let router = sitrep_providers::build_from_config(&config);
    if router.len() < config.providers.len() {
        println!("  warn  Some providers were skipped (missing credentials?)");
        issues += 1;
    }
    if router.is_empty() {
        println!("  warn  No providers; complex questions get the data summary");
    }
    for (name, healthy) in router.health().await {
        if healthy {
            println!("  ok    Provider {name}");
        } else {
            println!("  FAIL  Provider {name} unhealthy");
            issues += 1;
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed.");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }

    Ok(())
}
