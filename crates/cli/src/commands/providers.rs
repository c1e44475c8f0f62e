//! `sitrep providers`: supported provider kinds and the configured chain.

use super::load_config;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    println!("LLM providers");
    println!("=============");
    println!();
    println!("  Supported kinds:");
    println!("  ┌────────────────────┬──────────────────────────────────────────┬───────────────┐");
    println!("  │ kind               │ endpoint                                 │ auth          │");
    println!("  ├────────────────────┼──────────────────────────────────────────┼───────────────┤");
    println!("  │ open_ai_compatible │ {{api_url}}/chat/completions               │ Bearer        │");
    println!("  │ azure_open_ai      │ {{api_url}}/openai/deployments/{{model}}/… │ api-key       │");
    println!("  │ anthropic          │ {{api_url}}/v1/messages                    │ x-api-key     │");
    println!("  └────────────────────┴──────────────────────────────────────────┴───────────────┘");
    println!();

    let config = load_config()?;
    if config.providers.is_empty() {
        println!("  No providers configured. Add [[providers]] entries to the config.");
        return Ok(());
    }

    println!("  Fail-over chain:");
    for p in config.providers_by_priority() {
        let marker = if config.preferred_provider.as_deref() == Some(p.name.as_str()) {
            " (preferred)"
        } else {
            ""
        };
        println!(
            "    {}. {} [{}] model={} context={} output={}{marker}",
            p.priority, p.name, p.kind, p.model, p.max_context_tokens, p.max_output_tokens
        );
    }

    Ok(())
}
