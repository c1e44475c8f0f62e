//! sitrep CLI: the main entry point.
//!
//! Commands:
//! - `ask`        Answer a single question (one-shot; use `chat` for follow-ups)
//! - `chat`       Interactive session
//! - `status`     Show configuration summary
//! - `doctor`     Check connectors and providers
//! - `providers`  List provider kinds and the configured chain
//! - `onboard`    Write a starter config

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "sitrep",
    about = "sitrep: ask your monitoring stack what changed",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a single question. Conversation memory lives only for the
    /// process, so follow-up questions belong in `chat`.
    Ask {
        /// The question, e.g. "what changed in the last 2 hours"
        query: String,

        /// Try this provider first
        #[arg(short, long, env = "SITREP_PROVIDER")]
        provider: Option<String>,

        /// Analyze as of this RFC 3339 time instead of now
        #[arg(long)]
        at: Option<String>,

        /// Print the full response as JSON
        #[arg(long)]
        json: bool,
    },

    /// Interactive session
    Chat {
        /// Try this provider first
        #[arg(short, long, env = "SITREP_PROVIDER")]
        provider: Option<String>,
    },

    /// Show configuration summary
    Status,

    /// Check connector and provider health
    Doctor,

    /// List provider kinds and the configured fail-over chain
    Providers,

    /// Write a starter config to ~/.sitrep/config.toml
    Onboard,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Ask {
            query,
            provider,
            at,
            json,
        } => commands::ask::run(query, provider, at, json).await?,
        Commands::Chat { provider } => commands::chat::run(provider).await?,
        Commands::Status => commands::status::run().await?,
        Commands::Doctor => commands::doctor::run().await?,
        Commands::Providers => commands::providers::run().await?,
        Commands::Onboard => commands::onboard::run().await?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ask_is_one_shot() {
        let cli = Cli::try_parse_from(["sitrep", "ask", "what changed", "--json"]).unwrap();
        assert!(matches!(cli.command, Commands::Ask { json: true, .. }));
        assert!(Cli::try_parse_from(["sitrep", "ask", "what changed", "--session", "abc"]).is_err());
    }
}
