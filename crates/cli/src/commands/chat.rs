//! `sitrep chat`: interactive session over stdin.

use sitrep_core::SessionId;
use sitrep_engine::{IncidentPipeline, Request};
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use super::{format_response, load_config};

pub async fn run(provider: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let pipeline = IncidentPipeline::from_config(&config);
    let session = SessionId::new();

    println!();
    println!("  sitrep interactive session");
    println!("  Session:     {session}");
    println!("  Connectors:  {}", describe(&pipeline.connectors().list()));
    println!("  Providers:   {}", describe(&pipeline.router().list()));
    println!();
    println!("  Ask about deployments, alerts, anomalies or errors.");
    println!("  Type 'exit' or Ctrl+D to quit.");
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("  You > ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "exit" | "quit") {
            break;
        }

        let mut request = Request::new(line, session.clone());
        if let Some(p) = &provider {
            request = request.with_provider(p.clone());
        }

        match pipeline.handle(request).await {
            Ok(response) => {
                println!();
                for l in format_response(&response).lines() {
                    println!("  {l}");
                }
                println!();
            }
            Err(e) => {
                warn!(error = %e, "Request failed");
                eprintln!("  {}", e.user_message());
            }
        }
    }

    println!();
    Ok(())
}

fn describe(names: &[&str]) -> String {
    if names.is_empty() {
        "none configured".into()
    } else {
        names.join(", ")
    }
}
