//! `sitrep ask`: answer one question and exit.

use sitrep_core::SessionId;
use sitrep_engine::{IncidentPipeline, Request};
use tracing::warn;

use super::{format_response, load_config, parse_at};

pub async fn run(
    query: String,
    provider: Option<String>,
    at: Option<String>,
    json: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    let pipeline = IncidentPipeline::from_config(&config);

    let mut request = Request::new(query, SessionId::new());
    if let Some(at) = at {
        request = request.at(parse_at(&at)?);
    }
    if let Some(provider) = provider {
        request = request.with_provider(provider);
    }

    match pipeline.handle(request).await {
        Ok(response) if json => println!("{}", serde_json::to_string_pretty(&response)?),
        Ok(response) => println!("{}", format_response(&response)),
        Err(e) => {
            warn!(error = %e, "Request failed");
            eprintln!("{}", e.user_message());
            std::process::exit(1);
        }
    }

    Ok(())
}
