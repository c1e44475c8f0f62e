//! HTTP status and transport error mapping shared by the vendor clients.

use sitrep_core::error::ProviderError;
use tracing::warn;

/// Map a reqwest transport failure.
pub(crate) fn send_error(provider: &str, e: reqwest::Error) -> ProviderError {
    if e.is_timeout() {
        ProviderError::Timeout(format!("{provider}: {e}"))
    } else {
        ProviderError::Network(format!("{provider}: {e}"))
    }
}

/// Pass 2xx responses through; map everything else onto the error taxonomy.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    if response.status().is_success() {
        return Ok(response);
    }

    if status == 429 {
        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .unwrap_or(5);
        return Err(ProviderError::RateLimited { retry_after_secs });
    }

    if status == 401 || status == 403 {
        return Err(ProviderError::AuthenticationFailed(format!(
            "{provider}: invalid API key or insufficient permissions"
        )));
    }

    let body = response.text().await.unwrap_or_default();
    warn!(provider = %provider, status, body = %body, "Provider returned error");
    Err(ProviderError::ApiError {
        status_code: status,
        message: body,
    })
}

/// Non-empty generated text, or a malformed-response error.
pub(crate) fn require_text(provider: &str, text: Option<String>) -> Result<String, ProviderError> {
    match text {
        Some(t) if !t.trim().is_empty() => Ok(t),
        _ => Err(ProviderError::MalformedResponse(format!(
            "{provider}: response contained no text"
        ))),
    }
}
