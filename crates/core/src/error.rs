//! Error types for the sitrep domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; callers recover each one
//! where it occurs.

use thiserror::Error;

/// Failure of a single monitoring fetch. Always recovered locally as an
/// empty result plus a degraded-source marker.
#[derive(Debug, Clone, Error)]
pub enum ConnectorError {
    #[error("Connector '{source_name}' timed out after {timeout_ms}ms")]
    Timeout { source_name: String, timeout_ms: u64 },

    #[error("Request to '{source_name}' failed: {reason}")]
    Request { source_name: String, reason: String },

    #[error("Invalid payload from '{source_name}': {reason}")]
    InvalidPayload { source_name: String, reason: String },

    #[error("Connector not configured: {0}")]
    NotConfigured(String),
}

/// Failure of a single provider attempt. Recovered by fail-over.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Short machine-readable label, used in failure records and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ApiError { .. } => "api_error",
            Self::RateLimited { .. } => "rate_limited",
            Self::AuthenticationFailed(_) => "auth",
            Self::MalformedResponse(_) => "malformed_response",
            Self::NotConfigured(_) => "not_configured",
            Self::Timeout(_) => "timeout",
            Self::Network(_) => "network",
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    /// The per-session writer lock could not be taken within the wait bound.
    #[error("Concurrent write conflict on session {session}")]
    WriteConflict { session: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = ProviderError::ApiError {
            status_code: 500,
            message: "Internal Server Error".into(),
        };
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("Internal Server Error"));
    }

    #[test]
    fn connector_error_names_source() {
        let err = ConnectorError::Timeout {
            source_name: "prometheus".into(),
            timeout_ms: 250,
        };
        assert!(err.to_string().contains("prometheus"));
        assert!(err.to_string().contains("250ms"));
    }

    #[test]
    fn provider_error_kinds() {
        assert_eq!(ProviderError::Timeout("x".into()).kind(), "timeout");
        assert_eq!(ProviderError::AuthenticationFailed("x".into()).kind(), "auth");
        assert_eq!(
            ProviderError::RateLimited { retry_after_secs: 1 }.kind(),
            "rate_limited"
        );
        assert_eq!(
            ProviderError::MalformedResponse("x".into()).kind(),
            "malformed_response"
        );
    }
}
