//! Monitoring connectors for sitrep.
//!
//! All connectors implement `sitrep_core::Connector`. The registry builds
//! the enabled set from configuration, in configuration order.

pub mod elasticsearch;
pub mod fixture;

pub use elasticsearch::ElasticsearchConnector;
pub use fixture::FixtureConnector;

use sitrep_config::{AppConfig, ConnectorConfig, ConnectorKind};
use sitrep_core::connector::Connector;
use sitrep_core::error::ConnectorError;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// A connector plus its fetch timeout.
#[derive(Clone)]
pub struct RegisteredConnector {
    pub connector: Arc<dyn Connector>,
    pub timeout: Duration,
}

/// The ordered set of enabled connectors.
#[derive(Clone, Default)]
pub struct ConnectorRegistry {
    entries: Vec<RegisteredConnector>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connector. Order of registration is fan-out merge order.
    pub fn register(&mut self, connector: Arc<dyn Connector>, timeout: Duration) {
        self.entries.push(RegisteredConnector { connector, timeout });
    }

    pub fn entries(&self) -> &[RegisteredConnector] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Connector>> {
        self.entries
            .iter()
            .find(|e| e.connector.name() == name)
            .map(|e| Arc::clone(&e.connector))
    }

    pub fn list(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.connector.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Build one connector from its configuration.
pub fn build_connector(config: &ConnectorConfig) -> Result<Arc<dyn Connector>, ConnectorError> {
    match config.kind {
        ConnectorKind::Elasticsearch => {
            let url = config.url.as_deref().ok_or_else(|| {
                ConnectorError::NotConfigured(format!("connector '{}' has no url", config.name))
            })?;
            let mut c = ElasticsearchConnector::new(&config.name, url).with_kinds(config.kinds.clone());
            if let Some(index) = &config.index {
                c = c.with_index(index);
            }
            if let Some(user) = &config.username {
                c = c.with_basic_auth(user, config.resolve_password());
            }
            Ok(Arc::new(c))
        }
        ConnectorKind::Fixture => {
            let path = config.path.as_ref().ok_or_else(|| {
                ConnectorError::NotConfigured(format!("connector '{}' has no path", config.name))
            })?;
            Ok(Arc::new(
                FixtureConnector::new(&config.name, path).with_kinds(config.kinds.clone()),
            ))
        }
    }
}

/// Build the registry from configuration. Misconfigured connectors are
/// skipped with a warning rather than failing startup.
pub fn build_from_config(config: &AppConfig) -> ConnectorRegistry {
    let mut registry = ConnectorRegistry::new();
    let fallback = config.timeouts.per_connector();

    for c in config.enabled_connectors() {
        match build_connector(c) {
            Ok(connector) => {
                info!(source = %c.name, kind = ?c.kind, "Connector registered");
                registry.register(connector, c.timeout(fallback));
            }
            Err(e) => warn!(source = %c.name, error = %e, "Skipping connector"),
        }
    }

    registry
}
