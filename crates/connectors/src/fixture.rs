//! Fixture connector: replays signals from a JSON file.
//!
//! The file is an array of serialized `MonitoringSignal`s. Each fetch reads
//! the file, keeps the requested kind and drops anything outside the window.
//! Used for demos, offline triage of exported data, and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sitrep_core::connector::Connector;
use sitrep_core::error::ConnectorError;
use sitrep_core::signal::{MonitoringSignal, SignalKind, TimeWindow};
use std::path::PathBuf;
use tracing::debug;

pub struct FixtureConnector {
    name: String,
    path: PathBuf,
    kinds: Vec<SignalKind>,
}

impl FixtureConnector {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            kinds: SignalKind::ALL.to_vec(),
        }
    }

    pub fn with_kinds(mut self, kinds: Vec<SignalKind>) -> Self {
        if !kinds.is_empty() {
            self.kinds = kinds;
        }
        self
    }

    async fn load(&self) -> Result<Vec<MonitoringSignal>, ConnectorError> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ConnectorError::Request {
                source_name: self.name.clone(),
                reason: format!("{}: {e}", self.path.display()),
            })?;
        serde_json::from_str(&content).map_err(|e| ConnectorError::InvalidPayload {
            source_name: self.name.clone(),
            reason: e.to_string(),
        })
    }

    async fn replay(
        &self,
        kind: SignalKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
        if !self.kinds.contains(&kind) {
            return Ok(Vec::new());
        }
        let window = TimeWindow::new(start, end);
        let signals: Vec<MonitoringSignal> = self
            .load()
            .await?
            .into_iter()
            .filter(|s| s.kind == kind)
            .filter(|s| window.contains(s.timestamp) || window.contains(s.end()))
            .map(|mut s| {
                // Signals carry the connector's name, not whatever was exported.
                s.source = self.name.clone();
                s
            })
            .collect();
        debug!(source = %self.name, kind = %kind, count = signals.len(), "Replayed fixture signals");
        Ok(signals)
    }
}

#[async_trait]
impl Connector for FixtureConnector {
    fn name(&self) -> &str {
        &self.name
    }

    fn kinds(&self) -> Vec<SignalKind> {
        self.kinds.clone()
    }

    async fn fetch_deployments(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
        self.replay(SignalKind::Deployment, start, end).await
    }

    async fn fetch_alerts(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
        self.replay(SignalKind::Alert, start, end).await
    }

    async fn fetch_anomalies(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
        self.replay(SignalKind::Anomaly, start, end).await
    }

    async fn fetch_errors(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
        self.replay(SignalKind::Error, start, end).await
    }

    async fn health_check(&self) -> bool {
        self.load().await.is_ok()
    }
}
