//! Connector trait: the abstraction over monitoring backends.
//!
//! A Connector knows how to pull deployments, alerts, metric anomalies and
//! error spikes for a time range out of one backend (Elasticsearch,
//! Prometheus, Nagios, a replay file, ...). Each fetch is independently
//! fallible; the engine treats a failed fetch as a degraded source rather
//! than a failed request.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ConnectorError;
use crate::signal::{MonitoringSignal, SignalKind, TimeWindow};

/// The core Connector trait.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Source identifier, stamped on every signal this connector produces.
    fn name(&self) -> &str;

    /// Which signal kinds this backend can serve. Defaults to all four.
    fn kinds(&self) -> Vec<SignalKind> {
        SignalKind::ALL.to_vec()
    }

    async fn fetch_deployments(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError>;

    async fn fetch_alerts(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError>;

    async fn fetch_anomalies(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError>;

    async fn fetch_errors(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError>;

    /// Dispatch to the fetch method for `kind`.
    async fn fetch(
        &self,
        kind: SignalKind,
        window: TimeWindow,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
        match kind {
            SignalKind::Deployment => self.fetch_deployments(window.start, window.end).await,
            SignalKind::Alert => self.fetch_alerts(window.start, window.end).await,
            SignalKind::Anomaly => self.fetch_anomalies(window.start, window.end).await,
            SignalKind::Error => self.fetch_errors(window.start, window.end).await,
        }
    }

    /// Health check: can we reach the backend?
    async fn health_check(&self) -> bool {
        true
    }
}
