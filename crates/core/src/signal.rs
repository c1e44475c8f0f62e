//! Monitoring signals: the raw observations produced by connectors.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// What kind of observation a signal is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Deployment,
    Alert,
    Anomaly,
    Error,
}

impl SignalKind {
    /// All kinds, in fan-out order.
    pub const ALL: [SignalKind; 4] = [
        SignalKind::Deployment,
        SignalKind::Alert,
        SignalKind::Anomaly,
        SignalKind::Error,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deployment => "deployment",
            Self::Alert => "alert",
            Self::Anomaly => "anomaly",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Signal severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Lenient parse of backend severity labels ("CRITICAL", "warning", ...).
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "critical" | "crit" | "fatal" | "p1" => Self::Critical,
            "high" | "error" | "major" | "p2" => Self::High,
            "medium" | "warning" | "warn" | "p3" => Self::Medium,
            "low" | "minor" | "p4" => Self::Low,
            _ => Self::Info,
        }
    }
}

/// Identifies one signal across all sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignalRef {
    pub source: String,
    pub id: String,
}

impl std::fmt::Display for SignalRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.id)
    }
}

/// A single timestamped observation from a monitoring backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringSignal {
    /// Backend-local identifier
    pub id: String,

    /// Connector that produced this signal
    pub source: String,

    pub kind: SignalKind,

    /// When the signal started
    pub timestamp: DateTime<Utc>,

    /// When the signal ended, if it spans a range (e.g. an alert that fired for 6m)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub severity: Severity,

    /// Service or tag label the signal is attached to
    pub service: String,

    /// One-line human description ("v1.8.1 deployed", "DatabaseConnectionError x12")
    #[serde(default)]
    pub summary: String,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl MonitoringSignal {
    /// Create a signal with no end time, info severity and empty metadata.
    pub fn new(
        source: impl Into<String>,
        kind: SignalKind,
        service: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let source = source.into();
        let service = service.into();
        Self {
            id: format!("{}-{}-{}", kind, service, timestamp.timestamp_millis()),
            source,
            kind,
            timestamp,
            ended_at: None,
            severity: Severity::Info,
            service,
            summary: String::new(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    pub fn with_end(mut self, ended_at: DateTime<Utc>) -> Self {
        self.ended_at = Some(ended_at);
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn reference(&self) -> SignalRef {
        SignalRef {
            source: self.source.clone(),
            id: self.id.clone(),
        }
    }

    /// End of the signal's time range (its start for point signals).
    pub fn end(&self) -> DateTime<Utc> {
        self.ended_at.unwrap_or(self.timestamp).max(self.timestamp)
    }

    /// Distance between two signals' time ranges; zero when they overlap.
    pub fn gap_to(&self, other: &MonitoringSignal) -> Duration {
        if self.end() < other.timestamp {
            other.timestamp - self.end()
        } else if other.end() < self.timestamp {
            self.timestamp - other.end()
        } else {
            Duration::zero()
        }
    }

    /// Render as a single prompt/summary line.
    pub fn render_line(&self) -> String {
        let summary = if self.summary.is_empty() {
            String::new()
        } else {
            format!(" {}", self.summary)
        };
        format!(
            "[{}] {} {:?} at {}{}",
            self.kind,
            self.service,
            self.severity,
            self.timestamp.to_rfc3339(),
            summary
        )
    }
}

/// A closed time range `[start, end]` that fetches and correlation operate on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if start <= end {
            Self { start, end }
        } else {
            Self { start: end, end: start }
        }
    }

    /// The window of `lookback` ending at `end`.
    pub fn ending_at(end: DateTime<Utc>, lookback: Duration) -> Self {
        Self::new(end - lookback, end)
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at <= self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 8, 14, minute, 0).unwrap()
    }

    #[test]
    fn gap_is_zero_for_overlapping_ranges() {
        let alert = MonitoringSignal::new("nagios", SignalKind::Alert, "db", at(0)).with_end(at(10));
        let error = MonitoringSignal::new("es", SignalKind::Error, "db", at(5));
        assert_eq!(alert.gap_to(&error), Duration::zero());
        assert_eq!(error.gap_to(&alert), Duration::zero());
    }

    #[test]
    fn gap_between_point_signals() {
        let a = MonitoringSignal::new("es", SignalKind::Deployment, "api", at(0));
        let b = MonitoringSignal::new("es", SignalKind::Error, "api", at(12));
        assert_eq!(a.gap_to(&b), Duration::minutes(12));
        assert_eq!(b.gap_to(&a), Duration::minutes(12));
    }

    #[test]
    fn lenient_severity_parsing() {
        assert_eq!(Severity::parse_lenient("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::parse_lenient("warning"), Severity::Medium);
        assert_eq!(Severity::parse_lenient("whatever"), Severity::Info);
        assert!(Severity::Critical > Severity::Low);
    }

    #[test]
    fn window_normalizes_order() {
        let w = TimeWindow::new(at(30), at(0));
        assert_eq!(w.start, at(0));
        assert!(w.contains(at(15)));
        assert!(!w.contains(at(31)));
        assert_eq!(w.duration(), Duration::minutes(30));
    }

    #[test]
    fn signal_serialization_uses_snake_case_kinds() {
        let s = MonitoringSignal::new("es", SignalKind::Deployment, "user-service", at(0))
            .with_meta("version", "v1.8.1");
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"deployment\""));
        assert!(json.contains("v1.8.1"));
        let back: MonitoringSignal = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, SignalKind::Deployment);
    }
}
