//! Incident context: the per-request snapshot of signals, correlations and
//! history that a response is produced from.
//!
//! Built fresh for each request and discarded after the response; only its
//! id survives, as a reference on the persisted assistant turn.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conversation::Turn;
use crate::signal::{MonitoringSignal, SignalKind, SignalRef, TimeWindow};

/// Coarse label for a correlation's confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn from_score(confidence: f64, medium_threshold: f64, high_threshold: f64) -> Self {
        if confidence >= high_threshold {
            Self::High
        } else if confidence >= medium_threshold {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A group of related signals with a confidence score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// Member signals, in timestamp order
    pub signals: Vec<SignalRef>,

    /// In [0, 1]
    pub confidence: f64,

    pub level: ConfidenceLevel,

    /// Dominant service label of the group
    pub service: String,

    /// The deployment considered the likely cause, if the group has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<SignalRef>,

    /// Latest timestamp of any member
    pub latest: DateTime<Utc>,

    /// Source of the best-scoring member, used as the last sort key
    pub source: String,

    /// Human-readable one-liner ("v1.8.1 deployed at 13:45, errors 10m later")
    #[serde(default)]
    pub summary: String,
}

impl CorrelationResult {
    pub fn links_deployment(&self) -> bool {
        self.cause.is_some()
    }

    pub fn render_line(&self) -> String {
        format!(
            "{} ({} confidence {:.2}, {} signals): {}",
            self.service,
            self.level,
            self.confidence,
            self.signals.len(),
            self.summary
        )
    }
}

/// Marker for a monitoring fetch that failed or timed out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DegradedSource {
    pub source: String,
    pub kind: SignalKind,
    pub reason: String,
}

/// Statistics for a single context layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerStats {
    /// Layer name.
    pub name: String,
    /// Tokens consumed by this layer.
    pub tokens: usize,
    /// Items included after budget trimming.
    pub items_included: usize,
    /// Total items available before trimming.
    pub items_total: usize,
}

/// Items dropped from a layer during budget enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropInfo {
    pub layer: String,
    pub items_dropped: usize,
    pub tokens_dropped: usize,
    pub reason: String,
}

/// Token accounting for one assembled context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenAccounting {
    pub total_tokens: usize,
    pub budget: usize,
    pub per_layer: Vec<LayerStats>,
    pub drops: Vec<DropInfo>,
}

impl TokenAccounting {
    pub fn items_dropped(&self) -> usize {
        self.drops.iter().map(|d| d.items_dropped).sum()
    }
}

/// Everything gathered for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentContext {
    pub id: String,

    /// The query as included (possibly clipped)
    pub query: String,

    pub window: TimeWindow,

    /// Signals kept after budgeting, in timestamp order
    pub signals: Vec<MonitoringSignal>,

    /// Correlations kept after budgeting, best first
    pub correlations: Vec<CorrelationResult>,

    /// Services with error, anomaly or alert signals
    pub affected_services: Vec<String>,

    pub degraded: Vec<DegradedSource>,

    /// History excerpt, oldest first, possibly led by a truncation marker
    pub history: Vec<Turn>,

    pub tokens: TokenAccounting,
}

impl IncidentContext {
    pub fn new(query: impl Into<String>, window: TimeWindow) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            query: query.into(),
            window,
            signals: Vec::new(),
            correlations: Vec::new(),
            affected_services: Vec::new(),
            degraded: Vec::new(),
            history: Vec::new(),
            tokens: TokenAccounting::default(),
        }
    }

    pub fn signals_of(&self, kind: SignalKind) -> impl Iterator<Item = &MonitoringSignal> {
        self.signals.iter().filter(move |s| s.kind == kind)
    }

    pub fn count_of(&self, kind: SignalKind) -> usize {
        self.signals_of(kind).count()
    }

    pub fn top_correlation(&self) -> Option<&CorrelationResult> {
        self.correlations.first()
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }
}
