//! Signal correlation.
//!
//! Signals are grouped per service by single-linkage over their time ranges:
//! a signal joins the current group when it starts within the correlation
//! window of the latest end seen so far. Every pair inside a group is scored
//! on temporal proximity and shared attributes, with a boost when a
//! deployment precedes a non-deployment signal. The group takes its best
//! pair's score.

use chrono::{DateTime, Utc};
use sitrep_config::CorrelationConfig;
use sitrep_core::incident::{ConfidenceLevel, CorrelationResult};
use sitrep_core::signal::{MonitoringSignal, SignalKind};
use std::collections::{BTreeMap, BTreeSet};

/// Score for a single pair of signals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PairScore {
    pub temporal: f64,
    pub overlap: f64,
    pub confidence: f64,
    /// The deployment boost applied
    pub boosted: bool,
}

/// Result of one correlation pass.
#[derive(Debug, Clone, Default)]
pub struct CorrelationOutcome {
    /// Best first
    pub results: Vec<CorrelationResult>,
    /// Distinct services with error, anomaly or alert signals, sorted
    pub affected_services: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Correlator {
    config: CorrelationConfig,
}

impl Correlator {
    pub fn new(config: CorrelationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Score two signals of the same service.
    pub fn pair_score(&self, a: &MonitoringSignal, b: &MonitoringSignal) -> PairScore {
        let window = self.config.window();
        let gap = a.gap_to(b);
        let window_ms = window.num_milliseconds().max(1) as f64;
        let temporal = (1.0 - gap.num_milliseconds() as f64 / window_ms).max(0.0);

        let saturation = self.config.overlap_saturation.max(1);
        let shared = 1 + self
            .config
            .attribute_keys
            .iter()
            .filter(|key| match (a.metadata.get(*key), b.metadata.get(*key)) {
                (Some(x), Some(y)) => !x.is_null() && x == y,
                _ => false,
            })
            .count();
        let overlap = shared.min(saturation) as f64 / saturation as f64;

        let (wt, wo) = (self.config.temporal_weight, self.config.overlap_weight);
        let base = ((wt * temporal + wo * overlap) / (wt + wo)).clamp(0.0, 1.0);

        let boosted = gap <= window && deployment_precedes(a, b).is_some();
        let confidence = if boosted {
            base + self.config.deployment_boost * (1.0 - base)
        } else {
            base
        };

        PairScore {
            temporal,
            overlap,
            confidence: confidence.clamp(0.0, 1.0),
            boosted,
        }
    }

    /// Correlate a batch of signals from any number of sources.
    pub fn correlate(&self, signals: &[MonitoringSignal]) -> CorrelationOutcome {
        let mut by_service: BTreeMap<&str, Vec<&MonitoringSignal>> = BTreeMap::new();
        for signal in signals {
            by_service.entry(signal.service.as_str()).or_default().push(signal);
        }

        let mut results = Vec::new();
        for (service, mut members) in by_service {
            members.sort_by(|a, b| {
                a.timestamp
                    .cmp(&b.timestamp)
                    .then_with(|| a.source.cmp(&b.source))
                    .then_with(|| a.id.cmp(&b.id))
            });
            for group in self.link(&members) {
                if group.len() >= 2 {
                    results.push(self.score_group(service, &group));
                }
            }
        }

        results.sort_by(|a, b| {
            b.confidence
                .total_cmp(&a.confidence)
                .then_with(|| b.latest.cmp(&a.latest))
                .then_with(|| a.source.cmp(&b.source))
        });

        let affected_services = signals
            .iter()
            .filter(|s| {
                matches!(
                    s.kind,
                    SignalKind::Error | SignalKind::Anomaly | SignalKind::Alert
                )
            })
            .map(|s| s.service.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        CorrelationOutcome {
            results,
            affected_services,
        }
    }

    /// Single-linkage grouping over signals sorted by start time.
    fn link<'a>(&self, sorted: &[&'a MonitoringSignal]) -> Vec<Vec<&'a MonitoringSignal>> {
        let window = self.config.window();
        let mut groups: Vec<Vec<&MonitoringSignal>> = Vec::new();
        let mut reach: Option<DateTime<Utc>> = None;

        for &signal in sorted {
            match (groups.last_mut(), reach) {
                (Some(group), Some(end)) if signal.timestamp - end <= window => {
                    group.push(signal);
                    reach = Some(end.max(signal.end()));
                }
                _ => {
                    groups.push(vec![signal]);
                    reach = Some(signal.end());
                }
            }
        }
        groups
    }

    fn score_group(&self, service: &str, group: &[&MonitoringSignal]) -> CorrelationResult {
        let mut best: Option<(PairScore, usize, usize)> = None;
        let mut best_boosted: Option<(f64, usize, usize)> = None;

        for i in 0..group.len() {
            for j in (i + 1)..group.len() {
                let score = self.pair_score(group[i], group[j]);
                if best.is_none_or(|(b, _, _)| score.confidence > b.confidence) {
                    best = Some((score, i, j));
                }
                if score.boosted && best_boosted.is_none_or(|(c, _, _)| score.confidence > c) {
                    best_boosted = Some((score.confidence, i, j));
                }
            }
        }

        let (confidence, source) = match best {
            Some((score, i, j)) => (
                score.confidence,
                group[i].source.clone().min(group[j].source.clone()),
            ),
            None => (0.0, group[0].source.clone()),
        };

        let cause = best_boosted.and_then(|(_, i, j)| deployment_precedes(group[i], group[j]));
        let latest = group
            .iter()
            .map(|s| s.timestamp)
            .max()
            .unwrap_or(group[0].timestamp);

        CorrelationResult {
            signals: group.iter().map(|s| s.reference()).collect(),
            confidence,
            level: ConfidenceLevel::from_score(
                confidence,
                self.config.medium_threshold,
                self.config.high_threshold,
            ),
            service: service.to_string(),
            cause: cause.map(|d| d.reference()),
            latest,
            source,
            summary: summarize(group, cause),
        }
    }
}

/// The deployment of the pair, when the other signal is a non-deployment at
/// or after it.
fn deployment_precedes<'a>(
    a: &'a MonitoringSignal,
    b: &'a MonitoringSignal,
) -> Option<&'a MonitoringSignal> {
    match (a.kind, b.kind) {
        (SignalKind::Deployment, k) if k != SignalKind::Deployment && b.timestamp >= a.timestamp => {
            Some(a)
        }
        (k, SignalKind::Deployment) if k != SignalKind::Deployment && a.timestamp >= b.timestamp => {
            Some(b)
        }
        _ => None,
    }
}

fn deployment_label(deploy: &MonitoringSignal) -> String {
    match deploy.metadata.get("version").and_then(|v| v.as_str()) {
        Some(version) => version.to_string(),
        None if !deploy.summary.is_empty() => deploy.summary.clone(),
        None => "deployment".to_string(),
    }
}

fn summarize(group: &[&MonitoringSignal], cause: Option<&MonitoringSignal>) -> String {
    let kinds: BTreeSet<&str> = group
        .iter()
        .filter(|s| s.kind != SignalKind::Deployment)
        .map(|s| s.kind.as_str())
        .collect();
    let kinds = kinds.into_iter().collect::<Vec<_>>().join("/");

    if let Some(deploy) = cause {
        let first_after = group
            .iter()
            .filter(|s| s.kind != SignalKind::Deployment && s.timestamp >= deploy.timestamp)
            .map(|s| s.timestamp)
            .min();
        let minutes = first_after
            .map(|t| (t - deploy.timestamp).num_minutes())
            .unwrap_or(0);
        return format!(
            "{} deployed at {}, {} {}m later",
            deployment_label(deploy),
            deploy.timestamp.format("%H:%M"),
            kinds,
            minutes
        );
    }

    let first = group.iter().map(|s| s.timestamp).min();
    let last = group.iter().map(|s| s.timestamp).max();
    match (first, last) {
        (Some(first), Some(last)) => format!(
            "{} related signals ({}) between {} and {}",
            group.len(),
            if kinds.is_empty() { "deployment" } else { kinds.as_str() },
            first.format("%H:%M"),
            last.format("%H:%M")
        ),
        _ => String::new(),
    }
}
