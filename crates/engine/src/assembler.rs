//! Context assembly: fan-out to every connector, correlate, and budget the
//! result into an `IncidentContext`.
//!
//! Layers are filled in priority order against one token budget:
//!
//! 1. **Query**: always included, clipped to half the budget when oversized
//! 2. **Correlations**: best first, lowest confidence dropped
//! 3. **Signals**: newest kept, oldest dropped
//! 4. **History**: whatever remains, from `ConversationMemory::get_recent`
//!
//! Every drop is recorded in the context's token accounting.

use sitrep_config::AppConfig;
use sitrep_connectors::ConnectorRegistry;
use sitrep_core::conversation::SessionId;
use sitrep_core::error::ConnectorError;
use sitrep_core::event::{DomainEvent, EventBus};
use sitrep_core::incident::{
    CorrelationResult, DegradedSource, DropInfo, IncidentContext, LayerStats, TokenAccounting,
};
use sitrep_core::signal::{MonitoringSignal, SignalKind, TimeWindow};
use sitrep_core::token::TokenEstimator;
use sitrep_memory::ConversationMemory;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::correlator::Correlator;

/// Merged output of one fan-out.
#[derive(Debug, Clone, Default)]
pub struct FanOut {
    /// Connector order, then kind order
    pub signals: Vec<MonitoringSignal>,
    pub degraded: Vec<DegradedSource>,
}

type FetchResult = Result<Vec<MonitoringSignal>, String>;

pub struct ContextAssembler {
    connectors: ConnectorRegistry,
    correlator: Correlator,
    memory: Arc<ConversationMemory>,
    estimator: TokenEstimator,
    token_budget: usize,
    events: Option<Arc<EventBus>>,
}

impl ContextAssembler {
    pub fn new(
        connectors: ConnectorRegistry,
        correlator: Correlator,
        memory: Arc<ConversationMemory>,
        token_budget: usize,
    ) -> Self {
        let estimator = *memory.estimator();
        Self {
            connectors,
            correlator,
            memory,
            estimator,
            token_budget,
            events: None,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        connectors: ConnectorRegistry,
        memory: Arc<ConversationMemory>,
    ) -> Self {
        Self::new(
            connectors,
            Correlator::new(config.correlation.clone()),
            memory,
            config.context.token_budget,
        )
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.connectors
    }

    pub fn token_budget(&self) -> usize {
        self.token_budget
    }

    /// Fetch every (connector, kind) pair concurrently.
    ///
    /// Each fetch has its own timeout. A failed, timed-out or panicked fetch
    /// contributes nothing but a degraded marker. Dropping the returned
    /// future aborts whatever is still in flight.
    pub async fn fetch_all(&self, window: TimeWindow) -> FanOut {
        let mut slots: Vec<(String, SignalKind, Option<FetchResult>)> = Vec::new();
        let mut set = JoinSet::new();
        let mut task_slot = HashMap::new();

        for entry in self.connectors.entries() {
            for kind in entry.connector.kinds() {
                let connector = Arc::clone(&entry.connector);
                let timeout = entry.timeout;
                let slot = slots.len();
                slots.push((connector.name().to_string(), kind, None));

                let handle = set.spawn(async move {
                    match tokio::time::timeout(timeout, connector.fetch(kind, window)).await {
                        Ok(Ok(signals)) => Ok(signals),
                        Ok(Err(e)) => Err(e.to_string()),
                        Err(_) => Err(ConnectorError::Timeout {
                            source_name: connector.name().to_string(),
                            timeout_ms: timeout.as_millis() as u64,
                        }
                        .to_string()),
                    }
                });
                task_slot.insert(handle.id(), slot);
            }
        }

        while let Some(joined) = set.join_next_with_id().await {
            let (id, result) = match joined {
                Ok((id, result)) => (id, result),
                Err(e) => (e.id(), Err(format!("fetch task failed: {e}"))),
            };
            if let Some(&slot) = task_slot.get(&id) {
                slots[slot].2 = Some(result);
            }
        }

        let mut out = FanOut::default();
        for (source, kind, result) in slots {
            match result {
                Some(Ok(signals)) => {
                    debug!(source = %source, kind = %kind, count = signals.len(), "Fetched signals");
                    out.signals.extend(signals);
                }
                Some(Err(reason)) => self.degrade(&mut out, source, kind, reason),
                None => self.degrade(&mut out, source, kind, "fetch did not complete".into()),
            }
        }
        out
    }

    fn degrade(&self, out: &mut FanOut, source: String, kind: SignalKind, reason: String) {
        warn!(source = %source, kind = %kind, reason = %reason, "Source degraded");
        if let Some(events) = &self.events {
            events.publish(DomainEvent::ConnectorDegraded {
                source: source.clone(),
                kind: kind.to_string(),
                reason: reason.clone(),
                timestamp: chrono::Utc::now(),
            });
        }
        out.degraded.push(DegradedSource {
            source,
            kind,
            reason,
        });
    }

    /// Fan out, correlate and budget a full incident context.
    pub async fn build_context(
        &self,
        query: &str,
        window: TimeWindow,
        session: &SessionId,
    ) -> IncidentContext {
        let fan_out = self.fetch_all(window).await;
        self.assemble(query, window, fan_out, session).await
    }

    /// Budget already-fetched signals into a context.
    pub async fn assemble(
        &self,
        query: &str,
        window: TimeWindow,
        fan_out: FanOut,
        session: &SessionId,
    ) -> IncidentContext {
        let outcome = self.correlator.correlate(&fan_out.signals);
        let budget = self.token_budget;
        let est = &self.estimator;
        let mut stats = Vec::new();
        let mut drops = Vec::new();

        // ── Query ──────────────────────────────────────────────────────────
        let overhead = est.per_turn_overhead;
        let full_query_tokens = est.text(query) + overhead;
        let half = budget / 2;
        let query_text = if full_query_tokens > half {
            est.clip(query, half.saturating_sub(overhead))
        } else {
            query.to_string()
        };
        let query_tokens = est.text(&query_text) + overhead;
        if query_tokens < full_query_tokens {
            drops.push(DropInfo {
                layer: "query".into(),
                items_dropped: 0,
                tokens_dropped: full_query_tokens - query_tokens,
                reason: "Clipped to half the budget".into(),
            });
        }
        stats.push(LayerStats {
            name: "query".into(),
            tokens: query_tokens,
            items_included: 1,
            items_total: 1,
        });
        let mut remaining = budget.saturating_sub(query_tokens);

        let mut ctx = IncidentContext::new(query_text, window);
        ctx.degraded = fan_out.degraded;
        ctx.affected_services = outcome.affected_services;

        // ── Correlations ───────────────────────────────────────────────────
        let (correlations, layer, drop) =
            self.correlation_layer(outcome.results, &ctx.affected_services, remaining);
        remaining -= layer.tokens;
        ctx.correlations = correlations;
        stats.push(layer);
        drops.extend(drop);

        // ── Signals ────────────────────────────────────────────────────────
        let (signals, layer, drop) = self.signal_layer(fan_out.signals, remaining);
        remaining -= layer.tokens;
        ctx.signals = signals;
        stats.push(layer);
        drops.extend(drop);

        // ── History ────────────────────────────────────────────────────────
        let total_turns = self.memory.turn_count(session).await;
        let history = self.memory.get_recent(session, remaining).await;
        let kept = history.iter().filter(|t| !t.is_truncation_marker()).count();
        let history_tokens = est.turns(&history);
        stats.push(LayerStats {
            name: "history".into(),
            tokens: history_tokens,
            items_included: kept,
            items_total: total_turns,
        });
        drops.extend(Self::maybe_drop(
            "history",
            total_turns.saturating_sub(kept),
            0,
            "Oldest turns dropped",
        ));
        ctx.history = history;

        let total_tokens = stats.iter().map(|s| s.tokens).sum();
        debug!(
            context = %ctx.id,
            total_tokens,
            budget,
            signals = ctx.signals.len(),
            correlations = ctx.correlations.len(),
            history = ctx.history.len(),
            "Context assembled"
        );
        ctx.tokens = TokenAccounting {
            total_tokens,
            budget,
            per_layer: stats,
            drops,
        };
        ctx
    }

    fn correlation_layer(
        &self,
        results: Vec<CorrelationResult>,
        affected: &[String],
        budget: usize,
    ) -> (Vec<CorrelationResult>, LayerStats, Option<DropInfo>) {
        let layer = "correlations";
        let total = results.len();
        let mut used = 0;

        // The multi-service impact line leads the correlation section.
        if affected.len() > 1 {
            let line_tokens = self.estimator.text(&format!(
                "Multi-service impact: {} services affected: {}",
                affected.len(),
                affected.join(", ")
            ));
            if line_tokens <= budget {
                used += line_tokens;
            }
        }

        let mut kept = Vec::new();
        let mut dropped = 0;
        let mut dropped_tokens = 0;
        for result in results {
            let cost = self.estimator.text(&result.render_line());
            if dropped == 0 && used + cost <= budget {
                used += cost;
                kept.push(result);
            } else {
                dropped += 1;
                dropped_tokens += cost;
            }
        }

        (
            kept.clone(),
            LayerStats {
                name: layer.into(),
                tokens: used,
                items_included: kept.len(),
                items_total: total,
            },
            Self::maybe_drop(layer, dropped, dropped_tokens, "Lowest confidence dropped"),
        )
    }

    fn signal_layer(
        &self,
        mut signals: Vec<MonitoringSignal>,
        budget: usize,
    ) -> (Vec<MonitoringSignal>, LayerStats, Option<DropInfo>) {
        let layer = "signals";
        let total = signals.len();
        if signals.is_empty() {
            return (signals, Self::empty_stats(layer, 0), None);
        }

        signals.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.source.cmp(&b.source))
                .then_with(|| a.id.cmp(&b.id))
        });

        // Newest first until the budget runs out.
        let mut used = 0;
        let mut keep_from = signals.len();
        for (i, signal) in signals.iter().enumerate().rev() {
            let cost = self.estimator.text(&signal.render_line());
            if used + cost > budget {
                break;
            }
            used += cost;
            keep_from = i;
        }

        let dropped_tokens = signals[..keep_from]
            .iter()
            .map(|s| self.estimator.text(&s.render_line()))
            .sum();
        let kept = signals.split_off(keep_from);

        (
            kept.clone(),
            LayerStats {
                name: layer.into(),
                tokens: used,
                items_included: kept.len(),
                items_total: total,
            },
            Self::maybe_drop(layer, keep_from, dropped_tokens, "Oldest signals dropped"),
        )
    }

    fn empty_stats(name: &str, total: usize) -> LayerStats {
        LayerStats {
            name: name.into(),
            tokens: 0,
            items_included: 0,
            items_total: total,
        }
    }

    fn maybe_drop(layer: &str, dropped: usize, tokens: usize, reason: &str) -> Option<DropInfo> {
        if dropped > 0 {
            Some(DropInfo {
                layer: layer.into(),
                items_dropped: dropped,
                tokens_dropped: tokens,
                reason: reason.into(),
            })
        } else {
            None
        }
    }
}
