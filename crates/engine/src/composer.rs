//! Response composition and turn persistence.
//!
//! The composer is the single exit of every request path. It turns an
//! outcome (generated text, the deterministic summary, or help) into a
//! `Response` and writes the user/assistant exchange to memory as one unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitrep_config::DashboardConfig;
use sitrep_core::conversation::{SessionId, Turn};
use sitrep_core::error::MemoryError;
use sitrep_core::event::{DomainEvent, EventBus};
use sitrep_core::incident::{CorrelationResult, DegradedSource, IncidentContext};
use sitrep_core::signal::{MonitoringSignal, SignalKind, TimeWindow};
use sitrep_memory::ConversationMemory;
use sitrep_providers::{Generation, ProviderFailure};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::classifier::Classification;

const MAX_TOP_CORRELATIONS: usize = 3;
const MAX_SUGGESTIONS: usize = 4;

/// What produced the narrative.
#[derive(Debug, Clone)]
pub enum Outcome {
    Generated(Generation),
    /// Deterministic summary; `failures` is non-empty when AI was attempted
    Summary { failures: Vec<ProviderFailure> },
    Help,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    AiPowered,
    Summary,
    Help,
}

impl AnalysisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AiPowered => "ai_powered",
            Self::Summary => "summary",
            Self::Help => "help",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignalCounts {
    pub deployments: usize,
    pub alerts: usize,
    pub anomalies: usize,
    pub errors: usize,
}

impl SignalCounts {
    pub fn of(ctx: &IncidentContext) -> Self {
        Self {
            deployments: ctx.count_of(SignalKind::Deployment),
            alerts: ctx.count_of(SignalKind::Alert),
            anomalies: ctx.count_of(SignalKind::Anomaly),
            errors: ctx.count_of(SignalKind::Error),
        }
    }

    pub fn total(&self) -> usize {
        self.deployments + self.alerts + self.anomalies + self.errors
    }
}

/// Structured data accompanying the narrative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataBlock {
    pub counts: SignalCounts,
    pub top_correlations: Vec<CorrelationResult>,
    pub affected_services: Vec<String>,
    pub window: TimeWindow,
    /// Deep links keyed by dashboard ("deployments", "performance", "errors", "system_health")
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dashboards: BTreeMap<String, String>,
}

/// The outbound response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub narrative: String,
    pub data: DataBlock,
    pub suggestions: Vec<String>,
    pub degraded: Vec<DegradedSource>,
    pub analysis: AnalysisKind,
    /// What the classifier decided, before any downgrade
    pub classification: Classification,
    pub context_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u32>,
}

/// One finished request, ready to compose.
pub struct Composition<'a> {
    pub session: &'a SessionId,
    pub query: &'a str,
    pub received_at: DateTime<Utc>,
    pub classification: Classification,
    pub context: &'a IncidentContext,
    pub outcome: Outcome,
}

pub struct ResponseComposer {
    memory: Arc<ConversationMemory>,
    write_retries: u32,
    ai_available: bool,
    dashboards: DashboardConfig,
    events: Option<Arc<EventBus>>,
}

impl ResponseComposer {
    pub fn new(memory: Arc<ConversationMemory>, write_retries: u32) -> Self {
        Self {
            memory,
            write_retries,
            ai_available: false,
            dashboards: DashboardConfig::default(),
            events: None,
        }
    }

    /// Whether the help text advertises AI analysis.
    pub fn with_ai_available(mut self, available: bool) -> Self {
        self.ai_available = available;
        self
    }

    pub fn with_dashboards(mut self, dashboards: DashboardConfig) -> Self {
        self.dashboards = dashboards;
        self
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Build the response without touching memory.
    pub fn render(&self, c: &Composition<'_>) -> Response {
        let ctx = c.context;
        let (narrative, analysis, provider, model, tokens_used) = match &c.outcome {
            Outcome::Generated(g) => (
                g.text.clone(),
                AnalysisKind::AiPowered,
                Some(g.provider.clone()),
                Some(g.model.clone()),
                g.tokens_used,
            ),
            Outcome::Summary { failures } => {
                let mut text = String::new();
                if !failures.is_empty() {
                    text.push_str(&format!(
                        "_AI analysis unavailable ({} provider(s) failed); showing the data summary._\n\n",
                        failures.len()
                    ));
                }
                text.push_str(&summary_narrative(c.query, ctx));
                (text, AnalysisKind::Summary, None, None, None)
            }
            Outcome::Help => (help_text(self.ai_available), AnalysisKind::Help, None, None, None),
        };

        let mut narrative = narrative;
        if analysis != AnalysisKind::Help && ctx.is_degraded() {
            narrative.push_str(&format!("\n\n{}", degraded_note(&ctx.degraded)));
        }

        Response {
            narrative,
            data: DataBlock {
                counts: SignalCounts::of(ctx),
                top_correlations: ctx
                    .correlations
                    .iter()
                    .take(MAX_TOP_CORRELATIONS)
                    .cloned()
                    .collect(),
                affected_services: ctx.affected_services.clone(),
                window: ctx.window,
                dashboards: if analysis == AnalysisKind::Help {
                    BTreeMap::new()
                } else {
                    self.dashboard_links(ctx)
                },
            },
            suggestions: suggestions(analysis, c.query, ctx),
            degraded: ctx.degraded.clone(),
            analysis,
            classification: c.classification,
            context_id: ctx.id.clone(),
            provider,
            model,
            tokens_used,
        }
    }

    /// Links to the configured dashboards relevant to `ctx`: deployments and
    /// performance only when such signals exist, system health only with
    /// active alerts, errors always (scoped to the top service when known).
    fn dashboard_links(&self, ctx: &IncidentContext) -> BTreeMap<String, String> {
        let mut links = BTreeMap::new();
        let range = [
            ("from", ctx.window.start.timestamp_millis().to_string()),
            ("to", ctx.window.end.timestamp_millis().to_string()),
        ];
        let d = &self.dashboards;

        if let Some(base) = d.deployments.as_deref().filter(|_| ctx.count_of(SignalKind::Deployment) > 0) {
            links.insert("deployments".into(), DashboardConfig::link(base, &range));
        }
        if let Some(base) = d.performance.as_deref().filter(|_| ctx.count_of(SignalKind::Anomaly) > 0) {
            links.insert("performance".into(), DashboardConfig::link(base, &range));
        }
        if let Some(base) = d.errors.as_deref() {
            let mut params = range.to_vec();
            if let Some(top) = ctx.top_correlation() {
                params.push(("var-service", top.service.clone()));
            }
            links.insert("errors".into(), DashboardConfig::link(base, &params));
        }
        if let Some(base) = d.system_health.as_deref().filter(|_| ctx.count_of(SignalKind::Alert) > 0) {
            links.insert("system_health".into(), DashboardConfig::link(base, &[]));
        }
        links
    }

    /// Build the response and persist the exchange.
    pub async fn compose(&self, c: Composition<'_>) -> Result<Response, MemoryError> {
        let response = self.render(&c);
        self.persist(c.session, c.query, c.received_at, &response).await?;
        Ok(response)
    }

    /// Write the user turn and the assistant turn as one unit, retrying
    /// write conflicts.
    async fn persist(
        &self,
        session: &SessionId,
        query: &str,
        received_at: DateTime<Utc>,
        response: &Response,
    ) -> Result<(), MemoryError> {
        let mut assistant = Turn::assistant(response.narrative.clone())
            .with_context(response.context_id.clone())
            .with_meta("analysis", response.analysis.as_str())
            .with_meta("classification", response.classification.as_str());
        if let Some(provider) = &response.provider {
            assistant = assistant.with_meta("provider", provider.as_str());
        }
        if let Some(tokens) = response.tokens_used {
            assistant = assistant.with_meta("tokens_used", tokens);
        }
        let turns = vec![Turn::user(query).at(received_at), assistant];

        let attempts = self.write_retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.memory.append_all(session, turns.clone()).await {
                Ok(()) => break,
                Err(MemoryError::WriteConflict { .. }) if attempt < attempts => {
                    debug!(session = %session, attempt, "Write conflict, retrying");
                    tokio::task::yield_now().await;
                }
                Err(e) => {
                    warn!(session = %session, attempts = attempt, error = %e, "Persisting turns failed");
                    return Err(e);
                }
            }
        }

        if let Some(events) = &self.events {
            events.publish(DomainEvent::TurnPersisted {
                session: session.to_string(),
                turns: turns.len(),
                timestamp: Utc::now(),
            });
        }
        Ok(())
    }
}

/// "Generate incident summary", "executive summary", "summarize the incident".
pub fn is_incident_summary_query(query: &str) -> bool {
    let q = query.to_lowercase();
    q.contains("summar") && (q.contains("incident") || q.contains("executive"))
}

fn is_error_detail_query(query: &str) -> bool {
    let q = query.to_lowercase();
    q.contains("error") && (q.contains("detail") || q.contains("pattern"))
}

fn window_hours(window: &TimeWindow) -> i64 {
    let minutes = window.duration().num_minutes();
    ((minutes + 59) / 60).max(1)
}

fn meta_str<'a>(signal: &'a MonitoringSignal, key: &str) -> Option<&'a str> {
    signal.metadata.get(key).and_then(|v| v.as_str())
}

fn summary_narrative(query: &str, ctx: &IncidentContext) -> String {
    if is_incident_summary_query(query) {
        return incident_summary(ctx);
    }
    if is_error_detail_query(query) {
        return error_analysis(ctx);
    }

    let mut out = format!("## Recent Changes (Last {} hours)\n\n", window_hours(&ctx.window));

    out.push_str("### Correlation Analysis\n");
    if ctx.correlations.is_empty() {
        out.push_str("No significant correlations detected.\n");
    } else {
        for c in ctx.correlations.iter().take(MAX_TOP_CORRELATIONS) {
            out.push_str(&format!("- {}\n", c.render_line()));
        }
    }
    if ctx.affected_services.len() > 1 {
        out.push_str(&format!(
            "\nMulti-service impact: {} services affected: {}\n",
            ctx.affected_services.len(),
            ctx.affected_services.join(", ")
        ));
    }
    out.push('\n');

    let sections = [
        (SignalKind::Deployment, "Deployments"),
        (SignalKind::Alert, "Active Alerts"),
        (SignalKind::Anomaly, "Metric Anomalies"),
        (SignalKind::Error, "Errors"),
    ];
    let mut any = false;
    for (kind, title) in sections {
        let signals: Vec<&MonitoringSignal> = ctx.signals_of(kind).collect();
        if signals.is_empty() {
            continue;
        }
        any = true;
        out.push_str(&format!("### {title}\n"));
        for s in signals {
            let detail = if s.summary.is_empty() { kind.as_str() } else { s.summary.as_str() };
            out.push_str(&format!(
                "- **{}**: {} at {}\n",
                s.service,
                detail,
                s.timestamp.format("%Y-%m-%d %H:%M UTC")
            ));
        }
        out.push('\n');
    }
    if !any {
        out.push_str("No deployments, alerts, anomalies or errors were reported in this window.\n");
    }

    out.trim_end().to_string()
}

fn error_analysis(ctx: &IncidentContext) -> String {
    let errors: Vec<&MonitoringSignal> = ctx.signals_of(SignalKind::Error).collect();
    if errors.is_empty() {
        return "No recent errors detected in the monitored services.".into();
    }

    let mut out = String::from("## Error Analysis\n\n");
    for e in errors {
        let error_type = meta_str(e, "error_type").unwrap_or(e.summary.as_str());
        out.push_str(&format!("### {} - {}\n", e.service, error_type));
        if let Some(count) = e.metadata.get("count") {
            out.push_str(&format!("**Count**: {count} occurrences\n"));
        }
        out.push_str(&format!("**First Seen**: {}\n", e.timestamp.to_rfc3339()));
        if let Some(sample) = meta_str(e, "sample_message") {
            out.push_str(&format!("**Sample**: `{sample}`\n"));
        }
        out.push('\n');
    }
    out.trim_end().to_string()
}

fn incident_summary(ctx: &IncidentContext) -> String {
    let counts = SignalCounts::of(ctx);
    let mut out = String::from("## Incident Summary\n\n");

    if ctx.affected_services.is_empty() {
        out.push_str("**Impact**: no service reports errors, alerts or anomalies.\n");
    } else {
        out.push_str(&format!(
            "**Impact**: {} service(s) affected: {}\n",
            ctx.affected_services.len(),
            ctx.affected_services.join(", ")
        ));
    }
    out.push_str(&format!(
        "**Signals** (last {} hours): {} deployments, {} alerts, {} anomalies, {} errors\n\n",
        window_hours(&ctx.window),
        counts.deployments,
        counts.alerts,
        counts.anomalies,
        counts.errors
    ));

    out.push_str("### Root Cause Hypothesis\n");
    let steps: Vec<String> = match ctx.top_correlation() {
        Some(top) if top.links_deployment() => {
            out.push_str(&format!("- {}\n", top.render_line()));
            vec![
                format!("Review the recent {} deployment and prepare a rollback", top.service),
                format!("Check {} error logs for the failing code path", top.service),
                "Confirm recovery on the dashboards after mitigation".into(),
            ]
        }
        Some(top) => {
            out.push_str(&format!("- {}\n", top.render_line()));
            out.push_str("- No deployment precedes these signals in the window.\n");
            vec![
                format!("Check {} dependencies and infrastructure", top.service),
                format!("Review active alerts for {}", top.service),
                "Look for configuration or traffic changes outside the deploy pipeline".into(),
            ]
        }
        None => {
            out.push_str("No correlated signals; review the incident data manually.\n");
            vec!["Keep monitoring; widen the time window if the issue persists".into()]
        }
    };

    out.push_str("\n### Recommended Next Steps\n");
    for (i, step) in steps.iter().enumerate() {
        out.push_str(&format!("{}. {step}\n", i + 1));
    }
    out.trim_end().to_string()
}

fn help_text(ai_available: bool) -> String {
    let status = if ai_available {
        "AI-Powered Analysis Available"
    } else {
        "Rule-Based Analysis"
    };
    format!(
        "## {status}

I can help you investigate incidents by analyzing your monitoring data:

**Smart Analysis:**
- **\"Analyze what changed in the last 2 hours\"**: correlation analysis
- **\"Why are we seeing these errors?\"**: root cause analysis
- **\"What should I investigate first?\"**: prioritized next steps
- **\"Explain this incident impact\"**: impact assessment

**Quick Data:**
- **\"Show me error details\"**: recent error patterns
- **\"Check active alerts\"**: current alerts
- **\"Recent deployments\"**: latest changes"
    )
}

fn degraded_note(degraded: &[DegradedSource]) -> String {
    let mut sources: Vec<String> = degraded
        .iter()
        .map(|d| format!("{} ({})", d.source, d.kind))
        .collect();
    sources.dedup();
    format!(
        "_Data may be incomplete. Unavailable sources: {}._",
        sources.join(", ")
    )
}

fn suggestions(analysis: AnalysisKind, query: &str, ctx: &IncidentContext) -> Vec<String> {
    let list: Vec<String> = match analysis {
        AnalysisKind::Help => vec![
            "Analyze what changed in the last 2 hours".into(),
            "What should I investigate first?".into(),
            "Show me current system health".into(),
            "Generate incident summary".into(),
        ],
        AnalysisKind::AiPowered => match ctx.top_correlation() {
            Some(top) => service_suggestions(top),
            None => vec![
                "Show me specific error details".into(),
                "What are the next steps to resolve this?".into(),
                "Check related service dependencies".into(),
                "Generate incident summary report".into(),
            ],
        },
        AnalysisKind::Summary => match ctx.top_correlation() {
            Some(top) => service_suggestions(top),
            None if ctx.signals.is_empty() => vec![
                "Analyze what changed in the last 2 hours".into(),
                "Check active alerts".into(),
                "Recent deployments".into(),
                "Show me current system health".into(),
            ],
            None if is_error_detail_query(query) => vec![
                "What's causing these errors?".into(),
                "How can I fix this issue?".into(),
                "Check service dependencies".into(),
                "Show related alerts".into(),
            ],
            None => vec![
                "Analyze the correlation between deployments and errors".into(),
                "What should I investigate first?".into(),
                "Generate incident summary".into(),
                "Show deployment rollback options".into(),
            ],
        },
    };
    list.into_iter().take(MAX_SUGGESTIONS).collect()
}

fn service_suggestions(top: &CorrelationResult) -> Vec<String> {
    let service = &top.service;
    if top.links_deployment() {
        vec![
            format!("Why are we seeing these errors in {service}?"),
            format!("Show deployment rollback options for {service}"),
            format!("Show me {service} error details"),
            "What should I investigate first?".into(),
        ]
    } else {
        vec![
            format!("Why is {service} degraded?"),
            format!("Show me {service} error details"),
            format!("Check {service} dependencies"),
            "Generate incident summary".into(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use sitrep_config::CorrelationConfig;

    use crate::correlator::Correlator;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 8, h, m, 0).unwrap()
    }

    fn incident() -> IncidentContext {
        let mut ctx = IncidentContext::new("what changed", TimeWindow::new(at(11, 0), at(15, 0)));
        ctx.signals = vec![
            MonitoringSignal::new("es", SignalKind::Deployment, "user-service", at(13, 45))
                .with_summary("user-service v1.8.1 deployed")
                .with_meta("version", "v1.8.1"),
            MonitoringSignal::new("es", SignalKind::Error, "user-service", at(13, 55))
                .with_summary("DatabaseConnectionError x12")
                .with_meta("error_type", "DatabaseConnectionError")
                .with_meta("count", 12)
                .with_meta("sample_message", "connection pool exhausted"),
        ];
        let outcome = Correlator::new(CorrelationConfig::default()).correlate(&ctx.signals);
        ctx.correlations = outcome.results;
        ctx.affected_services = outcome.affected_services;
        ctx
    }

    fn composer() -> (ResponseComposer, Arc<ConversationMemory>) {
        let memory = Arc::new(ConversationMemory::default());
        (ResponseComposer::new(Arc::clone(&memory), 3), memory)
    }

    fn composition<'a>(
        session: &'a SessionId,
        query: &'a str,
        ctx: &'a IncidentContext,
        outcome: Outcome,
    ) -> Composition<'a> {
        Composition {
            session,
            query,
            received_at: at(15, 0),
            classification: Classification::Simple,
            context: ctx,
            outcome,
        }
    }

    #[tokio::test]
    async fn summary_cites_the_deployment_link_and_persists_both_turns() {
        let (composer, memory) = composer();
        let ctx = incident();
        let session = SessionId::from("s1");

        let response = composer
            .compose(composition(&session, "what changed", &ctx, Outcome::Summary { failures: vec![] }))
            .await
            .unwrap();

        assert_eq!(response.analysis, AnalysisKind::Summary);
        assert!(response.narrative.starts_with("## Recent Changes (Last 4 hours)"));
        assert!(response.narrative.contains("v1.8.1 deployed at 13:45"));
        assert!(response.narrative.contains("### Deployments"));
        assert_eq!(response.data.counts.total(), 2);
        assert_eq!(response.data.top_correlations.len(), 1);
        assert!(response.suggestions.iter().any(|s| s.contains("user-service")));
        assert!(response.suggestions.len() <= 4);

        let stored = memory.session(&session).await.unwrap();
        assert_eq!(stored.turns.len(), 2);
        assert_eq!(stored.turns[0].content, "what changed");
        assert_eq!(stored.turns[1].context_id.as_deref(), Some(ctx.id.as_str()));
        assert_eq!(stored.turns[1].metadata["analysis"], "summary");
    }

    #[tokio::test]
    async fn error_detail_queries_get_error_analysis() {
        let (composer, _) = composer();
        let ctx = incident();
        let session = SessionId::from("s");
        let response = composer.render(&composition(
            &session,
            "show me error details",
            &ctx,
            Outcome::Summary { failures: vec![] },
        ));
        assert!(response.narrative.starts_with("## Error Analysis"));
        assert!(response.narrative.contains("user-service - DatabaseConnectionError"));
        assert!(response.narrative.contains("**Count**: 12 occurrences"));
        assert!(response.narrative.contains("connection pool exhausted"));
    }

    #[tokio::test]
    async fn generated_answers_carry_provider_metadata() {
        let (composer, memory) = composer();
        let ctx = incident();
        let session = SessionId::from("s");
        let generation = Generation {
            text: "The v1.8.1 deploy exhausted the DB pool.".into(),
            provider: "azure".into(),
            model: "gpt-4".into(),
            tokens_used: Some(420),
            elapsed_ms: 900,
            failures: vec![],
        };

        let response = composer
            .compose(composition(&session, "why", &ctx, Outcome::Generated(generation)))
            .await
            .unwrap();

        assert_eq!(response.analysis, AnalysisKind::AiPowered);
        assert_eq!(response.provider.as_deref(), Some("azure"));
        assert_eq!(response.suggestions[0], "Why are we seeing these errors in user-service?");
        assert!(response.suggestions.iter().any(|s| s == "Show me user-service error details"));
        let stored = memory.session(&session).await.unwrap();
        assert_eq!(stored.turns[1].metadata["provider"], "azure");
        assert_eq!(stored.turns[1].metadata["tokens_used"], 420);
    }

    #[tokio::test]
    async fn incident_summary_names_impact_cause_and_next_steps() {
        let (composer, _) = composer();
        let ctx = incident();
        let session = SessionId::from("s");
        let response = composer.render(&composition(
            &session,
            "Generate incident summary",
            &ctx,
            Outcome::Summary { failures: vec![] },
        ));
        assert!(response.narrative.starts_with("## Incident Summary"));
        assert!(response.narrative.contains("**Impact**: 1 service(s) affected: user-service"));
        assert!(response.narrative.contains("v1.8.1 deployed at 13:45"));
        assert!(response.narrative.contains("1. Review the recent user-service deployment"));
        assert!(is_incident_summary_query("give me an executive summary"));
        assert!(!is_incident_summary_query("summary of deployments"));
    }

    #[tokio::test]
    async fn dashboard_links_follow_the_signals() {
        let memory = Arc::new(ConversationMemory::default());
        let composer = ResponseComposer::new(memory, 3).with_dashboards(DashboardConfig {
            deployments: Some("http://grafana/d/deploys".into()),
            performance: Some("http://grafana/d/perf".into()),
            errors: Some("http://grafana/d/errors?orgId=1".into()),
            system_health: Some("http://nagios/tac.cgi".into()),
        });
        let ctx = incident();
        let session = SessionId::from("s");
        let response = composer.render(&composition(
            &session,
            "what changed",
            &ctx,
            Outcome::Summary { failures: vec![] },
        ));

        let links = &response.data.dashboards;
        let from = at(11, 0).timestamp_millis();
        let to = at(15, 0).timestamp_millis();
        assert_eq!(links["deployments"], format!("http://grafana/d/deploys?from={from}&to={to}"));
        assert_eq!(
            links["errors"],
            format!("http://grafana/d/errors?orgId=1&from={from}&to={to}&var-service=user-service")
        );
        // No anomalies or alerts in the window.
        assert!(!links.contains_key("performance"));
        assert!(!links.contains_key("system_health"));

        let help = composer.render(&composition(&session, "hi", &ctx, Outcome::Help));
        assert!(help.data.dashboards.is_empty());
    }

    #[tokio::test]
    async fn generated_answers_without_correlations_get_follow_ups() {
        let (composer, _) = composer();
        let ctx = IncidentContext::new("why", TimeWindow::ending_at(at(15, 0), Duration::hours(2)));
        let session = SessionId::from("s");
        let generation = Generation {
            text: "Nothing stands out.".into(),
            provider: "azure".into(),
            model: "gpt-4".into(),
            tokens_used: None,
            elapsed_ms: 10,
            failures: vec![],
        };

        let response = composer.render(&composition(&session, "why", &ctx, Outcome::Generated(generation)));
        assert_eq!(response.suggestions[0], "Show me specific error details");
    }

    #[tokio::test]
    async fn provider_failures_and_degraded_sources_are_noted() {
        let (composer, _) = composer();
        let mut ctx = incident();
        ctx.degraded.push(DegradedSource {
            source: "nagios".into(),
            kind: SignalKind::Alert,
            reason: "timed out".into(),
        });
        let session = SessionId::from("s");
        let failure = ProviderFailure {
            provider: "openai".into(),
            kind: "timeout".into(),
            reason: "timed out".into(),
        };

        let response = composer.render(&composition(
            &session,
            "what changed",
            &ctx,
            Outcome::Summary { failures: vec![failure] },
        ));
        assert!(response.narrative.starts_with("_AI analysis unavailable (1 provider(s) failed)"));
        assert!(response.narrative.ends_with("Unavailable sources: nagios (alert)._"));
        assert_eq!(response.degraded.len(), 1);
    }

    #[tokio::test]
    async fn empty_window_gets_default_suggestions() {
        let (composer, _) = composer();
        let ctx = IncidentContext::new("what changed", TimeWindow::ending_at(at(15, 0), Duration::hours(2)));
        let session = SessionId::from("s");
        let response = composer.render(&composition(
            &session,
            "what changed",
            &ctx,
            Outcome::Summary { failures: vec![] },
        ));
        assert!(response.narrative.contains("No significant correlations detected."));
        assert!(response.narrative.contains("No deployments, alerts, anomalies or errors"));
        assert_eq!(response.suggestions[0], "Analyze what changed in the last 2 hours");
    }

    #[tokio::test]
    async fn help_reflects_ai_availability() {
        let memory = Arc::new(ConversationMemory::default());
        let composer = ResponseComposer::new(memory, 3).with_ai_available(true);
        let ctx = IncidentContext::new("hi", TimeWindow::ending_at(at(15, 0), Duration::hours(4)));
        let session = SessionId::from("s");
        let response = composer.render(&composition(&session, "hi", &ctx, Outcome::Help));
        assert_eq!(response.analysis, AnalysisKind::Help);
        assert!(response.narrative.starts_with("## AI-Powered Analysis Available"));
    }
}
