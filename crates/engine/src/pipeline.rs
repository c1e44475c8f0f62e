//! The request pipeline: classify, gather, generate or summarize, compose.
//!
//! ```text
//! Received → Classified → ContextBuilding → ProviderSelection → Generating ─┐
//!                                        └→ Summarizing ────────────────────┤
//!                                                        Composed → Persisted → Returned
//! ```
//!
//! Every path ends in a composed, persisted response. `Failed` is reached
//! only when persistence is exhausted. The whole run is bounded by the
//! request timeout; a cancelled run persists nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sitrep_config::AppConfig;
use sitrep_connectors::ConnectorRegistry;
use sitrep_core::conversation::SessionId;
use sitrep_core::error::MemoryError;
use sitrep_core::event::{DomainEvent, EventBus};
use sitrep_core::signal::TimeWindow;
use sitrep_memory::{ConversationMemory, MemoryLimits};
use sitrep_providers::ProviderRouter;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::assembler::{ContextAssembler, FanOut};
use crate::classifier::{Classification, QueryClassifier};
use crate::composer::{Composition, Outcome, Response, ResponseComposer, is_incident_summary_query};

/// Text shown to the user for any unrecoverable failure.
pub const GENERIC_FAILURE: &str =
    "Sorry, I could not complete the analysis right now. Please try again in a moment.";

/// An inbound query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub query: String,
    pub session: SessionId,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,
}

impl Request {
    pub fn new(query: impl Into<String>, session: SessionId) -> Self {
        Self {
            query: query.into(),
            session,
            timestamp: Utc::now(),
            preferred_provider: None,
        }
    }

    /// Analyze as of `timestamp` instead of now.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.preferred_provider = Some(provider.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    Received,
    Classified,
    ContextBuilding,
    ProviderSelection,
    Generating,
    Summarizing,
    Composed,
    Persisted,
    Returned,
    Failed,
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("Could not persist the conversation: {0}")]
    Persistence(#[from] MemoryError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    /// The only text a user ever sees for a pipeline failure.
    pub fn user_message(&self) -> &'static str {
        GENERIC_FAILURE
    }
}

/// Tracks one request's progress through the state machine.
struct Progress<'a> {
    session: &'a SessionId,
    state: RequestState,
}

impl<'a> Progress<'a> {
    fn new(session: &'a SessionId) -> Self {
        debug!(session = %session, state = ?RequestState::Received, "Request state");
        Self {
            session,
            state: RequestState::Received,
        }
    }

    fn advance(&mut self, next: RequestState) {
        debug!(session = %self.session, from = ?self.state, to = ?next, "Request state");
        self.state = next;
    }
}

pub struct IncidentPipeline {
    classifier: QueryClassifier,
    assembler: ContextAssembler,
    router: ProviderRouter,
    composer: ResponseComposer,
    memory: Arc<ConversationMemory>,
    events: Arc<EventBus>,
    lookback: chrono::Duration,
    request_timeout: Duration,
    preferred_provider: Option<String>,
}

impl IncidentPipeline {
    /// Wire a pipeline from already-built parts.
    pub fn new(
        config: &AppConfig,
        connectors: ConnectorRegistry,
        router: ProviderRouter,
        memory: Arc<ConversationMemory>,
        events: Arc<EventBus>,
    ) -> Self {
        let assembler = ContextAssembler::from_config(config, connectors, Arc::clone(&memory))
            .with_events(Arc::clone(&events));
        let composer = ResponseComposer::new(Arc::clone(&memory), config.memory.write_retries)
            .with_ai_available(!router.is_empty())
            .with_dashboards(config.dashboards.clone())
            .with_events(Arc::clone(&events));

        Self {
            classifier: QueryClassifier::from_config(&config.classifier),
            assembler,
            router: router.with_events(Arc::clone(&events)),
            composer,
            memory,
            events,
            lookback: config.correlation.lookback(),
            request_timeout: config.timeouts.request(),
            preferred_provider: config.preferred_provider.clone(),
        }
    }

    /// Build everything from configuration.
    pub fn from_config(config: &AppConfig) -> Self {
        let memory = Arc::new(ConversationMemory::new(
            config.context.estimator(),
            MemoryLimits {
                max_turns_per_session: config.memory.max_turns_per_session,
                lock_wait: config.memory.lock_wait(),
            },
        ));
        Self::new(
            config,
            sitrep_connectors::build_from_config(config),
            sitrep_providers::build_from_config(config),
            memory,
            Arc::new(EventBus::default()),
        )
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn memory(&self) -> &Arc<ConversationMemory> {
        &self.memory
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub fn connectors(&self) -> &ConnectorRegistry {
        self.assembler.connectors()
    }

    pub fn classifier(&self) -> &QueryClassifier {
        &self.classifier
    }

    /// Handle one request within the request timeout.
    pub async fn handle(&self, request: Request) -> Result<Response, PipelineError> {
        match tokio::time::timeout(self.request_timeout, self.run(&request)).await {
            Ok(result) => result,
            Err(_) => {
                let timeout_ms = self.request_timeout.as_millis() as u64;
                warn!(session = %request.session, timeout_ms, "Request timed out");
                Err(PipelineError::Timeout { timeout_ms })
            }
        }
    }

    async fn run(&self, request: &Request) -> Result<Response, PipelineError> {
        let session = &request.session;
        let query = request.query.trim();
        let mut progress = Progress::new(session);

        let turn_count = self.memory.turn_count(session).await;
        let classification = self.classifier.classify(query, turn_count);
        progress.advance(RequestState::Classified);
        info!(session = %session, classification = %classification, "Query classified");
        self.events.publish(DomainEvent::QueryClassified {
            session: session.to_string(),
            classification: classification.to_string(),
            timestamp: Utc::now(),
        });

        let route = if classification == Classification::Complex && self.router.is_empty() {
            debug!(session = %session, "No providers configured, summarizing instead");
            Classification::Simple
        } else {
            classification
        };

        let window = TimeWindow::ending_at(
            request.timestamp,
            requested_lookback(query).unwrap_or(self.lookback),
        );

        progress.advance(RequestState::ContextBuilding);
        let (context, outcome) = match route {
            Classification::Help => {
                let ctx = self
                    .assembler
                    .assemble(query, window, FanOut::default(), session)
                    .await;
                progress.advance(RequestState::Summarizing);
                (ctx, Outcome::Help)
            }
            Classification::Simple => {
                let ctx = self.assembler.build_context(query, window, session).await;
                progress.advance(RequestState::Summarizing);
                (ctx, Outcome::Summary { failures: vec![] })
            }
            Classification::Complex => {
                let ctx = self.assembler.build_context(query, window, session).await;
                progress.advance(RequestState::ProviderSelection);
                let preferred = request
                    .preferred_provider
                    .as_deref()
                    .or(self.preferred_provider.as_deref());
                progress.advance(RequestState::Generating);
                let generated = if is_incident_summary_query(query) {
                    let prompt = sitrep_providers::prompt::render_incident_summary(&ctx);
                    self.router.generate_prompt(&prompt, preferred).await
                } else {
                    self.router.generate(&ctx, preferred).await
                };
                match generated {
                    Ok(generation) => (ctx, Outcome::Generated(generation)),
                    Err(unavailable) => {
                        info!(
                            session = %session,
                            attempts = unavailable.failures.len(),
                            "Falling back to summary"
                        );
                        progress.advance(RequestState::Summarizing);
                        (
                            ctx,
                            Outcome::Summary {
                                failures: unavailable.failures,
                            },
                        )
                    }
                }
            }
        };

        let composition = Composition {
            session,
            query,
            received_at: request.timestamp,
            classification,
            context: &context,
            outcome,
        };
        let response = match self.composer.compose(composition).await {
            Ok(response) => response,
            Err(e) => {
                progress.advance(RequestState::Failed);
                return Err(e.into());
            }
        };
        progress.advance(RequestState::Composed);
        progress.advance(RequestState::Persisted);

        info!(
            session = %session,
            analysis = response.analysis.as_str(),
            provider = response.provider.as_deref().unwrap_or("-"),
            degraded = response.degraded.len(),
            "Response ready"
        );
        progress.advance(RequestState::Returned);
        Ok(response)
    }
}

/// Longest lookback a query may ask for (7 days).
const MAX_REQUESTED_LOOKBACK_MINUTES: u64 = 7 * 24 * 60;

/// A lookback named in the query ("last 2 hours", "past 30 minutes", "last hour"),
/// capped at 7 days.
pub fn requested_lookback(query: &str) -> Option<chrono::Duration> {
    let words: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(String::from)
        .collect();

    for (i, word) in words.iter().enumerate() {
        if word != "last" && word != "past" {
            continue;
        }
        let (amount, unit) = match (words.get(i + 1), words.get(i + 2)) {
            (Some(n), Some(unit)) if n.chars().all(|c| c.is_ascii_digit()) => {
                // Digits too long for u64 are still a (huge) number.
                (n.parse::<u64>().unwrap_or(u64::MAX), unit.as_str())
            }
            (Some(unit), _) => (1, unit.as_str()),
            _ => continue,
        };
        let unit_minutes: u64 = match unit {
            "minute" | "minutes" | "min" | "mins" => 1,
            "hour" | "hours" | "hr" | "hrs" | "h" => 60,
            "day" | "days" => 24 * 60,
            _ => continue,
        };
        if amount > 0 {
            let minutes = amount
                .saturating_mul(unit_minutes)
                .min(MAX_REQUESTED_LOOKBACK_MINUTES);
            return Some(chrono::Duration::minutes(minutes as i64));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use sitrep_core::connector::Connector;
    use sitrep_core::error::{ConnectorError, ProviderError};
    use sitrep_core::provider::{Prompt, Provider, ProviderResponse};
    use sitrep_core::signal::{MonitoringSignal, SignalKind};
    use sitrep_providers::ProviderEntry;
    use std::sync::Mutex;

    use crate::composer::AnalysisKind;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 8, h, m, 0).unwrap()
    }

    /// Serves one deployment and one error spike on user-service.
    struct IncidentConnector {
        call_count: Mutex<usize>,
    }

    impl IncidentConnector {
        fn new() -> Self {
            Self {
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }

        fn count(&self) {
            *self.call_count.lock().unwrap() += 1;
        }
    }

    #[async_trait]
    impl Connector for IncidentConnector {
        fn name(&self) -> &str {
            "es"
        }

        async fn fetch_deployments(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
            self.count();
            Ok(vec![
                MonitoringSignal::new("es", SignalKind::Deployment, "user-service", at(13, 45))
                    .with_meta("version", "v1.8.1"),
            ])
        }

        async fn fetch_alerts(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
            self.count();
            Ok(vec![])
        }

        async fn fetch_anomalies(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
            self.count();
            Ok(vec![])
        }

        async fn fetch_errors(
            &self,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
            self.count();
            Ok(vec![
                MonitoringSignal::new("es", SignalKind::Error, "user-service", at(13, 55))
                    .with_summary("DatabaseConnectionError x12"),
            ])
        }
    }

    enum Reply {
        Text(&'static str),
        Fail,
        Hang,
    }

    struct ScriptedProvider {
        name: String,
        reply: Reply,
        call_count: Mutex<usize>,
        last_query: Mutex<Option<String>>,
    }

    impl ScriptedProvider {
        fn new(name: &str, reply: Reply) -> Self {
            Self {
                name: name.into(),
                reply,
                call_count: Mutex::new(0),
                last_query: Mutex::new(None),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(
            &self,
            prompt: &Prompt,
            _max_tokens: u32,
        ) -> Result<ProviderResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            *self.last_query.lock().unwrap() = Some(prompt.query.clone());
            match &self.reply {
                Reply::Text(text) => Ok(ProviderResponse {
                    text: (*text).into(),
                    model: "test-model".into(),
                    usage: None,
                }),
                Reply::Fail => Err(ProviderError::AuthenticationFailed("bad key".into())),
                Reply::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Err(ProviderError::Timeout("unreachable".into()))
                }
            }
        }
    }

    fn pipeline(
        connector: Arc<IncidentConnector>,
        providers: Vec<Arc<ScriptedProvider>>,
    ) -> IncidentPipeline {
        let config = AppConfig::default();
        let mut connectors = ConnectorRegistry::new();
        connectors.register(connector, Duration::from_secs(5));
        let mut router = ProviderRouter::new(config.context.estimator());
        for (i, p) in providers.into_iter().enumerate() {
            router.register(ProviderEntry::new(p, i as u32 + 1, Duration::from_secs(30)));
        }
        IncidentPipeline::new(
            &config,
            connectors,
            router,
            Arc::new(ConversationMemory::default()),
            Arc::new(EventBus::default()),
        )
    }

    #[tokio::test]
    async fn complex_without_providers_is_summarized() {
        let connector = Arc::new(IncidentConnector::new());
        let p = pipeline(connector.clone(), vec![]);
        let session = SessionId::from("s");

        let response = p
            .handle(Request::new("Why are we seeing these errors in user-service?", session.clone()).at(at(14, 0)))
            .await
            .unwrap();

        assert_eq!(response.classification, Classification::Complex);
        assert_eq!(response.analysis, AnalysisKind::Summary);
        assert_eq!(response.data.top_correlations.len(), 1);
        assert_eq!(connector.calls(), 4);
        assert_eq!(p.memory().turn_count(&session).await, 2);
    }

    #[tokio::test]
    async fn complex_with_a_provider_is_generated() {
        let provider = Arc::new(ScriptedProvider::new("primary", Reply::Text("Roll back v1.8.1.")));
        let p = pipeline(Arc::new(IncidentConnector::new()), vec![provider.clone()]);
        let mut rx = p.events().subscribe();

        let response = p
            .handle(Request::new("why is it failing", SessionId::from("s")).at(at(14, 0)))
            .await
            .unwrap();

        assert_eq!(response.analysis, AnalysisKind::AiPowered);
        assert_eq!(response.narrative, "Roll back v1.8.1.");
        assert_eq!(provider.calls(), 1);

        let first = rx.recv().await.unwrap();
        assert!(matches!(&*first, DomainEvent::QueryClassified { classification, .. } if classification == "complex"));
    }

    #[tokio::test]
    async fn incident_summary_requests_use_the_summary_prompt() {
        let provider = Arc::new(ScriptedProvider::new("primary", Reply::Text("Summary.")));
        let p = pipeline(Arc::new(IncidentConnector::new()), vec![provider.clone()]);

        let response = p
            .handle(Request::new("Generate incident summary", SessionId::from("s")).at(at(14, 0)))
            .await
            .unwrap();

        assert_eq!(response.classification, Classification::Complex);
        assert_eq!(response.analysis, AnalysisKind::AiPowered);
        assert_eq!(
            provider.last_query.lock().unwrap().as_deref(),
            Some(sitrep_providers::prompt::INCIDENT_SUMMARY_REQUEST)
        );
    }

    #[tokio::test]
    async fn incident_summary_without_providers_uses_the_template() {
        let p = pipeline(Arc::new(IncidentConnector::new()), vec![]);
        let response = p
            .handle(Request::new("Generate incident summary", SessionId::from("s")).at(at(14, 0)))
            .await
            .unwrap();
        assert_eq!(response.analysis, AnalysisKind::Summary);
        assert!(response.narrative.starts_with("## Incident Summary"));
    }

    #[tokio::test]
    async fn all_providers_failing_falls_back_to_summary() {
        let a = Arc::new(ScriptedProvider::new("a", Reply::Fail));
        let b = Arc::new(ScriptedProvider::new("b", Reply::Fail));
        let p = pipeline(Arc::new(IncidentConnector::new()), vec![a.clone(), b.clone()]);

        let response = p
            .handle(Request::new("explain the outage", SessionId::from("s")).at(at(14, 0)))
            .await
            .unwrap();

        assert_eq!(response.analysis, AnalysisKind::Summary);
        assert!(response.narrative.contains("2 provider(s) failed"));
        assert_eq!((a.calls(), b.calls()), (1, 1));
    }

    #[tokio::test]
    async fn help_skips_the_fan_out() {
        let connector = Arc::new(IncidentConnector::new());
        let p = pipeline(connector.clone(), vec![]);
        let response = p
            .handle(Request::new("hello", SessionId::from("s")))
            .await
            .unwrap();
        assert_eq!(response.analysis, AnalysisKind::Help);
        assert!(response.narrative.contains("Rule-Based Analysis"));
        assert_eq!(connector.calls(), 0);
    }

    #[tokio::test]
    async fn follow_up_routes_to_ai_once_the_conversation_started() {
        let provider = Arc::new(ScriptedProvider::new("primary", Reply::Text("More detail.")));
        let p = pipeline(Arc::new(IncidentConnector::new()), vec![provider.clone()]);
        let session = SessionId::from("s");

        let first = p.handle(Request::new("continue", session.clone())).await.unwrap();
        assert_eq!(first.classification, Classification::Simple);

        let second = p.handle(Request::new("continue", session.clone())).await.unwrap();
        assert_eq!(second.classification, Classification::Complex);
        assert_eq!(provider.calls(), 1);
        assert_eq!(p.memory().turn_count(&session).await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_request_persists_nothing() {
        let provider = Arc::new(ScriptedProvider::new("slow", Reply::Hang));
        let p = pipeline(Arc::new(IncidentConnector::new()), vec![provider])
            .with_request_timeout(Duration::from_secs(2));
        let session = SessionId::from("s");

        let err = p
            .handle(Request::new("why", session.clone()))
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Timeout { timeout_ms: 2000 }));
        assert_eq!(err.user_message(), GENERIC_FAILURE);
        assert_eq!(p.memory().turn_count(&session).await, 0);
    }

    #[test]
    fn lookback_phrases() {
        assert_eq!(requested_lookback("what changed in the last 2 hours"), Some(chrono::Duration::hours(2)));
        assert_eq!(requested_lookback("errors in the past 30 minutes"), Some(chrono::Duration::minutes(30)));
        assert_eq!(requested_lookback("last hour please"), Some(chrono::Duration::hours(1)));
        assert_eq!(requested_lookback("last 30 days"), Some(chrono::Duration::days(7)));
        assert_eq!(requested_lookback("what changed"), None);
        assert_eq!(requested_lookback("the last deployment"), None);
    }

    #[test]
    fn oversized_lookback_is_capped_without_overflow() {
        let week = Some(chrono::Duration::days(7));
        assert_eq!(requested_lookback("what changed in the last 99999999999999 days"), week);
        assert_eq!(requested_lookback("last 9223372036854775807 hours"), week);
        assert_eq!(requested_lookback("past 999999999999999999999999 minutes"), week);
        assert_eq!(requested_lookback("last 0 hours"), None);
    }

    #[test]
    fn requests_deserialize_with_defaults() {
        let req: Request =
            serde_json::from_str(r#"{"query": "what changed", "session": "abc"}"#).unwrap();
        assert_eq!(req.session, SessionId::from("abc"));
        assert!(req.preferred_provider.is_none());
    }
}
