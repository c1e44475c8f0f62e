//! Provider router: ordered fail-over across configured LLM providers.
//!
//! Candidates are tried one at a time in priority order (or the preferred
//! provider first). Each attempt gets the prompt fitted to that provider's
//! context limit and its own timeout. The first success wins; every failure
//! is recorded and published, and exhaustion is reported to the caller so it
//! can fall back to the summary path.

use serde::{Deserialize, Serialize};
use sitrep_config::{AppConfig, ProviderConfig};
use sitrep_core::event::{DomainEvent, EventBus};
use sitrep_core::incident::IncidentContext;
use sitrep_core::provider::{Prompt, Provider, ProviderKind};
use sitrep_core::token::TokenEstimator;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::anthropic::AnthropicProvider;
use crate::openai_compat::OpenAiCompatProvider;
use crate::prompt;

/// One failed attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub provider: String,
    /// Machine label: timeout, auth, rate_limited, ...
    pub kind: String,
    pub reason: String,
}

/// A successful generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub provider: String,
    pub model: String,
    pub tokens_used: Option<u32>,
    pub elapsed_ms: u64,
    /// Failures recorded before the successful attempt
    pub failures: Vec<ProviderFailure>,
}

/// Every candidate failed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("All {} provider(s) unavailable", failures.len())]
pub struct AllProvidersUnavailable {
    pub failures: Vec<ProviderFailure>,
}

/// A registered provider and its limits.
#[derive(Clone)]
pub struct ProviderEntry {
    pub provider: Arc<dyn Provider>,
    pub priority: u32,
    pub timeout: Duration,
    pub max_context_tokens: usize,
    pub max_output_tokens: u32,
}

impl ProviderEntry {
    pub fn new(provider: Arc<dyn Provider>, priority: u32, timeout: Duration) -> Self {
        Self {
            provider,
            priority,
            timeout,
            max_context_tokens: 8_000,
            max_output_tokens: 1_000,
        }
    }

    pub fn with_limits(mut self, max_context_tokens: usize, max_output_tokens: u32) -> Self {
        self.max_context_tokens = max_context_tokens;
        self.max_output_tokens = max_output_tokens;
        self
    }

    fn name(&self) -> &str {
        self.provider.name()
    }

    /// Input budget: the context window minus room for the answer.
    fn input_limit(&self) -> usize {
        self.max_context_tokens
            .saturating_sub(self.max_output_tokens as usize)
    }
}

/// Routes generation requests across the fail-over chain.
pub struct ProviderRouter {
    /// Sorted by ascending priority
    entries: Vec<ProviderEntry>,
    estimator: TokenEstimator,
    events: Option<Arc<EventBus>>,
}

impl ProviderRouter {
    pub fn new(estimator: TokenEstimator) -> Self {
        Self {
            entries: Vec::new(),
            estimator,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Register a provider, keeping the chain in priority order.
    pub fn register(&mut self, entry: ProviderEntry) {
        self.entries.push(entry);
        self.entries.sort_by_key(|e| e.priority);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Provider names in priority order.
    pub fn list(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name()).collect()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.entries
            .iter()
            .find(|e| e.name() == name)
            .map(|e| Arc::clone(&e.provider))
    }

    /// Attempt order: `preferred` first when it names a registered provider,
    /// then the rest by priority, never repeating.
    pub fn candidates(&self, preferred: Option<&str>) -> Vec<&ProviderEntry> {
        let mut order: Vec<&ProviderEntry> = Vec::with_capacity(self.entries.len());
        if let Some(p) = preferred.and_then(|name| self.entries.iter().find(|e| e.name() == name)) {
            order.push(p);
        }
        for e in &self.entries {
            if !order.iter().any(|o| o.name() == e.name()) {
                order.push(e);
            }
        }
        order
    }

    /// Generate an answer for `ctx`.
    pub async fn generate(
        &self,
        ctx: &IncidentContext,
        preferred: Option<&str>,
    ) -> Result<Generation, AllProvidersUnavailable> {
        self.generate_prompt(&prompt::render(ctx), preferred).await
    }

    /// Generate from an already-rendered prompt.
    pub async fn generate_prompt(
        &self,
        prompt: &Prompt,
        preferred: Option<&str>,
    ) -> Result<Generation, AllProvidersUnavailable> {
        let candidates = self.candidates(preferred);
        let mut failures: Vec<ProviderFailure> = Vec::new();

        for (i, entry) in candidates.iter().enumerate() {
            let name = entry.name().to_string();

            let mut fitted = prompt.clone();
            let dropped = fitted.fit_to(entry.input_limit(), &self.estimator);
            let estimate = fitted.estimate_tokens(&self.estimator);
            if estimate > entry.input_limit() {
                let failure = ProviderFailure {
                    provider: name.clone(),
                    kind: "context_overflow".into(),
                    reason: format!(
                        "prompt needs {estimate} tokens, limit is {}",
                        entry.input_limit()
                    ),
                };
                self.record(&failure);
                failures.push(failure);
                continue;
            }

            info!(
                provider = %name,
                attempt = i + 1,
                total = candidates.len(),
                tokens = estimate,
                dropped,
                "Trying provider"
            );

            let started = Instant::now();
            let outcome = tokio::time::timeout(
                entry.timeout,
                entry.provider.generate(&fitted, entry.max_output_tokens),
            )
            .await;

            let failure = match outcome {
                Ok(Ok(response)) => {
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    info!(provider = %name, model = %response.model, elapsed_ms, "Provider succeeded");
                    if let Some(bus) = &self.events {
                        bus.publish(DomainEvent::ProviderSucceeded {
                            provider: name.clone(),
                            model: response.model.clone(),
                            elapsed_ms,
                            timestamp: chrono::Utc::now(),
                        });
                    }
                    return Ok(Generation {
                        text: response.text,
                        provider: name,
                        model: response.model,
                        tokens_used: response.usage.map(|u| u.total_tokens),
                        elapsed_ms,
                        failures,
                    });
                }
                Ok(Err(e)) => {
                    warn!(provider = %name, error = %e, "Provider failed, trying next");
                    ProviderFailure {
                        provider: name,
                        kind: e.kind().into(),
                        reason: e.to_string(),
                    }
                }
                Err(_) => {
                    warn!(
                        provider = %name,
                        timeout_ms = entry.timeout.as_millis() as u64,
                        "Provider timed out, trying next"
                    );
                    ProviderFailure {
                        provider: name,
                        kind: "timeout".into(),
                        reason: format!("timed out after {}ms", entry.timeout.as_millis()),
                    }
                }
            };
            self.record(&failure);
            failures.push(failure);
        }

        warn!(attempts = failures.len(), "All providers unavailable");
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::AllProvidersUnavailable {
                attempts: failures.len(),
                timestamp: chrono::Utc::now(),
            });
        }
        Err(AllProvidersUnavailable { failures })
    }

    fn record(&self, failure: &ProviderFailure) {
        if let Some(bus) = &self.events {
            bus.publish(DomainEvent::ProviderFailed {
                provider: failure.provider.clone(),
                reason: failure.kind.clone(),
                timestamp: chrono::Utc::now(),
            });
        }
    }

    /// Health of every provider, in priority order.
    pub async fn health(&self) -> Vec<(String, bool)> {
        let mut out = Vec::with_capacity(self.entries.len());
        for e in &self.entries {
            let healthy = matches!(
                tokio::time::timeout(e.timeout, e.provider.health_check()).await,
                Ok(Ok(true))
            );
            out.push((e.name().to_string(), healthy));
        }
        out
    }
}

/// Build one provider client from configuration, or explain why not.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn Provider>, String> {
    let api_key = match (&config.api_key_env, config.resolve_api_key()) {
        (_, Some(key)) => key,
        (Some(var), None) => return Err(format!("environment variable {var} is not set")),
        (None, None) if config.kind == ProviderKind::OpenAiCompatible => String::new(),
        (None, None) => return Err("no api_key_env configured".into()),
    };

    let provider: Arc<dyn Provider> = match config.kind {
        ProviderKind::OpenAiCompatible => {
            let base = config
                .api_url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".into());
            Arc::new(
                OpenAiCompatProvider::new(&config.name, base, api_key, &config.model)
                    .with_temperature(config.temperature),
            )
        }
        ProviderKind::AzureOpenAi => {
            let endpoint = config
                .api_url
                .clone()
                .ok_or_else(|| "azure_open_ai requires api_url".to_string())?;
            Arc::new(
                OpenAiCompatProvider::azure(
                    &config.name,
                    endpoint,
                    api_key,
                    &config.model,
                    config.api_version.clone(),
                )
                .with_temperature(config.temperature),
            )
        }
        ProviderKind::Anthropic => {
            let mut p = AnthropicProvider::new(&config.name, api_key, &config.model)
                .with_temperature(config.temperature);
            if let Some(url) = &config.api_url {
                p = p.with_base_url(url);
            }
            Arc::new(p)
        }
    };
    Ok(provider)
}

/// Build the router from configuration. Providers whose credentials don't
/// resolve are left out with a warning.
pub fn build_from_config(config: &AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(config.context.estimator());

    for p in config.providers_by_priority() {
        match build_provider(p) {
            Ok(provider) => {
                info!(provider = %p.name, kind = %p.kind, priority = p.priority, "Provider registered");
                router.register(
                    ProviderEntry::new(provider, p.priority, p.timeout(config.timeouts.per_provider_secs))
                        .with_limits(p.max_context_tokens, p.max_output_tokens),
                );
            }
            Err(reason) => warn!(provider = %p.name, reason = %reason, "Skipping provider"),
        }
    }

    router
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sitrep_core::Turn;
    use sitrep_core::error::ProviderError;
    use sitrep_core::provider::{ProviderResponse, Usage};
    use std::sync::Mutex;

    /// A mock provider that always fails.
    struct FailingProvider {
        name: String,
        error: ProviderError,
        call_count: Mutex<usize>,
    }

    impl FailingProvider {
        fn new(name: &str, error: ProviderError) -> Self {
            Self {
                name: name.into(),
                error,
                call_count: Mutex::new(0),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for FailingProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(
            &self,
            _prompt: &Prompt,
            _max_tokens: u32,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            Err(self.error.clone())
        }
    }

    /// A mock provider that always succeeds and remembers the prompt it saw.
    struct SuccessProvider {
        name: String,
        call_count: Mutex<usize>,
        last_history_len: Mutex<Option<usize>>,
    }

    impl SuccessProvider {
        fn new(name: &str) -> Self {
            Self {
                name: name.into(),
                call_count: Mutex::new(0),
                last_history_len: Mutex::new(None),
            }
        }

        fn calls(&self) -> usize {
            *self.call_count.lock().unwrap()
        }
    }

    #[async_trait]
    impl Provider for SuccessProvider {
        fn name(&self) -> &str {
            &self.name
        }

        async fn generate(
            &self,
            prompt: &Prompt,
            _max_tokens: u32,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            *self.last_history_len.lock().unwrap() = Some(prompt.history.len());
            Ok(ProviderResponse {
                text: format!("analysis from {}", self.name),
                model: "test-model".into(),
                usage: Some(Usage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                }),
            })
        }
    }

    /// A mock provider that hangs forever (for timeout testing).
    struct HangingProvider {
        call_count: Mutex<usize>,
    }

    #[async_trait]
    impl Provider for HangingProvider {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn generate(
            &self,
            _prompt: &Prompt,
            _max_tokens: u32,
        ) -> std::result::Result<ProviderResponse, ProviderError> {
            *self.call_count.lock().unwrap() += 1;
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Err(ProviderError::Timeout("unreachable".into()))
        }
    }

    fn test_prompt() -> Prompt {
        Prompt {
            system: "You are an incident analyst.".into(),
            query: "why are we seeing errors".into(),
            ..Prompt::default()
        }
    }

    fn entry(p: Arc<dyn Provider>, priority: u32) -> ProviderEntry {
        ProviderEntry::new(p, priority, Duration::from_secs(5))
    }

    fn router(entries: Vec<ProviderEntry>) -> ProviderRouter {
        let mut r = ProviderRouter::new(TokenEstimator::default());
        for e in entries {
            r.register(e);
        }
        r
    }

    #[tokio::test]
    async fn first_provider_succeeds() {
        let p1 = Arc::new(SuccessProvider::new("primary"));
        let p2 = Arc::new(SuccessProvider::new("secondary"));
        let r = router(vec![entry(p1.clone(), 1), entry(p2.clone(), 2)]);

        let g = r.generate_prompt(&test_prompt(), None).await.unwrap();
        assert_eq!(g.provider, "primary");
        assert_eq!(g.tokens_used, Some(15));
        assert!(g.failures.is_empty());

        // later providers untouched
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 0);
    }

    #[tokio::test]
    async fn registration_order_does_not_matter() {
        let p1 = Arc::new(SuccessProvider::new("primary"));
        let p2 = Arc::new(SuccessProvider::new("secondary"));
        let r = router(vec![entry(p2.clone(), 2), entry(p1.clone(), 1)]);
        assert_eq!(r.list(), vec!["primary", "secondary"]);
    }

    #[tokio::test]
    async fn falls_back_on_rate_limit() {
        let p1 = Arc::new(FailingProvider::new(
            "primary",
            ProviderError::RateLimited {
                retry_after_secs: 60,
            },
        ));
        let p2 = Arc::new(SuccessProvider::new("secondary"));
        let r = router(vec![entry(p1.clone(), 1), entry(p2.clone(), 2)]);

        let g = r.generate_prompt(&test_prompt(), None).await.unwrap();
        assert_eq!(g.provider, "secondary");
        assert_eq!(g.failures.len(), 1);
        assert_eq!(g.failures[0].kind, "rate_limited");
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test]
    async fn timeout_records_exactly_one_failure() {
        let p1 = Arc::new(HangingProvider {
            call_count: Mutex::new(0),
        });
        let p2 = Arc::new(SuccessProvider::new("secondary"));
        let r = router(vec![
            ProviderEntry::new(p1.clone(), 1, Duration::from_millis(50)),
            entry(p2.clone(), 2),
        ]);

        let g = r.generate_prompt(&test_prompt(), None).await.unwrap();
        assert_eq!(g.text, "analysis from secondary");
        assert_eq!(g.failures.len(), 1);
        assert_eq!(g.failures[0].provider, "hanging");
        assert_eq!(g.failures[0].kind, "timeout");
        assert_eq!(*p1.call_count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn all_providers_fail() {
        let p1 = Arc::new(FailingProvider::new(
            "primary",
            ProviderError::Network("conn refused".into()),
        ));
        let p2 = Arc::new(FailingProvider::new(
            "secondary",
            ProviderError::AuthenticationFailed("bad key".into()),
        ));
        let r = router(vec![entry(p1.clone(), 1), entry(p2.clone(), 2)]);

        let err = r.generate_prompt(&test_prompt(), None).await.unwrap_err();
        let kinds: Vec<&str> = err.failures.iter().map(|f| f.kind.as_str()).collect();
        assert_eq!(kinds, vec!["network", "auth"]);
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test]
    async fn empty_chain_is_unavailable() {
        let r = ProviderRouter::new(TokenEstimator::default());
        let err = r.generate_prompt(&test_prompt(), None).await.unwrap_err();
        assert!(err.failures.is_empty());
    }

    #[tokio::test]
    async fn preferred_provider_goes_first_without_repeat() {
        let p1 = Arc::new(FailingProvider::new(
            "primary",
            ProviderError::Network("down".into()),
        ));
        let p2 = Arc::new(FailingProvider::new(
            "secondary",
            ProviderError::Network("down".into()),
        ));
        let r = router(vec![entry(p1.clone(), 1), entry(p2.clone(), 2)]);

        let order: Vec<String> = r
            .candidates(Some("secondary"))
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(order, vec!["secondary", "primary"]);

        let unknown: Vec<String> = r
            .candidates(Some("nope"))
            .iter()
            .map(|e| e.name().to_string())
            .collect();
        assert_eq!(unknown, vec!["primary", "secondary"]);

        let err = r.generate_prompt(&test_prompt(), Some("secondary")).await.unwrap_err();
        assert_eq!(err.failures[0].provider, "secondary");
        assert_eq!(p1.calls(), 1);
        assert_eq!(p2.calls(), 1);
    }

    #[tokio::test]
    async fn history_is_fitted_per_provider() {
        let small = Arc::new(SuccessProvider::new("small"));
        let r = router(vec![entry(small.clone(), 1).with_limits(60, 10)]);

        let mut prompt = test_prompt();
        prompt.history = (0..20)
            .map(|i| Turn::user(format!("earlier question number {i} about the outage")))
            .collect();

        r.generate_prompt(&prompt, None).await.unwrap();
        let seen = small.last_history_len.lock().unwrap().unwrap();
        assert!(seen < 20);
    }

    #[tokio::test]
    async fn failures_are_published() {
        let bus = Arc::new(EventBus::new(16));
        let mut rx = bus.subscribe();
        let p1 = Arc::new(FailingProvider::new(
            "primary",
            ProviderError::MalformedResponse("empty".into()),
        ));
        let p2 = Arc::new(SuccessProvider::new("secondary"));
        let r = router(vec![entry(p1, 1), entry(p2, 2)]).with_events(bus);

        r.generate_prompt(&test_prompt(), None).await.unwrap();
        match rx.recv().await.unwrap().as_ref() {
            DomainEvent::ProviderFailed { provider, reason, .. } => {
                assert_eq!(provider, "primary");
                assert_eq!(reason, "malformed_response");
            }
            other => panic!("Expected ProviderFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_reports_each_provider() {
        let p1 = Arc::new(SuccessProvider::new("a"));
        let r = router(vec![entry(p1, 1)]);
        assert_eq!(r.health().await, vec![("a".to_string(), true)]);
    }

    #[test]
    fn build_from_default_config_is_empty() {
        let r = build_from_config(&AppConfig::default());
        assert!(r.is_empty());
    }

    #[test]
    fn missing_credentials_skip_provider() {
        let mut config = AppConfig::default();
        let mut anthropic = ProviderConfig::new("claude", ProviderKind::Anthropic, 1, "claude-sonnet-4");
        anthropic.api_key_env = Some("SITREP_TEST_DEFINITELY_UNSET".into());
        config.providers.push(anthropic);
        config.providers.push(ProviderConfig::new(
            "ollama",
            ProviderKind::OpenAiCompatible,
            2,
            "llama3",
        ));

        let r = build_from_config(&config);
        assert_eq!(r.list(), vec!["ollama"]);
    }

    #[test]
    fn azure_requires_endpoint() {
        let mut azure = ProviderConfig::new("azure", ProviderKind::AzureOpenAi, 1, "gpt4");
        azure.api_key_env = Some("PATH".into());
        assert!(build_provider(&azure).is_err());
        azure.api_url = Some("https://acme.openai.azure.com".into());
        assert!(build_provider(&azure).is_ok());
    }
}
