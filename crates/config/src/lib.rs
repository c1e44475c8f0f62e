//! Configuration loading, validation, and management for sitrep.
//!
//! Loads configuration from `~/.sitrep/config.toml` (or `$SITREP_CONFIG`)
//! with environment variable overrides. Validates all settings at startup;
//! configuration is immutable afterwards.

use serde::{Deserialize, Serialize};
use sitrep_core::{ProviderKind, SignalKind};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.sitrep/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Provider tried first when a request names none (`SITREP_PROVIDER`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_provider: Option<String>,

    #[serde(default)]
    pub classifier: ClassifierConfig,

    #[serde(default)]
    pub correlation: CorrelationConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub memory: MemoryConfig,

    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Dashboard deep links attached to responses
    #[serde(default)]
    pub dashboards: DashboardConfig,

    /// LLM providers, attempted in ascending `priority`
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    /// Monitoring backends
    #[serde(default)]
    pub connectors: Vec<ConnectorConfig>,
}

// ── Classifier ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Words or phrases that always route to AI analysis
    #[serde(default = "default_trigger_keywords")]
    pub trigger_keywords: Vec<String>,

    /// Inputs made only of these words get the help response
    #[serde(default = "default_greeting_terms")]
    pub greeting_terms: Vec<String>,

    /// Continuations that route to AI analysis once a conversation is under way
    #[serde(default = "default_follow_up_terms")]
    pub follow_up_terms: Vec<String>,

    /// Queries with strictly more words than this are complex
    #[serde(default = "default_complexity_word_threshold")]
    pub complexity_word_threshold: usize,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_trigger_keywords() -> Vec<String> {
    strings(&[
        "analyze",
        "explain",
        "why",
        "how",
        "what should",
        "recommend",
        "suggest",
        "understand",
        "investigate",
        "troubleshoot",
        "root cause",
        "summarize",
        "incident summary",
        "executive summary",
    ])
}
fn default_greeting_terms() -> Vec<String> {
    strings(&[
        "hi", "hello", "hey", "help", "thanks", "thank", "you", "please", "start",
    ])
}
fn default_follow_up_terms() -> Vec<String> {
    strings(&[
        "continue",
        "more",
        "elaborate",
        "go on",
        "continue with analysis",
    ])
}
fn default_complexity_word_threshold() -> usize {
    10
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            trigger_keywords: default_trigger_keywords(),
            greeting_terms: default_greeting_terms(),
            follow_up_terms: default_follow_up_terms(),
            complexity_word_threshold: default_complexity_word_threshold(),
        }
    }
}

// ── Correlation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// Signals closer than this are candidates for the same incident
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u64,

    /// How far back each request fetches
    #[serde(default = "default_lookback_minutes")]
    pub lookback_minutes: u64,

    #[serde(default = "default_temporal_weight")]
    pub temporal_weight: f64,

    #[serde(default = "default_overlap_weight")]
    pub overlap_weight: f64,

    /// Fraction of the remaining headroom added for deploy-then-symptom pairs
    #[serde(default = "default_deployment_boost")]
    pub deployment_boost: f64,

    /// Shared attributes at which overlap scores 1.0
    #[serde(default = "default_overlap_saturation")]
    pub overlap_saturation: usize,

    /// Metadata keys compared for attribute overlap
    #[serde(default = "default_attribute_keys")]
    pub attribute_keys: Vec<String>,

    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,

    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f64,
}

fn default_window_minutes() -> u64 {
    60
}
fn default_lookback_minutes() -> u64 {
    240
}
fn default_temporal_weight() -> f64 {
    0.6
}
fn default_overlap_weight() -> f64 {
    0.4
}
fn default_deployment_boost() -> f64 {
    0.5
}
fn default_overlap_saturation() -> usize {
    3
}
fn default_attribute_keys() -> Vec<String> {
    strings(&["environment", "version", "host", "region"])
}
fn default_high_threshold() -> f64 {
    0.7
}
fn default_medium_threshold() -> f64 {
    0.4
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            window_minutes: default_window_minutes(),
            lookback_minutes: default_lookback_minutes(),
            temporal_weight: default_temporal_weight(),
            overlap_weight: default_overlap_weight(),
            deployment_boost: default_deployment_boost(),
            overlap_saturation: default_overlap_saturation(),
            attribute_keys: default_attribute_keys(),
            high_threshold: default_high_threshold(),
            medium_threshold: default_medium_threshold(),
        }
    }
}

/// Upper bound for `window_minutes` and `lookback_minutes` (30 days).
pub const MAX_SPAN_MINUTES: u64 = 30 * 24 * 60;

impl CorrelationConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.window_minutes.min(MAX_SPAN_MINUTES) as i64)
    }

    pub fn lookback(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.lookback_minutes.min(MAX_SPAN_MINUTES) as i64)
    }
}

// ── Context budget ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum estimated tokens in one incident context
    #[serde(default = "default_token_budget")]
    pub token_budget: usize,

    #[serde(default = "default_tokens_per_word")]
    pub tokens_per_word: f64,

    #[serde(default = "default_per_turn_overhead")]
    pub per_turn_overhead: usize,
}

fn default_token_budget() -> usize {
    3000
}
fn default_tokens_per_word() -> f64 {
    1.3
}
fn default_per_turn_overhead() -> usize {
    4
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            token_budget: default_token_budget(),
            tokens_per_word: default_tokens_per_word(),
            per_turn_overhead: default_per_turn_overhead(),
        }
    }
}

impl ContextConfig {
    pub fn estimator(&self) -> sitrep_core::TokenEstimator {
        sitrep_core::TokenEstimator::new(self.tokens_per_word, self.per_turn_overhead)
    }
}

// ── Memory ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Oldest turns are evicted beyond this
    #[serde(default = "default_max_turns")]
    pub max_turns_per_session: usize,

    /// Bound on waiting for a session's writer lock
    #[serde(default = "default_lock_wait_ms")]
    pub lock_wait_ms: u64,

    /// Attempts on write conflict before giving up
    #[serde(default = "default_write_retries")]
    pub write_retries: u32,
}

fn default_max_turns() -> usize {
    50
}
fn default_lock_wait_ms() -> u64 {
    500
}
fn default_write_retries() -> u32 {
    3
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_turns_per_session: default_max_turns(),
            lock_wait_ms: default_lock_wait_ms(),
            write_retries: default_write_retries(),
        }
    }
}

impl MemoryConfig {
    pub fn lock_wait(&self) -> Duration {
        Duration::from_millis(self.lock_wait_ms)
    }
}

// ── Timeouts ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    #[serde(default = "default_per_connector_ms")]
    pub per_connector_ms: u64,

    /// Used for providers that don't set their own `timeout_secs`
    #[serde(default = "default_per_provider_secs")]
    pub per_provider_secs: u64,

    /// Whole-request deadline
    #[serde(default = "default_request_secs")]
    pub request_secs: u64,
}

fn default_per_connector_ms() -> u64 {
    5_000
}
fn default_per_provider_secs() -> u64 {
    30
}
fn default_request_secs() -> u64 {
    90
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            per_connector_ms: default_per_connector_ms(),
            per_provider_secs: default_per_provider_secs(),
            request_secs: default_request_secs(),
        }
    }
}

impl TimeoutConfig {
    pub fn per_connector(&self) -> Duration {
        Duration::from_millis(self.per_connector_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

// ── Dashboards ────────────────────────────────────────────────────────────

/// Base URLs of the dashboards a response links to. Unset entries are
/// never linked.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// Deployment timeline (e.g. a Grafana dashboard)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployments: Option<String>,

    /// Latency / throughput panels
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<String>,

    /// Service health overview (e.g. the Nagios tactical overview)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_health: Option<String>,
}

impl DashboardConfig {
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Append query parameters to `base`, respecting an existing query string.
    pub fn link(base: &str, params: &[(&str, String)]) -> String {
        if params.is_empty() {
            return base.to_string();
        }
        let query: Vec<String> = params.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let sep = if base.contains('?') { '&' } else { '?' };
        format!("{base}{sep}{}", query.join("&"))
    }
}

// ── Providers ─────────────────────────────────────────────────────────────

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,

    pub kind: ProviderKind,

    /// Lower is tried first; must be unique
    pub priority: u32,

    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Name of the environment variable holding the API key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Base URL, or the Azure resource endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Model name, or the Azure deployment name
    pub model: String,

    /// Azure `api-version` query parameter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default = "default_max_context_tokens")]
    pub max_context_tokens: usize,

    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    #[serde(default = "default_provider_temperature")]
    pub temperature: f32,
}

fn default_max_context_tokens() -> usize {
    8_000
}
fn default_max_output_tokens() -> u32 {
    1_000
}
fn default_provider_temperature() -> f32 {
    0.3
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, kind: ProviderKind, priority: u32, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            priority,
            capabilities: Vec::new(),
            timeout_secs: None,
            api_key_env: None,
            api_url: None,
            model: model.into(),
            api_version: None,
            max_context_tokens: default_max_context_tokens(),
            max_output_tokens: default_max_output_tokens(),
            temperature: default_provider_temperature(),
        }
    }

    pub fn timeout(&self, fallback_secs: u64) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(fallback_secs))
    }

    /// Resolve the API key from the referenced environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|k| !k.is_empty())
    }
}

// Never print the key itself, only whether its variable resolves.
impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("priority", &self.priority)
            .field("capabilities", &self.capabilities)
            .field("timeout_secs", &self.timeout_secs)
            .field("api_key_env", &self.api_key_env)
            .field("api_key", &redact(&self.resolve_api_key()))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .field("max_context_tokens", &self.max_context_tokens)
            .finish()
    }
}

// ── Connectors ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectorKind {
    Elasticsearch,
    Fixture,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    pub name: String,

    pub kind: ConnectorKind,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Name of the environment variable holding the password
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Fixture file path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Restrict to these signal kinds; empty means all
    #[serde(default)]
    pub kinds: Vec<SignalKind>,

    /// Overrides `timeouts.per_connector_ms`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn default_true() -> bool {
    true
}

impl ConnectorConfig {
    pub fn fixture(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind: ConnectorKind::Fixture,
            enabled: true,
            url: None,
            index: None,
            username: None,
            password_env: None,
            path: Some(path.into()),
            kinds: Vec::new(),
            timeout_ms: None,
        }
    }

    pub fn resolve_password(&self) -> Option<String> {
        self.password_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
    }

    pub fn timeout(&self, fallback: Duration) -> Duration {
        self.timeout_ms.map(Duration::from_millis).unwrap_or(fallback)
    }
}

impl std::fmt::Debug for ConnectorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectorConfig")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("enabled", &self.enabled)
            .field("url", &self.url)
            .field("index", &self.index)
            .field("username", &self.username)
            .field("password", &redact(&self.resolve_password()))
            .field("path", &self.path)
            .field("kinds", &self.kinds)
            .field("timeout_ms", &self.timeout_ms)
            .finish()
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

// ── Loading ───────────────────────────────────────────────────────────────

impl AppConfig {
    /// Load configuration from `$SITREP_CONFIG` or `~/.sitrep/config.toml`,
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SITREP_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Self::config_path());
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(provider) = lookup("SITREP_PROVIDER").filter(|p| !p.is_empty()) {
            self.preferred_provider = Some(provider);
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".sitrep")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let c = &self.correlation;
        if c.window_minutes == 0 {
            return Err(ConfigError::ValidationError(
                "correlation.window_minutes must be > 0".into(),
            ));
        }
        if c.window_minutes > MAX_SPAN_MINUTES || c.lookback_minutes > MAX_SPAN_MINUTES {
            return Err(ConfigError::ValidationError(format!(
                "correlation.window_minutes and lookback_minutes must not exceed {MAX_SPAN_MINUTES}"
            )));
        }
        if c.lookback_minutes == 0 {
            return Err(ConfigError::ValidationError(
                "correlation.lookback_minutes must be > 0".into(),
            ));
        }
        if c.temporal_weight <= 0.0 || c.overlap_weight <= 0.0 {
            return Err(ConfigError::ValidationError(
                "correlation weights must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&c.deployment_boost) {
            return Err(ConfigError::ValidationError(
                "correlation.deployment_boost must be between 0.0 and 1.0".into(),
            ));
        }
        if c.overlap_saturation == 0 {
            return Err(ConfigError::ValidationError(
                "correlation.overlap_saturation must be > 0".into(),
            ));
        }
        let in_unit = |v: f64| v > 0.0 && v <= 1.0;
        if !in_unit(c.high_threshold) || !in_unit(c.medium_threshold) {
            return Err(ConfigError::ValidationError(
                "confidence thresholds must be in (0, 1]".into(),
            ));
        }
        if c.medium_threshold > c.high_threshold {
            return Err(ConfigError::ValidationError(
                "correlation.medium_threshold must not exceed high_threshold".into(),
            ));
        }

        if self.context.token_budget < 64 {
            return Err(ConfigError::ValidationError(
                "context.token_budget must be at least 64".into(),
            ));
        }
        if self.context.tokens_per_word <= 0.0 {
            return Err(ConfigError::ValidationError(
                "context.tokens_per_word must be > 0".into(),
            ));
        }

        let mut names = HashSet::new();
        let mut priorities = HashSet::new();
        for p in &self.providers {
            if !names.insert(p.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate provider name '{}'",
                    p.name
                )));
            }
            if !priorities.insert(p.priority) {
                return Err(ConfigError::ValidationError(format!(
                    "provider '{}' shares priority {} with another provider",
                    p.name, p.priority
                )));
            }
        }

        let mut connector_names = HashSet::new();
        for c in &self.connectors {
            if !connector_names.insert(c.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate connector name '{}'",
                    c.name
                )));
            }
        }

        Ok(())
    }

    /// Providers sorted by ascending priority.
    pub fn providers_by_priority(&self) -> Vec<&ProviderConfig> {
        let mut sorted: Vec<&ProviderConfig> = self.providers.iter().collect();
        sorted.sort_by_key(|p| p.priority);
        sorted
    }

    pub fn enabled_connectors(&self) -> impl Iterator<Item = &ConnectorConfig> {
        self.connectors.iter().filter(|c| c.enabled)
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            preferred_provider: None,
            classifier: ClassifierConfig::default(),
            correlation: CorrelationConfig::default(),
            context: ContextConfig::default(),
            memory: MemoryConfig::default(),
            timeouts: TimeoutConfig::default(),
            dashboards: DashboardConfig::default(),
            providers: vec![],
            connectors: vec![],
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
