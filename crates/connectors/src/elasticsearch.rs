//! Elasticsearch connector.
//!
//! Every signal kind is a `_search` over the configured index with an
//! `@timestamp` range plus a kind-specific `should` clause. Hits are mapped
//! to signals client-side; error hits are grouped per (service, error type)
//! into one spike signal carrying the count and first occurrence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Value, json};
use sitrep_core::connector::Connector;
use sitrep_core::error::ConnectorError;
use sitrep_core::signal::{MonitoringSignal, Severity, SignalKind};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// An Elasticsearch-backed monitoring source.
pub struct ElasticsearchConnector {
    name: String,
    base_url: String,
    index: Option<String>,
    username: Option<String>,
    password: Option<String>,
    kinds: Vec<SignalKind>,
    client: reqwest::Client,
}

impl ElasticsearchConnector {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            index: None,
            username: None,
            password: None,
            kinds: SignalKind::ALL.to_vec(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = Some(index.into());
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: Option<String>) -> Self {
        self.username = Some(username.into());
        self.password = password;
        self
    }

    pub fn with_kinds(mut self, kinds: Vec<SignalKind>) -> Self {
        if !kinds.is_empty() {
            self.kinds = kinds;
        }
        self
    }

    fn search_url(&self) -> String {
        match &self.index {
            Some(index) => format!("{}/{}/_search", self.base_url, index),
            None => format!("{}/_search", self.base_url),
        }
    }

    /// The `_search` body for one kind over `[start, end]`.
    pub fn query_for(kind: SignalKind, start: DateTime<Utc>, end: DateTime<Utc>) -> Value {
        let should = match kind {
            SignalKind::Deployment => json!([
                {"match": {"message": "deployment"}},
                {"match": {"message": "deploy"}},
            ]),
            SignalKind::Alert => json!([
                {"match": {"message": "alert"}},
                {"exists": {"field": "alertname"}},
            ]),
            SignalKind::Anomaly => json!([
                {"range": {"response_time": {"gte": 1000}}},
                {"range": {"duration": {"gte": 5000}}},
                {"match": {"message": "slow query"}},
                {"match": {"message": "timeout"}},
            ]),
            SignalKind::Error => json!([
                {"match": {"level": "ERROR"}},
                {"match": {"level": "FATAL"}},
                {"match": {"message": "exception"}},
                {"range": {"status_code": {"gte": 500}}},
            ]),
        };
        let size = match kind {
            SignalKind::Error => 100,
            SignalKind::Deployment => 50,
            _ => 20,
        };

        json!({
            "query": {
                "bool": {
                    "must": [
                        {"range": {"@timestamp": {
                            "gte": start.to_rfc3339(),
                            "lte": end.to_rfc3339(),
                        }}},
                        {"bool": {"should": should, "minimum_should_match": 1}},
                    ]
                }
            },
            "sort": [{"@timestamp": {"order": "asc"}}],
            "size": size,
        })
    }

    async fn search(
        &self,
        kind: SignalKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
        if !self.kinds.contains(&kind) {
            return Ok(Vec::new());
        }

        let body = Self::query_for(kind, start, end);
        debug!(source = %self.name, kind = %kind, "Querying Elasticsearch");

        let mut request = self.client.post(self.search_url()).json(&body);
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_ref());
        }

        let response = request.send().await.map_err(|e| ConnectorError::Request {
            source_name: self.name.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            warn!(source = %self.name, status = status.as_u16(), "Elasticsearch returned error");
            return Err(ConnectorError::Request {
                source_name: self.name.clone(),
                reason: format!("HTTP {}: {}", status.as_u16(), truncate(&text, 200)),
            });
        }

        let payload: Value = response.json().await.map_err(|e| ConnectorError::InvalidPayload {
            source_name: self.name.clone(),
            reason: e.to_string(),
        })?;

        parse_hits(&self.name, kind, &payload)
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

fn str_at<'a>(source: &'a Value, pointer: &str) -> Option<&'a str> {
    source.pointer(pointer).and_then(Value::as_str)
}

fn service_of(source: &Value) -> String {
    str_at(source, "/kubernetes/labels/app")
        .or_else(|| str_at(source, "/service/name"))
        .or_else(|| str_at(source, "/service"))
        .or_else(|| str_at(source, "/instance"))
        .unwrap_or("unknown")
        .to_string()
}

fn copy_meta(signal: &mut MonitoringSignal, source: &Value, pairs: &[(&str, &str)]) {
    for (key, pointer) in pairs {
        if let Some(v) = str_at(source, pointer) {
            signal.metadata.insert((*key).into(), Value::String(v.to_string()));
        }
    }
}

const SHARED_ATTRIBUTES: &[(&str, &str)] = &[
    ("environment", "/kubernetes/namespace"),
    ("host", "/host/name"),
    ("region", "/cloud/region"),
];

/// Map a `_search` response into signals of `kind`.
pub fn parse_hits(
    source_name: &str,
    kind: SignalKind,
    payload: &Value,
) -> Result<Vec<MonitoringSignal>, ConnectorError> {
    let hits = payload
        .pointer("/hits/hits")
        .and_then(Value::as_array)
        .ok_or_else(|| ConnectorError::InvalidPayload {
            source_name: source_name.to_string(),
            reason: "missing hits.hits".into(),
        })?;

    let mut signals = Vec::new();
    // (service, error type) → (first seen, count, sample message, source doc)
    let mut spikes: BTreeMap<(String, String), (DateTime<Utc>, u64, String, Value)> =
        BTreeMap::new();

    for hit in hits {
        let source = hit.get("_source").cloned().unwrap_or(Value::Null);
        let Some(ts) = str_at(&source, "/@timestamp")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|d| d.with_timezone(&Utc))
        else {
            debug!(source = %source_name, "Skipping hit without a parseable @timestamp");
            continue;
        };
        let service = service_of(&source);
        let message = str_at(&source, "/message").unwrap_or("").to_string();
        let hit_id = hit.get("_id").and_then(Value::as_str);

        match kind {
            SignalKind::Error => {
                let error_type = str_at(&source, "/error/type")
                    .unwrap_or("UnknownError")
                    .to_string();
                let entry = spikes
                    .entry((service, error_type))
                    .or_insert((ts, 0, message.clone(), source.clone()));
                entry.0 = entry.0.min(ts);
                entry.1 += 1;
            }
            SignalKind::Deployment => {
                let version = str_at(&source, "/kubernetes/labels/version").unwrap_or("unknown");
                let mut signal = MonitoringSignal::new(source_name, kind, &service, ts)
                    .with_summary(format!("{service} {version} deployed"))
                    .with_meta("version", version);
                if let Some(author) = str_at(&source, "/kubernetes/labels/deployed_by") {
                    signal = signal.with_meta("author", author);
                }
                if message.to_lowercase().contains("error") {
                    signal = signal
                        .with_meta("status", "failed")
                        .with_severity(Severity::Medium);
                }
                copy_meta(&mut signal, &source, SHARED_ATTRIBUTES);
                if let Some(id) = hit_id {
                    signal = signal.with_id(id);
                }
                signals.push(signal);
            }
            SignalKind::Alert => {
                let name = str_at(&source, "/alertname").unwrap_or(&message).to_string();
                let status = str_at(&source, "/status").unwrap_or("unknown");
                let mut signal = MonitoringSignal::new(source_name, kind, &service, ts)
                    .with_severity(Severity::parse_lenient(status))
                    .with_summary(format!("{name} ({})", status.to_uppercase()))
                    .with_meta("alert", name);
                copy_meta(&mut signal, &source, SHARED_ATTRIBUTES);
                if let Some(id) = hit_id {
                    signal = signal.with_id(id);
                }
                signals.push(signal);
            }
            SignalKind::Anomaly => {
                let response_time = source.get("response_time").and_then(Value::as_f64);
                let severity = match response_time {
                    Some(ms) if ms > 1000.0 => Severity::High,
                    _ => Severity::Medium,
                };
                let summary = match response_time {
                    Some(ms) => format!("response_time {ms}ms"),
                    None => message.clone(),
                };
                let mut signal = MonitoringSignal::new(source_name, kind, &service, ts)
                    .with_severity(severity)
                    .with_summary(summary);
                if let Some(ms) = response_time {
                    signal = signal.with_meta("response_time", ms);
                }
                copy_meta(&mut signal, &source, SHARED_ATTRIBUTES);
                if let Some(id) = hit_id {
                    signal = signal.with_id(id);
                }
                signals.push(signal);
            }
        }
    }

    for ((service, error_type), (first_seen, count, sample, source)) in spikes {
        let severity = if count >= 10 {
            Severity::High
        } else {
            Severity::Medium
        };
        let mut signal = MonitoringSignal::new(source_name, SignalKind::Error, &service, first_seen)
            .with_id(format!("error-{service}-{error_type}"))
            .with_severity(severity)
            .with_summary(format!("{error_type} x{count}"))
            .with_meta("error_type", error_type)
            .with_meta("count", count)
            .with_meta("sample_message", sample);
        copy_meta(&mut signal, &source, SHARED_ATTRIBUTES);
        signals.push(signal);
    }

    signals.sort_by_key(|s| s.timestamp);
    Ok(signals)
}

#[async_trait]
impl Connector for ElasticsearchConnector {
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
        self.search(SignalKind::Deployment, start, end).await
    }

    async fn fetch_alerts(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
        self.search(SignalKind::Alert, start, end).await
    }

    async fn fetch_anomalies(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
        self.search(SignalKind::Anomaly, start, end).await
    }

    async fn fetch_errors(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MonitoringSignal>, ConnectorError> {
        self.search(SignalKind::Error, start, end).await
    }

    async fn health_check(&self) -> bool {
        let mut request = self.client.get(format!("{}/_cluster/health", self.base_url));
        if let Some(user) = &self.username {
            request = request.basic_auth(user, self.password.as_ref());
        }
        match request.send().await {
            Ok(r) => r.status().is_success(),
            Err(e) => {
                warn!(source = %self.name, error = %e, "Health check failed");
                false
            }
        }
    }
}
