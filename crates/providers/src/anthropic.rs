//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sitrep_core::error::ProviderError;
use sitrep_core::provider::{Prompt, Provider, ProviderResponse, Usage};
use tracing::debug;

use crate::http::{check_status, require_text, send_error};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(name: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.3,
            client: reqwest::Client::new(),
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn body(&self, prompt: &Prompt, max_tokens: u32) -> serde_json::Value {
        let messages: Vec<AnthropicMessage> = prompt
            .conversation()
            .into_iter()
            .map(|m| AnthropicMessage {
                role: m.role,
                content: m.content,
            })
            .collect();

        serde_json::json!({
            "model": self.model,
            "system": prompt.system_text(),
            "messages": messages,
            "max_tokens": max_tokens,
            "temperature": self.temperature,
        })
    }

    fn response_to_provider_response(
        &self,
        resp: AnthropicResponse,
    ) -> Result<ProviderResponse, ProviderError> {
        let text: String = resp
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");
        let text = require_text(&self.name, Some(text))?;

        let usage = resp.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens + u.output_tokens,
        });

        Ok(ProviderResponse {
            text,
            model: resp.model.unwrap_or_else(|| self.model.clone()),
            usage,
        })
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        max_tokens: u32,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);
        debug!(provider = %self.name, model = %self.model, "Sending completion request");

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
            .json(&self.body(prompt, max_tokens))
            .send()
            .await
            .map_err(|e| send_error(&self.name, e))?;
        let response = check_status(&self.name, response).await?;

        let api_resp: AnthropicResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("{}: {e}", self.name)))?;

        self.response_to_provider_response(api_resp)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(!self.api_key.is_empty())
    }
}

// --- Anthropic API wire types ---

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text {
        text: String,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}
