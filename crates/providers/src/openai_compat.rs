//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI, OpenRouter, Ollama, vLLM and any endpoint exposing
//! `/chat/completions`, plus Azure OpenAI, which speaks the same body with a
//! different URL shape and `api-key` header auth.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sitrep_core::error::ProviderError;
use sitrep_core::provider::{ChatMessage, Prompt, Provider, ProviderResponse, Usage};
use tracing::debug;

use crate::http::{check_status, require_text, send_error};

pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-15-preview";

/// How the endpoint wants the key and the model.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Flavor {
    /// `POST {base}/chat/completions`, bearer auth, model in body
    Standard,
    /// `POST {endpoint}/openai/deployments/{deployment}/chat/completions?api-version=`,
    /// `api-key` header, model is the deployment
    Azure { api_version: String },
}

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    flavor: Flavor,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: model.into(),
            temperature: 0.3,
            flavor: Flavor::Standard,
            client: reqwest::Client::new(),
        }
    }

    /// Create an Azure OpenAI provider. `deployment` is the Azure deployment name.
    pub fn azure(
        name: impl Into<String>,
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        deployment: impl Into<String>,
        api_version: Option<String>,
    ) -> Self {
        let mut p = Self::new(name, endpoint, api_key, deployment);
        p.flavor = Flavor::Azure {
            api_version: api_version.unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.into()),
        };
        p
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    fn url(&self) -> String {
        match &self.flavor {
            Flavor::Standard => format!("{}/chat/completions", self.base_url),
            Flavor::Azure { api_version } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                self.base_url, self.model, api_version
            ),
        }
    }

    /// System message first, then history and the query.
    fn to_api_messages(prompt: &Prompt) -> Vec<ChatMessage> {
        let mut messages = vec![ChatMessage {
            role: "system".into(),
            content: prompt.system_text(),
        }];
        messages.extend(prompt.conversation());
        messages
    }

    fn body(&self, prompt: &Prompt, max_tokens: u32) -> serde_json::Value {
        let mut body = serde_json::json!({
            "messages": Self::to_api_messages(prompt),
            "temperature": self.temperature,
            "max_tokens": max_tokens,
            "stream": false,
        });
        if self.flavor == Flavor::Standard {
            body["model"] = serde_json::json!(self.model);
        }
        body
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        prompt: &Prompt,
        max_tokens: u32,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        debug!(provider = %self.name, model = %self.model, "Sending completion request");

        let mut request = self
            .client
            .post(self.url())
            .header("Content-Type", "application/json")
            .json(&self.body(prompt, max_tokens));
        request = match self.flavor {
            Flavor::Standard => request.header("Authorization", format!("Bearer {}", self.api_key)),
            Flavor::Azure { .. } => request.header("api-key", &self.api_key),
        };

        let response = request.send().await.map_err(|e| send_error(&self.name, e))?;
        let response = check_status(&self.name, response).await?;

        let api_response: ApiResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::MalformedResponse(format!("{}: {e}", self.name)))?;

        parse_response(&self.name, &self.model, api_response)
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        if self.api_key.is_empty() {
            return Ok(false);
        }
        if let Flavor::Azure { .. } = self.flavor {
            // Azure has no cheap unauthenticated listing; a key is the best signal.
            return Ok(true);
        }
        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await
            .map_err(|e| send_error(&self.name, e))?;
        Ok(response.status().is_success())
    }
}

fn parse_response(
    provider: &str,
    requested_model: &str,
    api_response: ApiResponse,
) -> Result<ProviderResponse, ProviderError> {
    let text = api_response
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content);
    let text = require_text(provider, text)?;

    let usage = api_response.usage.map(|u| Usage {
        prompt_tokens: u.prompt_tokens,
        completion_tokens: u.completion_tokens,
        total_tokens: u.total_tokens,
    });

    Ok(ProviderResponse {
        text,
        model: api_response
            .model
            .unwrap_or_else(|| requested_model.to_string()),
        usage,
    })
}

// --- OpenAI API wire types ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<ApiChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use sitrep_core::Turn;

    fn prompt() -> Prompt {
        Prompt {
            system: "You are an incident analyst.".into(),
            signal_lines: vec!["[error] api TimeoutError x47".into()],
            history: vec![Turn::user("what changed"), Turn::assistant("two deploys")],
            query: "why".into(),
            ..Prompt::default()
        }
    }

    #[test]
    fn standard_url_and_body() {
        let p = OpenAiCompatProvider::new("openai", "https://api.openai.com/v1/", "sk", "gpt-4o");
        assert_eq!(p.url(), "https://api.openai.com/v1/chat/completions");
        let body = p.body(&prompt(), 500);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 500);
        let messages = body["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[0]["role"], "system");
        assert!(messages[0]["content"].as_str().unwrap().contains("TimeoutError"));
        assert_eq!(messages[3]["content"], "why");
    }

    #[test]
    fn azure_url_uses_deployment_and_version() {
        let p = OpenAiCompatProvider::azure(
            "azure",
            "https://acme.openai.azure.com",
            "key",
            "gpt4-incidents",
            None,
        );
        assert_eq!(
            p.url(),
            "https://acme.openai.azure.com/openai/deployments/gpt4-incidents/chat/completions?api-version=2024-02-15-preview"
        );
        assert!(p.body(&prompt(), 100).get("model").is_none());
    }

    #[test]
    fn parse_valid_response() {
        let json = r#"{
            "model": "gpt-4o-2024",
            "choices": [{"message": {"role": "assistant", "content": "Roll back v1.8.1"}}],
            "usage": {"prompt_tokens": 120, "completion_tokens": 8, "total_tokens": 128}
        }"#;
        let api: ApiResponse = serde_json::from_str(json).unwrap();
        let r = parse_response("openai", "gpt-4o", api).unwrap();
        assert_eq!(r.text, "Roll back v1.8.1");
        assert_eq!(r.model, "gpt-4o-2024");
        assert_eq!(r.usage.unwrap().total_tokens, 128);
    }

    #[test]
    fn empty_choices_is_malformed() {
        let api: ApiResponse = serde_json::from_str(r#"{"choices": []}"#).unwrap();
        let err = parse_response("openai", "gpt-4o", api).unwrap_err();
        assert_eq!(err.kind(), "malformed_response");
    }

    #[tokio::test]
    async fn health_check_without_key_is_unhealthy() {
        let p = OpenAiCompatProvider::new("local", "http://127.0.0.1:9", "", "m");
        assert!(!p.health_check().await.unwrap());
    }
}
