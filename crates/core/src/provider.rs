//! Provider trait: the abstraction over LLM backends.
//!
//! A Provider takes an already-assembled incident prompt and returns generated
//! text. It knows nothing about fail-over, priorities or budgets; those live
//! in the router.
//!
//! Implementations: OpenAI-compatible, Azure OpenAI, Anthropic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversation::{Role, Turn};
use crate::error::ProviderError;
use crate::token::TokenEstimator;

/// Which wire protocol a configured provider speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    OpenAiCompatible,
    AzureOpenAi,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OpenAiCompatible => "open_ai_compatible",
            Self::AzureOpenAi => "azure_open_ai",
            Self::Anthropic => "anthropic",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A prompt split into droppable sections.
///
/// `system` and `query` are never dropped. `signal_lines` and `history` are
/// ordered oldest first so fitting can drop from the front.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,

    /// Correlation analysis lines, best first
    #[serde(default)]
    pub correlation_lines: Vec<String>,

    /// Rendered signal lines, oldest first
    #[serde(default)]
    pub signal_lines: Vec<String>,

    /// Prior turns, oldest first
    #[serde(default)]
    pub history: Vec<Turn>,

    pub query: String,
}

/// A chat message on the wire: role plus content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl Prompt {
    /// The system message: instructions followed by the monitoring data block.
    pub fn system_text(&self) -> String {
        let mut out = self.system.clone();
        if !self.signal_lines.is_empty() {
            out.push_str("\n\nMONITORING DATA:\n");
            out.push_str(&self.signal_lines.join("\n"));
        }
        if !self.correlation_lines.is_empty() {
            out.push_str("\n\nCORRELATION ANALYSIS:\n");
            out.push_str(&self.correlation_lines.join("\n"));
        }
        out
    }

    /// History and query as alternating chat messages (system excluded).
    pub fn conversation(&self) -> Vec<ChatMessage> {
        let mut messages: Vec<ChatMessage> = self
            .history
            .iter()
            .map(|t| ChatMessage {
                role: match t.role {
                    Role::User => "user".into(),
                    Role::Assistant => "assistant".into(),
                },
                content: t.content.clone(),
            })
            .collect();
        messages.push(ChatMessage {
            role: "user".into(),
            content: self.query.clone(),
        });
        messages
    }

    pub fn estimate_tokens(&self, est: &TokenEstimator) -> usize {
        est.text(&self.system_text())
            + est.per_turn_overhead
            + est.turns(&self.history)
            + est.text(&self.query)
            + est.per_turn_overhead
    }

    /// Drop oldest history, then oldest signals, then weakest correlations
    /// until the estimate fits `limit`. Returns the number of items dropped.
    pub fn fit_to(&mut self, limit: usize, est: &TokenEstimator) -> usize {
        let mut dropped = 0;
        while self.estimate_tokens(est) > limit {
            if !self.history.is_empty() {
                self.history.remove(0);
            } else if !self.signal_lines.is_empty() {
                self.signal_lines.remove(0);
            } else if !self.correlation_lines.is_empty() {
                self.correlation_lines.pop();
            } else {
                break;
            }
            dropped += 1;
        }
        dropped
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    pub text: String,

    /// Which model actually responded
    pub model: String,

    pub usage: Option<Usage>,
}

/// The core Provider trait.
///
/// The router calls `generate()` without knowing which vendor is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "azure-primary", "anthropic").
    fn name(&self) -> &str;

    /// Send the prompt and get a complete response.
    async fn generate(
        &self,
        prompt: &Prompt,
        max_tokens: u32,
    ) -> std::result::Result<ProviderResponse, ProviderError>;

    /// Health check: can we reach the provider?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt() -> Prompt {
        Prompt {
            system: "You are an incident analyst.".into(),
            correlation_lines: vec!["user-service deploy -> errors (0.82)".into()],
            signal_lines: vec![
                "[deployment] user-service v1.8.1".into(),
                "[error] user-service DatabaseConnectionError x12".into(),
            ],
            history: vec![
                Turn::user("what changed"),
                Turn::assistant("two deployments in the last four hours"),
            ],
            query: "why are we seeing errors".into(),
        }
    }

    #[test]
    fn conversation_ends_with_query() {
        let msgs = prompt().conversation();
        assert_eq!(msgs.len(), 3);
        assert_eq!(msgs[0].role, "user");
        assert_eq!(msgs[1].role, "assistant");
        assert_eq!(msgs[2].content, "why are we seeing errors");
    }

    #[test]
    fn system_text_includes_data_sections() {
        let text = prompt().system_text();
        assert!(text.contains("MONITORING DATA"));
        assert!(text.contains("CORRELATION ANALYSIS"));
        assert!(text.contains("v1.8.1"));
    }

    #[test]
    fn fit_drops_history_before_signals() {
        let est = TokenEstimator::default();
        let mut p = prompt();
        let full = p.estimate_tokens(&est);
        let history_cost = est.turn(&p.history[0]);

        let dropped = p.fit_to(full - history_cost, &est);
        assert_eq!(dropped, 1);
        assert_eq!(p.history.len(), 1);
        assert_eq!(p.signal_lines.len(), 2);
    }

    #[test]
    fn fit_never_drops_query() {
        let est = TokenEstimator::default();
        let mut p = prompt();
        p.fit_to(0, &est);
        assert!(p.history.is_empty());
        assert!(p.signal_lines.is_empty());
        assert!(p.correlation_lines.is_empty());
        assert_eq!(p.query, "why are we seeing errors");
    }

    #[test]
    fn provider_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ProviderKind::AzureOpenAi).unwrap();
        assert_eq!(json, "\"azure_open_ai\"");
    }
}
