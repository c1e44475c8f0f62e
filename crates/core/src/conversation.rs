//! Conversation domain types: sessions and turns.
//!
//! A session is an append-only, timestamp-ordered log of turns. Sessions are
//! owned by the conversation memory; everything else sees snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata key that marks the synthetic "history truncated" turn.
pub const TRUNCATION_MARKER_KEY: &str = "history_truncated";

/// Unique identifier for a conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A single turn in a conversation. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub id: String,

    pub role: Role,

    pub content: String,

    pub timestamp: DateTime<Utc>,

    /// The incident context snapshot this turn was produced from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,

    /// Optional metadata (provider, tokens used, analysis kind)
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Turn {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            context_id: None,
            metadata: serde_json::Map::new(),
        }
    }

    /// Create a new user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    /// Create a new assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    /// The synthetic marker prepended to a truncated history excerpt.
    pub fn truncation_marker(dropped: usize) -> Self {
        let mut turn = Self::with_role(
            Role::Assistant,
            format!("[history truncated: {dropped} earlier turn(s) omitted]"),
        );
        turn.metadata
            .insert(TRUNCATION_MARKER_KEY.into(), serde_json::json!(dropped));
        turn
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_truncation_marker(&self) -> bool {
        self.metadata.contains_key(TRUNCATION_MARKER_KEY)
    }
}

/// An ordered sequence of turns with shared identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    pub id: SessionId,

    pub created_at: DateTime<Utc>,

    /// Ordered turns, strictly increasing timestamps
    pub turns: Vec<Turn>,
}

impl ConversationSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            created_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    pub fn last_timestamp(&self) -> Option<DateTime<Utc>> {
        self.turns.last().map(|t| t.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_user_turn() {
        let turn = Turn::user("what changed?");
        assert_eq!(turn.role, Role::User);
        assert_eq!(turn.content, "what changed?");
        assert!(turn.context_id.is_none());
        assert!(!turn.is_truncation_marker());
    }

    #[test]
    fn truncation_marker_is_flagged() {
        let marker = Turn::truncation_marker(7);
        assert!(marker.is_truncation_marker());
        assert!(marker.content.contains('7'));
    }

    #[test]
    fn turn_serialization_roundtrip() {
        let turn = Turn::assistant("deploy correlated").with_context("ctx-1");
        let json = serde_json::to_string(&turn).unwrap();
        let back: Turn = serde_json::from_str(&json).unwrap();
        assert_eq!(back.content, "deploy correlated");
        assert_eq!(back.role, Role::Assistant);
        assert_eq!(back.context_id.as_deref(), Some("ctx-1"));
    }

    #[test]
    fn new_session_is_empty() {
        let session = ConversationSession::new(SessionId::from("s1"));
        assert!(session.turns.is_empty());
        assert!(session.last_timestamp().is_none());
        assert_eq!(session.id.to_string(), "s1");
    }
}
