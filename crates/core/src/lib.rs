//! # sitrep core
//!
//! Domain types, capability traits, and error definitions for the sitrep
//! incident engine. Nothing here does I/O; it defines the model that the
//! connector, provider, memory and engine crates implement against.
//!
//! ## Design
//!
//! Each external capability (monitoring backend, LLM vendor) is a trait here.
//! Implementations live in their own crates, so tests swap in mocks and the
//! dependency graph points inward.

pub mod connector;
pub mod conversation;
pub mod error;
pub mod event;
pub mod incident;
pub mod provider;
pub mod signal;
pub mod token;

// Re-export key types at crate root for ergonomics
pub use connector::Connector;
pub use conversation::{ConversationSession, Role, SessionId, Turn};
pub use error::{ConnectorError, MemoryError, ProviderError};
pub use event::{DomainEvent, EventBus};
pub use incident::{
    ConfidenceLevel, CorrelationResult, DegradedSource, DropInfo, IncidentContext, LayerStats,
    TokenAccounting,
};
pub use provider::{ChatMessage, Prompt, Provider, ProviderKind, ProviderResponse, Usage};
pub use signal::{MonitoringSignal, Severity, SignalKind, SignalRef, TimeWindow};
pub use token::TokenEstimator;
