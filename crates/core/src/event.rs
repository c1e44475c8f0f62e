//! Domain event system: decoupled communication between bounded contexts.
//!
//! Events are published when something interesting happens in a request.
//! Other components (CLI status output, tests) subscribe without tight coupling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

/// All domain events in the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DomainEvent {
    /// The classifier routed a query
    QueryClassified {
        session: String,
        classification: String,
        timestamp: DateTime<Utc>,
    },

    /// A monitoring fetch failed or timed out
    ConnectorDegraded {
        source: String,
        kind: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A provider attempt failed; the router moves on
    ProviderFailed {
        provider: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A provider produced the answer
    ProviderSucceeded {
        provider: String,
        model: String,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Every provider in the chain failed
    AllProvidersUnavailable {
        attempts: usize,
        timestamp: DateTime<Utc>,
    },

    /// A user/assistant exchange was written to memory
    TurnPersisted {
        session: String,
        turns: usize,
        timestamp: DateTime<Utc>,
    },
}

/// A broadcast-based event bus for domain events.
///
/// Uses `tokio::sync::broadcast` for multi-consumer pub/sub.
pub struct EventBus {
    sender: broadcast::Sender<Arc<DomainEvent>>,
}

impl EventBus {
    /// Create a new event bus with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: DomainEvent) {
        // No subscribers is fine
        let _ = self.sender.send(Arc::new(event));
    }

    /// Subscribe to receive events.
    pub fn subscribe(&self) -> broadcast::Receiver<Arc<DomainEvent>> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
