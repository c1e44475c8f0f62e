//! Conversation memory for sitrep.

pub mod conversation;

pub use conversation::{ConversationMemory, MemoryLimits};
