//! LLM provider implementations for sitrep.
//!
//! All providers implement the `sitrep_core::Provider` trait.
//! The router walks them in priority order until one answers.

pub mod anthropic;
mod http;
pub mod openai_compat;
pub mod prompt;
pub mod router;

pub use anthropic::AnthropicProvider;
pub use openai_compat::OpenAiCompatProvider;
pub use router::{
    AllProvidersUnavailable, Generation, ProviderEntry, ProviderFailure, ProviderRouter,
    build_from_config,
};
