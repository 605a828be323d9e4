//! LLM provider implementations for lorekeep.
//!
//! All providers implement the `lorekeep_core::Provider` trait.
//! The router builds them from configuration and wraps each one in
//! [`RetryingProvider`] so transient failures are absorbed here.

pub mod embedder;
pub mod openai_compat;
pub mod retry;
pub mod router;
pub mod search;

pub use embedder::ProviderEmbedder;
pub use openai_compat::OpenAiCompatProvider;
pub use retry::{RetryPolicy, RetryingProvider};
pub use router::{ProviderRouter, build_from_config};
pub use search::{DEFAULT_SEARCH_MODEL, ModelWebSearch};
