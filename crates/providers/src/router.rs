//! Provider router: builds providers from config and hands out the right one.
//!
//! Every registered provider is already wrapped in [`RetryingProvider`], so
//! pipeline stages see a single attempt that either succeeds or fails for good.

use crate::embedder::ProviderEmbedder;
use crate::openai_compat::OpenAiCompatProvider;
use crate::retry::{RetryPolicy, RetryingProvider};
use lorekeep_core::provider::{EmbeddingClient, Provider};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Routes LLM requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        self.providers.keys().map(|s| s.as_str()).collect()
    }

    /// The embedding client described by `config.embedding`, if enabled.
    ///
    /// Uses the named embedding provider, falling back to the default one.
    pub fn embedder(
        &self,
        config: &lorekeep_config::AppConfig,
    ) -> Option<Arc<dyn EmbeddingClient>> {
        if !config.embedding.enabled {
            debug!("Embeddings disabled by config");
            return None;
        }
        let provider = match &config.embedding.provider {
            Some(name) => self.get(name),
            None => self.default(),
        }?;
        Some(Arc::new(
            ProviderEmbedder::new(provider, &config.embedding.model)
                .with_dimensions(config.embedding.dimensions),
        ))
    }
}

/// Build providers from configuration.
pub fn build_from_config(config: &lorekeep_config::AppConfig) -> ProviderRouter {
    let mut router = ProviderRouter::new(&config.default_provider);
    let policy = RetryPolicy::from_config(&config.retry);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let base_url = provider_config
            .api_url
            .clone()
            .unwrap_or_else(|| default_base_url(name));

        router.register(name.clone(), wrap(name, &base_url, &api_key, &policy));
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() {
        let api_key = config.api_key.clone().unwrap_or_default();
        let base_url = default_base_url(&config.default_provider);
        router.register(
            config.default_provider.clone(),
            wrap(&config.default_provider, &base_url, &api_key, &policy),
        );
    }

    info!(
        default = %config.default_provider,
        providers = router.providers.len(),
        max_attempts = policy.max_attempts,
        "Providers ready"
    );
    router
}

fn wrap(name: &str, base_url: &str, api_key: &str, policy: &RetryPolicy) -> Arc<dyn Provider> {
    let inner: Arc<dyn Provider> = Arc::new(OpenAiCompatProvider::new(name, base_url, api_key));
    Arc::new(RetryingProvider::new(inner, policy.clone()))
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "openai" => "https://api.openai.com/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "together" => "https://api.together.xyz/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
