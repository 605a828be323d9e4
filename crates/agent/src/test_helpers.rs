//! Shared test helpers for stage and pipeline tests.

use async_trait::async_trait;
use lorekeep_core::error::ProviderError;
use lorekeep_core::message::Message;
use lorekeep_core::provider::{EmbeddingClient, Provider, ProviderRequest, ProviderResponse, Usage};
use lorekeep_core::schema::{Category, DomainSchema};
use std::sync::Mutex;

/// A mock provider that returns scripted replies in order and records
/// every request it receives.
///
/// Panics if more calls are made than replies provided.
pub struct ScriptedProvider {
    replies: Mutex<Vec<Result<String, ProviderError>>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<&str>) -> Self {
        Self::from_results(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn from_results(replies: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn request(&self, index: usize) -> ProviderRequest {
        self.requests.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let mut replies = self.replies.lock().unwrap();
        if replies.is_empty() {
            panic!("ScriptedProvider: no more replies (call #{call})");
        }
        let text = replies.remove(0)?;
        Ok(ProviderResponse {
            message: Message::assistant(text),
            usage: Some(Usage {
                prompt_tokens: 10,
                completion_tokens: 5,
                total_tokens: 15,
            }),
            model: "mock-model".into(),
            metadata: serde_json::Map::new(),
        })
    }
}

/// Embeds every text to the same vector, or fails when `vector` is `None`.
pub struct FixedEmbedder {
    pub vector: Option<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for FixedEmbedder {
    fn model(&self) -> &str {
        "fixed-embedder"
    }

    async fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        match &self.vector {
            Some(v) => Ok(texts.iter().map(|_| v.clone()).collect()),
            None => Err(ProviderError::Network("embedding backend down".into())),
        }
    }
}

/// A domain with one `history` category requiring `period` and `sources`.
pub fn heritage_domain() -> DomainSchema {
    DomainSchema::new(
        "heritage",
        vec![
            Category::new("history", "History")
                .with_description("Local history and buildings")
                .with_required(&["period", "sources"])
                .with_optional(&["architect"]),
            Category::new("crafts", "Crafts").with_required(&["technique"]),
        ],
    )
}
