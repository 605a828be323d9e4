//! Embedding client backed by a provider's `/embeddings` endpoint.

use async_trait::async_trait;
use lorekeep_core::error::ProviderError;
use lorekeep_core::provider::{EmbeddingClient, EmbeddingRequest, Provider};
use std::sync::Arc;
use tracing::debug;

/// Adapts any [`Provider`] with embedding support to [`EmbeddingClient`].
///
/// When `dimensions` is set it is sent with every request and every returned
/// vector is checked against it, so one client never mixes vector sizes.
pub struct ProviderEmbedder {
    provider: Arc<dyn Provider>,
    model: String,
    dimensions: Option<usize>,
}

impl ProviderEmbedder {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            dimensions: None,
        }
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = Some(dimensions);
        self
    }
}

#[async_trait]
impl EmbeddingClient for ProviderEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate_embeddings(
        &self,
        texts: &[String],
    ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .provider
            .embed(EmbeddingRequest {
                model: self.model.clone(),
                inputs: texts.to_vec(),
                dimensions: self.dimensions,
            })
            .await?;

        if response.embeddings.len() != texts.len() {
            return Err(ProviderError::Embedding(format!(
                "expected {} vectors, got {}",
                texts.len(),
                response.embeddings.len()
            )));
        }

        let expected = self
            .dimensions
            .or_else(|| response.embeddings.first().map(Vec::len))
            .unwrap_or(0);
        if let Some(bad) = response.embeddings.iter().find(|v| v.len() != expected) {
            return Err(ProviderError::Embedding(format!(
                "dimension mismatch: expected {expected}, got {}",
                bad.len()
            )));
        }

        debug!(model = %self.model, count = texts.len(), dimensions = expected, "Embedded texts");
        Ok(response.embeddings)
    }
}
