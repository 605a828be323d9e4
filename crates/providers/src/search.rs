//! Web search backed by a search-grounded chat model.
//!
//! Models such as Perplexity's `sonar` family (reachable through
//! OpenRouter) answer with text plus a `citations` list. That pair maps
//! directly onto [`WebSearchResult`].

use async_trait::async_trait;
use lorekeep_core::error::ProviderError;
use lorekeep_core::message::Message;
use lorekeep_core::provider::{Provider, ProviderRequest};
use lorekeep_core::search::{WebSearch, WebSearchResult};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_SEARCH_MODEL: &str = "perplexity/sonar";

pub struct ModelWebSearch {
    provider: Arc<dyn Provider>,
    model: String,
}

impl ModelWebSearch {
    pub fn new(provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
        }
    }
}

#[async_trait]
impl WebSearch for ModelWebSearch {
    fn name(&self) -> &str {
        &self.model
    }

    async fn search(&self, query: &str, context: Option<&str>) -> Result<WebSearchResult, ProviderError> {
        let mut system = String::from(
            "Search the web and answer factually in a few sentences. Say so plainly when sources disagree.",
        );
        if let Some(context) = context {
            system.push_str(&format!(" The question is about: {context}."));
        }

        let response = self
            .provider
            .complete(ProviderRequest {
                model: self.model.clone(),
                messages: vec![Message::system(system), Message::user(query)],
                temperature: 0.0,
                max_tokens: Some(512),
                response_schema: None,
            })
            .await?;

        let source_urls: Vec<String> = response
            .metadata
            .get("citations")
            .and_then(|v| v.as_array())
            .map(|urls| urls.iter().filter_map(|u| u.as_str().map(String::from)).collect())
            .unwrap_or_default();

        debug!(model = %self.model, sources = source_urls.len(), "Web search answered");
        Ok(WebSearchResult {
            content: response.message.content,
            source_urls,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::provider::ProviderResponse;
    use std::sync::Mutex;

    struct CitingProvider {
        seen: Mutex<Vec<ProviderRequest>>,
    }

    #[async_trait]
    impl Provider for CitingProvider {
        fn name(&self) -> &str {
            "citing"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
            self.seen.lock().unwrap().push(request);
            let mut metadata = serde_json::Map::new();
            metadata.insert("citations".into(), serde_json::json!(["https://example.org/a"]));
            Ok(ProviderResponse {
                message: Message::assistant("The church dates from 1732."),
                usage: None,
                model: "sonar".into(),
                metadata,
            })
        }
    }

    #[tokio::test]
    async fn maps_citations_to_source_urls() {
        let provider = Arc::new(CitingProvider { seen: Mutex::new(Vec::new()) });
        let search = ModelWebSearch::new(provider.clone(), DEFAULT_SEARCH_MODEL);

        let result = search.search("When was the old church built?", Some("History")).await.unwrap();

        assert_eq!(result.content, "The church dates from 1732.");
        assert_eq!(result.source_urls, vec!["https://example.org/a"]);
        let seen = provider.seen.lock().unwrap();
        assert!(seen[0].system_prompt().unwrap().contains("History"));
        assert!(seen[0].response_schema.is_none());
    }
}
