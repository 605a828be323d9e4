//! Web search capability used to check enrichment claims.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::ProviderError;

/// What a web search returned for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebSearchResult {
    /// Synthesized answer text
    pub content: String,

    /// Pages the answer was drawn from
    #[serde(default)]
    pub source_urls: Vec<String>,
}

/// A cached search result, keyed by its normalized query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSearch {
    pub query_key: String,
    pub result: WebSearchResult,
    pub cached_at: DateTime<Utc>,
}

impl CachedSearch {
    /// A hit older than `ttl` counts as a miss.
    pub fn is_fresh(&self, ttl: chrono::Duration, now: DateTime<Utc>) -> bool {
        now - self.cached_at < ttl
    }
}

/// Normalize a query into a cache key: trimmed and lower-cased.
pub fn normalize_query(query: &str) -> String {
    query.trim().to_lowercase()
}

#[async_trait]
pub trait WebSearch: Send + Sync {
    fn name(&self) -> &str;

    /// Run a search; `context` narrows it (e.g. the entry's category label).
    async fn search(
        &self,
        query: &str,
        context: Option<&str>,
    ) -> std::result::Result<WebSearchResult, ProviderError>;
}
