//! In-memory web-search cache keyed by normalized query.

use async_trait::async_trait;
use lorekeep_core::error::StoreError;
use lorekeep_core::search::{CachedSearch, normalize_query};
use lorekeep_core::store::SearchCacheRepository;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Stores hits regardless of age; callers judge freshness with
/// [`CachedSearch::is_fresh`].
pub struct InMemorySearchCache {
    hits: Arc<RwLock<HashMap<String, CachedSearch>>>,
}

impl InMemorySearchCache {
    pub fn new() -> Self {
        Self {
            hits: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemorySearchCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SearchCacheRepository for InMemorySearchCache {
    async fn get(&self, query_key: &str) -> Result<Option<CachedSearch>, StoreError> {
        Ok(self.hits.read().await.get(&normalize_query(query_key)).cloned())
    }

    async fn put(&self, mut cached: CachedSearch) -> Result<(), StoreError> {
        cached.query_key = normalize_query(&cached.query_key);
        self.hits.write().await.insert(cached.query_key.clone(), cached);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lorekeep_core::search::WebSearchResult;

    #[tokio::test]
    async fn lookup_is_case_and_whitespace_insensitive() {
        let cache = InMemorySearchCache::new();
        cache
            .put(CachedSearch {
                query_key: "  Church Built 1732 ".into(),
                result: WebSearchResult { content: "yes".into(), source_urls: vec![] },
                cached_at: Utc::now(),
            })
            .await
            .unwrap();

        let hit = cache.get("church built 1732").await.unwrap().unwrap();
        assert_eq!(hit.result.content, "yes");
        assert_eq!(hit.query_key, "church built 1732");
    }
}
