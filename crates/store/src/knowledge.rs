//! In-memory knowledge entry repository.

use async_trait::async_trait;
use lorekeep_core::error::StoreError;
use lorekeep_core::knowledge::{EntryPatch, EntryStatus, KnowledgeEntry, ScoredEntry};
use lorekeep_core::schema::is_uncategorized;
use lorekeep_core::store::{KnowledgeRepository, SimilarityQuery};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use crate::vector::rank_by_similarity;

/// Knowledge entries keyed by id, with insertion order kept for stable listing.
#[derive(Default)]
struct Entries {
    by_id: HashMap<String, KnowledgeEntry>,
    order: Vec<String>,
}

impl Entries {
    fn iter(&self) -> impl Iterator<Item = &KnowledgeEntry> {
        self.order.iter().filter_map(|id| self.by_id.get(id))
    }

    fn upsert(&mut self, entry: KnowledgeEntry) {
        if !self.by_id.contains_key(&entry.id) {
            self.order.push(entry.id.clone());
        }
        self.by_id.insert(entry.id.clone(), entry);
    }
}

pub struct InMemoryKnowledgeRepository {
    entries: Arc<RwLock<Entries>>,
}

impl InMemoryKnowledgeRepository {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(Entries::default())),
        }
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.by_id.len()
    }
}

impl Default for InMemoryKnowledgeRepository {
    fn default() -> Self {
        Self::new()
    }
}

fn open_uncategorized(entry: &KnowledgeEntry) -> bool {
    is_uncategorized(&entry.category_id) && entry.status != EntryStatus::Migrated
}

#[async_trait]
impl KnowledgeRepository for InMemoryKnowledgeRepository {
    async fn create(&self, entry: KnowledgeEntry) -> Result<KnowledgeEntry, StoreError> {
        let mut entries = self.entries.write().await;
        if entries.by_id.contains_key(&entry.id) {
            return Err(StoreError::Conflict(format!("knowledge entry {} exists", entry.id)));
        }
        entries.upsert(entry.clone());
        debug!(entry_id = %entry.id, category = %entry.category_id, "Created knowledge entry");
        Ok(entry)
    }

    async fn save(&self, entry: KnowledgeEntry) -> Result<KnowledgeEntry, StoreError> {
        self.entries.write().await.upsert(entry.clone());
        Ok(entry)
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<KnowledgeEntry>, StoreError> {
        Ok(self.entries.read().await.by_id.get(id).cloned())
    }

    async fn get_by_session(&self, session_id: &str) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| e.session_id.as_deref() == Some(session_id))
            .cloned()
            .collect())
    }

    async fn get_by_category(
        &self,
        domain_schema_id: &str,
        category_id: &str,
    ) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| {
                e.category_id == category_id
                    && e.domain_schema_id.as_deref() == Some(domain_schema_id)
            })
            .cloned()
            .collect())
    }

    async fn get_uncategorized(&self) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries.iter().filter(|e| open_uncategorized(e)).cloned().collect())
    }

    async fn get_uncategorized_by_domain(
        &self,
        domain_schema_id: &str,
    ) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|e| {
                open_uncategorized(e) && e.domain_schema_id.as_deref() == Some(domain_schema_id)
            })
            .cloned()
            .collect())
    }

    async fn query_by_topic_keywords(
        &self,
        keywords: &[String],
        limit: usize,
    ) -> Result<Vec<KnowledgeEntry>, StoreError> {
        let wanted: Vec<String> = keywords.iter().map(|k| k.trim().to_lowercase()).collect();
        let entries = self.entries.read().await;

        let mut hits: Vec<(usize, &KnowledgeEntry)> = entries
            .iter()
            .filter_map(|e| {
                let overlap = e
                    .topic_keywords
                    .as_ref()?
                    .iter()
                    .filter(|k| wanted.contains(&k.trim().to_lowercase()))
                    .count();
                (overlap > 0).then_some((overlap, e))
            })
            .collect();

        hits.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(hits.into_iter().take(limit).map(|(_, e)| e.clone()).collect())
    }

    async fn search_similar(&self, query: SimilarityQuery) -> Result<Vec<ScoredEntry>, StoreError> {
        let entries = self.entries.read().await;
        let candidates = entries.iter().filter(|e| {
            e.domain_schema_id.as_deref() == Some(query.domain_schema_id.as_str())
                && match (&query.exclude_session_id, &e.session_id) {
                    (Some(excluded), Some(session)) => excluded != session,
                    _ => true,
                }
        });
        Ok(rank_by_similarity(candidates, &query.embedding, query.limit))
    }

    async fn update(&self, id: &str, patch: EntryPatch) -> Result<Option<KnowledgeEntry>, StoreError> {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.by_id.get_mut(id) else {
            return Ok(None);
        };
        patch.apply_to(entry);
        Ok(Some(entry.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::schema::UNCATEGORIZED;

    fn entry(category: &str, session: &str, embedding: Vec<f32>) -> KnowledgeEntry {
        let mut e = KnowledgeEntry::draft(category, format!("{category} entry"), "text");
        e.domain_schema_id = Some("dom-1".into());
        e.session_id = Some(session.into());
        e.embedding = Some(embedding);
        e
    }

    #[tokio::test]
    async fn create_rejects_duplicate_id() {
        let repo = InMemoryKnowledgeRepository::new();
        let e = entry("history", "s1", vec![1.0]);
        repo.create(e.clone()).await.unwrap();
        assert!(matches!(repo.create(e).await, Err(StoreError::Conflict(_))));
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn save_replaces_in_place() {
        let repo = InMemoryKnowledgeRepository::new();
        let mut e = entry("history", "s1", vec![1.0]);
        repo.create(e.clone()).await.unwrap();
        e.title = "Renamed".into();
        repo.save(e.clone()).await.unwrap();
        assert_eq!(repo.get_by_id(&e.id).await.unwrap().unwrap().title, "Renamed");
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn similarity_search_scopes_domain_and_session() {
        let repo = InMemoryKnowledgeRepository::new();
        repo.create(entry("history", "s1", vec![1.0, 0.0])).await.unwrap();
        repo.create(entry("history", "s2", vec![0.9, 0.1])).await.unwrap();
        let mut foreign = entry("history", "s3", vec![1.0, 0.0]);
        foreign.domain_schema_id = Some("dom-2".into());
        repo.create(foreign).await.unwrap();

        let all = repo
            .search_similar(SimilarityQuery {
                domain_schema_id: "dom-1".into(),
                embedding: vec![1.0, 0.0],
                limit: 10,
                exclude_session_id: None,
            })
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].entry.session_id.as_deref(), Some("s1"));

        let others = repo
            .search_similar(SimilarityQuery {
                domain_schema_id: "dom-1".into(),
                embedding: vec![1.0, 0.0],
                limit: 10,
                exclude_session_id: Some("s1".into()),
            })
            .await
            .unwrap();
        assert_eq!(others.len(), 1);
        assert_eq!(others[0].entry.session_id.as_deref(), Some("s2"));
    }

    #[tokio::test]
    async fn uncategorized_excludes_migrated() {
        let repo = InMemoryKnowledgeRepository::new();
        let open = entry(UNCATEGORIZED, "s1", vec![1.0]);
        let mut migrated = entry(UNCATEGORIZED, "s1", vec![1.0]);
        migrated.status = EntryStatus::Migrated;
        repo.create(open.clone()).await.unwrap();
        repo.create(migrated).await.unwrap();
        repo.create(entry("history", "s1", vec![1.0])).await.unwrap();

        let found = repo.get_uncategorized_by_domain("dom-1").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, open.id);
        assert!(repo.get_uncategorized_by_domain("dom-2").await.unwrap().is_empty());
        assert_eq!(repo.get_uncategorized().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn topic_keyword_query_orders_by_overlap() {
        let repo = InMemoryKnowledgeRepository::new();
        let mut one = entry(UNCATEGORIZED, "s1", vec![1.0]);
        one.topic_keywords = Some(vec!["mill".into()]);
        let mut two = entry(UNCATEGORIZED, "s1", vec![1.0]);
        two.topic_keywords = Some(vec!["Mill".into(), "river".into()]);
        repo.create(one).await.unwrap();
        repo.create(two.clone()).await.unwrap();

        let hits = repo
            .query_by_topic_keywords(&["mill".into(), "river".into()], 5)
            .await
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, two.id);
    }

    #[tokio::test]
    async fn update_unknown_id_is_none() {
        let repo = InMemoryKnowledgeRepository::new();
        assert!(repo.update("missing", EntryPatch::default()).await.unwrap().is_none());
    }
}
