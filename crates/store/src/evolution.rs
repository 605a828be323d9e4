//! In-memory field statistics and evolution proposals.

use async_trait::async_trait;
use chrono::Utc;
use lorekeep_core::error::StoreError;
use lorekeep_core::evolution::{EvolutionProposal, FieldStats, ProposalStatus};
use lorekeep_core::store::{FieldStatsRepository, ProposalRepository};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

type StatsKey = (String, String, String);

fn key(domain_schema_id: &str, category_id: &str, field_name: &str) -> StatsKey {
    (domain_schema_id.into(), category_id.into(), field_name.into())
}

/// Counters are bumped under the write lock, never read-then-written.
pub struct InMemoryFieldStatsRepository {
    stats: Arc<RwLock<HashMap<StatsKey, FieldStats>>>,
}

impl InMemoryFieldStatsRepository {
    pub fn new() -> Self {
        Self {
            stats: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    async fn bump(
        &self,
        domain_schema_id: &str,
        category_id: &str,
        field_name: &str,
        f: impl FnOnce(&mut FieldStats),
    ) -> FieldStats {
        let mut stats = self.stats.write().await;
        let row = stats
            .entry(key(domain_schema_id, category_id, field_name))
            .or_insert_with(|| FieldStats::new(domain_schema_id, category_id, field_name));
        f(row);
        row.last_updated_at = Utc::now();
        row.clone()
    }
}

impl Default for InMemoryFieldStatsRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FieldStatsRepository for InMemoryFieldStatsRepository {
    async fn increment_asked(
        &self,
        domain_schema_id: &str,
        category_id: &str,
        field_name: &str,
    ) -> Result<FieldStats, StoreError> {
        Ok(self
            .bump(domain_schema_id, category_id, field_name, |s| s.times_asked += 1)
            .await)
    }

    async fn increment_answered(
        &self,
        domain_schema_id: &str,
        category_id: &str,
        field_name: &str,
    ) -> Result<FieldStats, StoreError> {
        Ok(self
            .bump(domain_schema_id, category_id, field_name, |s| s.times_answered += 1)
            .await)
    }

    async fn get(
        &self,
        domain_schema_id: &str,
        category_id: &str,
        field_name: &str,
    ) -> Result<Option<FieldStats>, StoreError> {
        Ok(self
            .stats
            .read()
            .await
            .get(&key(domain_schema_id, category_id, field_name))
            .cloned())
    }

    async fn list_by_domain(&self, domain_schema_id: &str) -> Result<Vec<FieldStats>, StoreError> {
        let mut rows: Vec<FieldStats> = self
            .stats
            .read()
            .await
            .values()
            .filter(|s| s.domain_schema_id == domain_schema_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (&a.category_id, &a.field_name).cmp(&(&b.category_id, &b.field_name)));
        Ok(rows)
    }
}

pub struct InMemoryProposalRepository {
    proposals: Arc<RwLock<Vec<EvolutionProposal>>>,
}

impl InMemoryProposalRepository {
    pub fn new() -> Self {
        Self {
            proposals: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

impl Default for InMemoryProposalRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProposalRepository for InMemoryProposalRepository {
    async fn create(&self, proposal: EvolutionProposal) -> Result<EvolutionProposal, StoreError> {
        let mut proposals = self.proposals.write().await;
        if proposals.iter().any(|p| p.id == proposal.id) {
            return Err(StoreError::Conflict(format!("proposal {} exists", proposal.id)));
        }
        proposals.push(proposal.clone());
        Ok(proposal)
    }

    async fn get(&self, id: &str) -> Result<Option<EvolutionProposal>, StoreError> {
        Ok(self.proposals.read().await.iter().find(|p| p.id == id).cloned())
    }

    async fn update(&self, proposal: EvolutionProposal) -> Result<EvolutionProposal, StoreError> {
        let mut proposals = self.proposals.write().await;
        let slot = proposals
            .iter_mut()
            .find(|p| p.id == proposal.id)
            .ok_or_else(|| StoreError::QueryFailed(format!("proposal {} not found", proposal.id)))?;
        *slot = proposal.clone();
        Ok(proposal)
    }

    async fn list_by_domain(
        &self,
        domain_schema_id: &str,
        status: Option<ProposalStatus>,
    ) -> Result<Vec<EvolutionProposal>, StoreError> {
        Ok(self
            .proposals
            .read()
            .await
            .iter()
            .filter(|p| p.domain_schema_id == domain_schema_id)
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lorekeep_core::evolution::ChangePrioritySpec;
    use lorekeep_core::schema::FieldRequirement;

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let repo = Arc::new(InMemoryFieldStatsRepository::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.increment_asked("dom", "history", "sources").await.unwrap();
                if i % 5 == 0 {
                    repo.increment_answered("dom", "history", "sources").await.unwrap();
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stats = repo.get("dom", "history", "sources").await.unwrap().unwrap();
        assert_eq!(stats.times_asked, 50);
        assert_eq!(stats.times_answered, 10);
        assert!((stats.answer_rate() - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn list_by_domain_filters() {
        let repo = InMemoryFieldStatsRepository::new();
        repo.increment_asked("dom", "history", "period").await.unwrap();
        repo.increment_asked("other", "history", "period").await.unwrap();
        assert_eq!(repo.list_by_domain("dom").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn proposals_filter_by_status() {
        let repo = InMemoryProposalRepository::new();
        let spec = ChangePrioritySpec {
            category_id: "history".into(),
            field_name: "sources".into(),
            from: FieldRequirement::Required,
            to: FieldRequirement::Optional,
        };
        let mut p = EvolutionProposal::change_priority("dom", spec, 0.05, 20);
        repo.create(p.clone()).await.unwrap();
        assert_eq!(repo.list_by_domain("dom", Some(ProposalStatus::Pending)).await.unwrap().len(), 1);

        p.status = ProposalStatus::Rejected;
        repo.update(p).await.unwrap();
        assert!(repo.list_by_domain("dom", Some(ProposalStatus::Pending)).await.unwrap().is_empty());
        assert_eq!(repo.list_by_domain("dom", None).await.unwrap().len(), 1);
    }
}
