//! Repository traits: the persistence boundary.
//!
//! The pipeline never talks to a database directly; it goes through these
//! traits. Implementations must make each single-document operation atomic,
//! including the counter increments on [`FieldStatsRepository`] and the
//! activate-new-version operations on [`SchemaRepository`].

use async_trait::async_trait;
use crate::error::StoreError;
use crate::evolution::{EvolutionProposal, FieldStats, ProposalStatus};
use crate::knowledge::{EntryPatch, KnowledgeEntry, ScoredEntry};
use crate::schema::{DomainSchema, PersonaSchema};
use crate::search::CachedSearch;
use crate::session::{Session, Turn};

type StoreResult<T> = std::result::Result<T, StoreError>;

/// A vector similarity query scoped to one domain.
#[derive(Debug, Clone)]
pub struct SimilarityQuery {
    pub domain_schema_id: String,
    pub embedding: Vec<f32>,
    pub limit: usize,
    pub exclude_session_id: Option<String>,
}

#[async_trait]
pub trait KnowledgeRepository: Send + Sync {
    /// Insert a new entry. Fails with `Conflict` if the id already exists.
    async fn create(&self, entry: KnowledgeEntry) -> StoreResult<KnowledgeEntry>;

    /// Insert or fully replace an entry by id.
    async fn save(&self, entry: KnowledgeEntry) -> StoreResult<KnowledgeEntry>;

    async fn get_by_id(&self, id: &str) -> StoreResult<Option<KnowledgeEntry>>;

    async fn get_by_session(&self, session_id: &str) -> StoreResult<Vec<KnowledgeEntry>>;

    async fn get_by_category(&self, domain_schema_id: &str, category_id: &str) -> StoreResult<Vec<KnowledgeEntry>>;

    async fn get_uncategorized(&self) -> StoreResult<Vec<KnowledgeEntry>>;

    async fn get_uncategorized_by_domain(&self, domain_schema_id: &str) -> StoreResult<Vec<KnowledgeEntry>>;

    /// Entries sharing at least one topic keyword, most overlap first.
    async fn query_by_topic_keywords(&self, keywords: &[String], limit: usize) -> StoreResult<Vec<KnowledgeEntry>>;

    /// Entries ranked by cosine similarity, highest first.
    async fn search_similar(&self, query: SimilarityQuery) -> StoreResult<Vec<ScoredEntry>>;

    /// Apply a partial update. Returns `None` when the id is unknown.
    async fn update(&self, id: &str, patch: EntryPatch) -> StoreResult<Option<KnowledgeEntry>>;
}

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn create(&self, session: Session) -> StoreResult<Session>;

    async fn get(&self, id: &str) -> StoreResult<Option<Session>>;

    async fn update(&self, session: Session) -> StoreResult<Session>;

    async fn add_turn(&self, turn: Turn) -> StoreResult<Turn>;

    /// Turns of a session in increasing `turn_number` order.
    async fn turns(&self, session_id: &str) -> StoreResult<Vec<Turn>>;
}

#[async_trait]
pub trait SchemaRepository: Send + Sync {
    async fn create_domain(&self, schema: DomainSchema) -> StoreResult<DomainSchema>;

    async fn get_domain(&self, id: &str) -> StoreResult<Option<DomainSchema>>;

    async fn get_active_domain(&self, name: &str) -> StoreResult<Option<DomainSchema>>;

    async fn list_domain_versions(&self, name: &str) -> StoreResult<Vec<DomainSchema>>;

    /// Store `schema` as active and deactivate the previously active schema
    /// with the same name, as one atomic step.
    async fn save_and_activate_domain(&self, schema: DomainSchema) -> StoreResult<DomainSchema>;

    async fn create_persona(&self, persona: PersonaSchema) -> StoreResult<PersonaSchema>;

    async fn get_persona(&self, id: &str) -> StoreResult<Option<PersonaSchema>>;

    async fn get_active_persona(&self, name: &str) -> StoreResult<Option<PersonaSchema>>;

    async fn save_and_activate_persona(&self, persona: PersonaSchema) -> StoreResult<PersonaSchema>;
}

#[async_trait]
pub trait FieldStatsRepository: Send + Sync {
    /// Atomically add one to `times_asked`, creating the row if needed.
    async fn increment_asked(&self, domain_schema_id: &str, category_id: &str, field_name: &str) -> StoreResult<FieldStats>;

    /// Atomically add one to `times_answered`, creating the row if needed.
    async fn increment_answered(&self, domain_schema_id: &str, category_id: &str, field_name: &str) -> StoreResult<FieldStats>;

    async fn get(&self, domain_schema_id: &str, category_id: &str, field_name: &str) -> StoreResult<Option<FieldStats>>;

    async fn list_by_domain(&self, domain_schema_id: &str) -> StoreResult<Vec<FieldStats>>;
}

#[async_trait]
pub trait ProposalRepository: Send + Sync {
    async fn create(&self, proposal: EvolutionProposal) -> StoreResult<EvolutionProposal>;

    async fn get(&self, id: &str) -> StoreResult<Option<EvolutionProposal>>;

    async fn update(&self, proposal: EvolutionProposal) -> StoreResult<EvolutionProposal>;

    async fn list_by_domain(
        &self,
        domain_schema_id: &str,
        status: Option<ProposalStatus>,
    ) -> StoreResult<Vec<EvolutionProposal>>;
}

#[async_trait]
pub trait SearchCacheRepository: Send + Sync {
    /// Look up by normalized query key, regardless of age.
    async fn get(&self, query_key: &str) -> StoreResult<Option<CachedSearch>>;

    async fn put(&self, cached: CachedSearch) -> StoreResult<()>;
}
