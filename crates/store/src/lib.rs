//! Repository implementations for lorekeep.
//!
//! Everything here is in-memory: useful for tests, the CLI, and ephemeral
//! sessions. Each repository guards its collection with a `tokio` `RwLock`,
//! which makes single-document operations atomic.

pub mod evolution;
pub mod knowledge;
pub mod schema;
pub mod search_cache;
pub mod session;
pub mod vector;

pub use evolution::{InMemoryFieldStatsRepository, InMemoryProposalRepository};
pub use knowledge::InMemoryKnowledgeRepository;
pub use schema::InMemorySchemaRepository;
pub use search_cache::InMemorySearchCache;
pub use session::InMemorySessionRepository;
pub use vector::{average_pairwise_similarity, cosine_similarity, rank_by_similarity};

use lorekeep_core::store::{
    FieldStatsRepository, KnowledgeRepository, ProposalRepository, SchemaRepository,
    SearchCacheRepository, SessionRepository,
};
use std::sync::Arc;

/// One handle to every repository, sharing nothing between them.
#[derive(Clone)]
pub struct Repositories {
    pub knowledge: Arc<dyn KnowledgeRepository>,
    pub sessions: Arc<dyn SessionRepository>,
    pub schemas: Arc<dyn SchemaRepository>,
    pub field_stats: Arc<dyn FieldStatsRepository>,
    pub proposals: Arc<dyn ProposalRepository>,
    pub search_cache: Arc<dyn SearchCacheRepository>,
}

impl Repositories {
    pub fn in_memory() -> Self {
        Self {
            knowledge: Arc::new(InMemoryKnowledgeRepository::new()),
            sessions: Arc::new(InMemorySessionRepository::new()),
            schemas: Arc::new(InMemorySchemaRepository::new()),
            field_stats: Arc::new(InMemoryFieldStatsRepository::new()),
            proposals: Arc::new(InMemoryProposalRepository::new()),
            search_cache: Arc::new(InMemorySearchCache::new()),
        }
    }
}
