//! # lorekeep core
//!
//! Domain types, collaborator traits, and error definitions for the lorekeep
//! knowledge-extraction pipeline. This crate has **no framework
//! dependencies**; it defines the domain model the other crates implement
//! against.
//!
//! ## Design Philosophy
//!
//! Every collaborator (language model, embeddings, web search, storage) is a
//! trait here. Implementations live in their respective crates, which keeps
//! the pipeline testable with scripted mocks and in-memory stores.

pub mod error;
pub mod evolution;
pub mod knowledge;
pub mod message;
pub mod provider;
pub mod schema;
pub mod search;
pub mod session;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, ProviderError, Result, StoreError, ValidationError};
pub use evolution::{EvolutionProposal, FieldStats, ProposalStatus, ProposalType};
pub use knowledge::{EntryStatus, FollowUp, KnowledgeEntry};
pub use message::{Message, Role};
pub use provider::{EmbeddingClient, Provider, ProviderRequest, ProviderResponse};
pub use schema::{Category, DomainSchema, EvolutionMode, PersonaVoice, UNCATEGORIZED};
pub use search::{WebSearch, WebSearchResult};
pub use session::{AgentInput, Intent, Session, Turn, TurnContext, TurnSummary};
