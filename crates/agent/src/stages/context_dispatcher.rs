//! Context dispatcher: retrieves related knowledge for the current input.
//!
//! Retrieval is an enrichment. A missing embedder or repository, or any
//! failure along the way, yields an empty result with a fixed summary and
//! a warning in the log; the turn goes on.

use async_trait::async_trait;
use lorekeep_core::error::Error;
use lorekeep_core::knowledge::{KnowledgeEntry, ScoredEntry};
use lorekeep_core::provider::EmbeddingClient;
use lorekeep_core::schema::is_uncategorized;
use lorekeep_core::store::{KnowledgeRepository, SimilarityQuery};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::pipeline::Stage;
use crate::state::{AgentOutput, AgentRole, ContextResult, PipelineState, StageName, StageUpdate};

pub const NO_CONTEXT: &str = "No context available.";

#[derive(Debug, Clone)]
pub struct RetrievalSettings {
    pub limit: usize,
    pub min_relevance: f32,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            limit: 5,
            min_relevance: 0.5,
        }
    }
}

impl From<&lorekeep_config::PipelineConfig> for RetrievalSettings {
    fn from(config: &lorekeep_config::PipelineConfig) -> Self {
        Self {
            limit: config.context_limit,
            min_relevance: config.min_relevance,
        }
    }
}

pub struct ContextDispatcher {
    embedder: Option<Arc<dyn EmbeddingClient>>,
    knowledge: Option<Arc<dyn KnowledgeRepository>>,
    domain_schema_id: String,
    settings: RetrievalSettings,
}

impl ContextDispatcher {
    pub fn new(
        embedder: Option<Arc<dyn EmbeddingClient>>,
        knowledge: Option<Arc<dyn KnowledgeRepository>>,
        domain_schema_id: impl Into<String>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            embedder,
            knowledge,
            domain_schema_id: domain_schema_id.into(),
            settings,
        }
    }

    async fn retrieve(&self, state: &PipelineState) -> Result<ContextResult, Error> {
        let (Some(embedder), Some(knowledge)) = (&self.embedder, &self.knowledge) else {
            debug!("No retrieval backend wired, skipping context");
            return Ok(empty());
        };

        let category = state
            .classifier_output
            .as_ref()
            .map(|o| o.result.category_id.as_str())
            .filter(|c| !is_uncategorized(c));
        let embedding = embedder.generate_embedding(&query_text(category, &state.input.content)).await?;

        let hits = knowledge
            .search_similar(SimilarityQuery {
                domain_schema_id: self.domain_schema_id.clone(),
                embedding,
                limit: self.settings.limit,
                exclude_session_id: None,
            })
            .await?;

        let (same_session, other_session): (Vec<ScoredEntry>, Vec<ScoredEntry>) = hits
            .into_iter()
            .filter(|hit| hit.score >= self.settings.min_relevance)
            .partition(|hit| hit.entry.session_id.as_deref() == Some(state.session_id.as_str()));

        let summary = summarize(&same_session, &other_session);
        Ok(ContextResult {
            same_session,
            other_session,
            summary,
        })
    }
}

#[async_trait]
impl Stage for ContextDispatcher {
    fn name(&self) -> StageName {
        StageName::ContextDispatcher
    }

    async fn run(&self, state: &PipelineState) -> Result<StageUpdate, Error> {
        let result = match self.retrieve(state).await {
            Ok(result) => result,
            Err(e) => {
                warn!(session_id = %state.session_id, error = %e, "Context retrieval failed, continuing without context");
                empty()
            }
        };
        debug!(
            same_session = result.same_session.len(),
            other_session = result.other_session.len(),
            "Context dispatched"
        );
        Ok(StageUpdate::ContextDispatcher(AgentOutput::new(AgentRole::ContextDispatcher, result)))
    }
}

fn empty() -> ContextResult {
    ContextResult {
        same_session: Vec::new(),
        other_session: Vec::new(),
        summary: NO_CONTEXT.to_string(),
    }
}

/// `"{category}. {input}"`, or the bare input when there is no category.
pub fn query_text(category: Option<&str>, input: &str) -> String {
    match category {
        Some(category) => format!("{category}. {input}"),
        None => input.to_string(),
    }
}

fn summarize(same_session: &[ScoredEntry], other_session: &[ScoredEntry]) -> String {
    if same_session.is_empty() && other_session.is_empty() {
        return NO_CONTEXT.to_string();
    }
    let mut out = String::new();
    for (label, hits) in [("[SAME_SESSION]", same_session), ("[OTHER_SESSION]", other_session)] {
        if hits.is_empty() {
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(label);
        out.push('\n');
        for hit in hits {
            out.push_str(&format_line(hit));
            out.push('\n');
        }
    }
    out.trim_end().to_string()
}

fn format_line(hit: &ScoredEntry) -> String {
    let entry = &hit.entry;
    let mut line = format!(
        "- [{}] {} (relevance: {:.2}): {}",
        entry.category_id, entry.title, hit.score, entry.content
    );
    if let Some(marker) = enrichment_marker(entry) {
        let _ = write!(line, " {marker}");
    }
    line
}

fn enrichment_marker(entry: &KnowledgeEntry) -> Option<String> {
    let enrichment = entry.enrichment.as_ref()?;
    let disputed: Vec<String> = enrichment
        .contradicted()
        .map(|c| match &c.evidence {
            Some(evidence) => format!("\"{}\" ({})", c.claim, evidence),
            None => format!("\"{}\"", c.claim),
        })
        .collect();
    if !disputed.is_empty() {
        return Some(format!("[DISPUTED: {}]", disputed.join("; ")));
    }
    match enrichment.verified_count() {
        0 => None,
        n => Some(format!("[VERIFIED: {n} claims]")),
    }
}
