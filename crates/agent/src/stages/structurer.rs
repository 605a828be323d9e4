//! Structurer: distills the turn into a knowledge entry.
//!
//! On a follow-up turn the previous entry of the same category is updated
//! in place: same `id`, same `createdAt`, new values overlaid on the old
//! structured data, tags merged. Uncategorized content is captured as a
//! draft for schema evolution without any extraction call; a follow-up to
//! such a capture is appended to it.

use async_trait::async_trait;
use chrono::Utc;
use lorekeep_core::error::{Error, ValidationError};
use lorekeep_core::knowledge::{FollowUp, KnowledgeEntry};
use lorekeep_core::schema::{Category, DomainSchema, UNCATEGORIZED, is_uncategorized};
use serde::Deserialize;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use crate::llm::{ModelOutput, StructuredLlm};
use crate::pipeline::Stage;
use crate::state::{
    AgentOutput, AgentRole, ClassifierResult, Gap, PipelineState, StageName, StageUpdate, StructuringResult,
};

/// Words of raw input used as the title of an uncategorized capture.
const CAPTURE_TITLE_WORDS: usize = 8;

/// What the model extracts from one turn.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extraction {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub structured_data: serde_json::Map<String, serde_json::Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub is_complete: bool,
    #[serde(default)]
    pub missing_fields: Vec<String>,
}

impl ModelOutput for Extraction {
    const NAME: &'static str = "structuring_output";

    fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "title": {"type": "string"},
                "content": {"type": "string"},
                "structuredData": {"type": "object"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "isComplete": {"type": "boolean"},
                "missingFields": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["title", "content", "structuredData", "tags", "isComplete", "missingFields"]
        })
    }
}

pub struct Structurer {
    llm: StructuredLlm,
    domain: Arc<DomainSchema>,
}

impl Structurer {
    pub fn new(llm: StructuredLlm, domain: Arc<DomainSchema>) -> Self {
        Self { llm, domain }
    }

    fn prompt(&self, category: &Category, previous: Option<&KnowledgeEntry>, state: &PipelineState) -> (String, String) {
        let system = format!(
            "You turn what a user told us into a knowledge entry for the category \"{}\". \
             Fill structuredData with the fields below when the user gave a value. \
             Reply with JSON only.",
            category.label
        );

        let mut user = String::new();
        let _ = writeln!(user, "Required fields: {}", category.required_fields.join(", "));
        let _ = writeln!(user, "Optional fields: {}", category.optional_fields.join(", "));
        if let Some(gaps) = state.gaps().filter(|g| !g.gaps.is_empty()) {
            let fields: Vec<&str> = gaps.gaps.iter().map(|g| g.field.as_str()).collect();
            let _ = writeln!(user, "Known gaps: {}", fields.join(", "));
        }
        if let Some(previous) = previous {
            let existing = serde_json::json!({
                "title": previous.title,
                "content": previous.content,
                "structuredData": previous.structured_data,
                "tags": previous.tags,
            });
            let _ = write!(
                user,
                "\nThis continues an existing entry:\n{existing}\n\
                 Update structuredData with newly provided fields, append new information to \
                 content, update tags, and keep the title unless the new information clearly \
                 calls for a better one.\n"
            );
        }
        let _ = write!(user, "\nUser input:\n{}", state.input.content);
        (system, user)
    }

    fn assemble(
        &self,
        category: &Category,
        classification: &ClassifierResult,
        previous: Option<&KnowledgeEntry>,
        extraction: Extraction,
        state: &PipelineState,
    ) -> Result<StructuringResult, Error> {
        let mut entry = match previous {
            Some(previous) => merge(previous, &extraction),
            None => {
                let mut issues = Vec::new();
                if extraction.title.trim().is_empty() {
                    issues.push("title: must not be empty".to_string());
                }
                if extraction.content.trim().is_empty() {
                    issues.push("content: must not be empty".to_string());
                }
                if !issues.is_empty() {
                    return Err(ValidationError::new(Extraction::NAME, issues).into());
                }
                let mut entry = KnowledgeEntry::draft(&category.id, &extraction.title, &extraction.content);
                entry.structured_data = non_null(&extraction.structured_data);
                entry.tags = dedup(extraction.tags.iter());
                entry
            }
        };

        entry.category_id = category.id.clone();
        entry.subcategory_id = classification.subcategory_id.clone().or(entry.subcategory_id);
        entry.confidence = Some(classification.confidence);
        entry.session_id = Some(state.session_id.clone());
        entry.domain_schema_id = Some(self.domain.id.clone());
        entry.follow_up = follow_up_for(state);

        let mut missing: Vec<String> = extraction
            .missing_fields
            .into_iter()
            .filter(|f| !entry.has_field(f))
            .collect();
        for field in &category.required_fields {
            if !entry.has_field(field) && !missing.contains(field) {
                missing.push(field.clone());
            }
        }
        let is_complete = extraction.is_complete && missing.is_empty();

        Ok(StructuringResult {
            entry,
            is_complete,
            missing_fields: missing,
        })
    }

    fn capture(
        &self,
        classification: &ClassifierResult,
        previous: Option<&KnowledgeEntry>,
        state: &PipelineState,
    ) -> StructuringResult {
        let input = state.input.content.trim();
        let mut entry = match previous {
            Some(previous) => extend_capture(previous, classification, input),
            None => {
                let title = classification
                    .suggested_category_label
                    .clone()
                    .filter(|l| !l.trim().is_empty())
                    .unwrap_or_else(|| input.split_whitespace().take(CAPTURE_TITLE_WORDS).collect::<Vec<_>>().join(" "));
                let mut entry = KnowledgeEntry::draft(UNCATEGORIZED, title, input);
                entry.raw_input = Some(state.input.content.clone());
                entry.suggested_category_label = classification.suggested_category_label.clone();
                entry.topic_keywords = classification.topic_keywords.clone();
                if let Some(keywords) = &classification.topic_keywords {
                    entry.tags = dedup(keywords.iter());
                }
                entry
            }
        };
        entry.confidence = Some(classification.confidence);
        entry.session_id = Some(state.session_id.clone());
        entry.domain_schema_id = Some(self.domain.id.clone());
        entry.follow_up = follow_up_for(state);

        StructuringResult {
            entry,
            is_complete: false,
            missing_fields: Vec::new(),
        }
    }
}

/// Append a follow-up answer to an earlier capture, keeping its identity.
fn extend_capture(previous: &KnowledgeEntry, classification: &ClassifierResult, input: &str) -> KnowledgeEntry {
    let mut entry = previous.clone();
    if !input.is_empty() {
        entry.content = join_paragraphs(&entry.content, input);
        entry.raw_input = Some(match &previous.raw_input {
            Some(raw) => join_paragraphs(raw, input),
            None => input.to_string(),
        });
    }
    let keywords = previous.topic_keywords.iter().flatten().chain(classification.topic_keywords.iter().flatten());
    let keywords = dedup(keywords);
    if !keywords.is_empty() {
        entry.topic_keywords = Some(keywords);
    }
    entry.tags = dedup(previous.tags.iter().chain(classification.topic_keywords.iter().flatten()));
    if entry.suggested_category_label.is_none() {
        entry.suggested_category_label = classification.suggested_category_label.clone();
    }
    entry.updated_at = Utc::now();
    entry
}

fn join_paragraphs(head: &str, tail: &str) -> String {
    if head.trim().is_empty() {
        tail.to_string()
    } else {
        format!("{head}\n\n{tail}")
    }
}

/// Overlay `extraction` on a copy of `previous`, keeping its identity.
fn merge(previous: &KnowledgeEntry, extraction: &Extraction) -> KnowledgeEntry {
    let mut entry = previous.clone();
    for (key, value) in &extraction.structured_data {
        if !value.is_null() {
            entry.structured_data.insert(key.clone(), value.clone());
        }
    }
    if !extraction.title.trim().is_empty() {
        entry.title = extraction.title.clone();
    }
    if !extraction.content.trim().is_empty() {
        entry.content = extraction.content.clone();
    }
    entry.tags = dedup(previous.tags.iter().chain(extraction.tags.iter()));
    entry.updated_at = Utc::now();
    entry
}

fn non_null(data: &serde_json::Map<String, serde_json::Value>) -> serde_json::Map<String, serde_json::Value> {
    data.iter()
        .filter(|(_, v)| !v.is_null())
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn dedup<'a>(tags: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !out.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Present iff the gap stage left anything open this turn. Gaps are kept
/// in reply-prompt order, so the leading ones are those the user was asked.
fn follow_up_for(state: &PipelineState) -> Option<FollowUp> {
    let gaps = state.gaps().filter(|g| g.has_open_items())?;
    let mut ordered: Vec<&Gap> = gaps.gaps.iter().collect();
    ordered.sort_by_key(|g| g.priority.rank());
    Some(FollowUp {
        gaps: ordered.into_iter().map(|g| g.field.clone()).collect(),
        suggested_questions: gaps.follow_up_questions.clone(),
    })
}

#[async_trait]
impl Stage for Structurer {
    fn name(&self) -> StageName {
        StageName::Structuring
    }

    async fn run(&self, state: &PipelineState) -> Result<StageUpdate, Error> {
        let classification = state.classification()?;

        if is_uncategorized(&classification.category_id) {
            let previous = state
                .turn_context
                .as_ref()
                .and_then(|c| c.follow_up_entry())
                .filter(|p| is_uncategorized(&p.category_id));
            let result = self.capture(classification, previous, state);
            debug!(entry_id = %result.entry.id, merged = previous.is_some(), "Captured uncategorized input");
            return Ok(StageUpdate::Structuring(AgentOutput::new(AgentRole::Structurer, result)));
        }

        let category = self
            .domain
            .category(&classification.category_id)
            .ok_or_else(|| Error::not_found("category", &classification.category_id))?;
        let previous = state
            .turn_context
            .as_ref()
            .and_then(|c| c.follow_up_entry())
            .filter(|p| p.category_id == category.id);

        let (system, user) = self.prompt(category, previous, state);
        let extraction: Extraction = self.llm.invoke(&system, &user).await?;
        let result = self.assemble(category, classification, previous, extraction, state)?;

        debug!(
            entry_id = %result.entry.id,
            category = %category.id,
            merged = previous.is_some(),
            complete = result.is_complete,
            "Entry structured"
        );
        Ok(StageUpdate::Structuring(AgentOutput::new(AgentRole::Structurer, result)))
    }
}
