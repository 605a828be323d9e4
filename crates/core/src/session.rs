//! Sessions, turns, and the cross-turn context handed to each pipeline run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::knowledge::KnowledgeEntry;

/// What the user meant by an utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    /// Carries knowledge worth structuring.
    Content,
    /// Small talk.
    Greeting,
    /// The user asks the assistant to suggest what to talk about.
    ProactiveRequest,
    /// The user cannot answer the last question.
    DontKnow,
}

impl Intent {
    /// Only content turns are structured into knowledge entries.
    pub fn is_content(self) -> bool {
        matches!(self, Self::Content)
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Content => "content",
            Self::Greeting => "greeting",
            Self::ProactiveRequest => "proactive_request",
            Self::DontKnow => "dont_know",
        };
        f.write_str(s)
    }
}

/// One user utterance entering the pipeline. Immutable per turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentInput {
    pub session_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl AgentInput {
    pub fn new(session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            content: content.into(),
            metadata: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Active,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: String,
    pub domain_schema_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persona_schema_id: Option<String>,
    #[serde(default)]
    pub status: SessionStatus,
    /// The in-progress entry later turns merge into.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_entry_id: Option<String>,
    #[serde(default)]
    pub turn_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(domain_schema_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            domain_schema_id: domain_schema_id.into(),
            persona_schema_id: None,
            status: SessionStatus::Active,
            current_entry_id: None,
            turn_count: 0,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A persisted conversation turn.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Turn {
    pub id: String,
    pub session_id: String,
    pub turn_number: u32,
    pub user_input: String,
    pub intent: Intent,
    pub category_id: String,
    pub response: String,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Condensed view of a prior turn for prompt context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSummary {
    pub turn_number: u32,
    pub user_input: String,
    pub response: String,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
}

impl From<&Turn> for TurnSummary {
    fn from(turn: &Turn) -> Self {
        Self {
            turn_number: turn.turn_number,
            user_input: turn.user_input.clone(),
            response: turn.response.clone(),
            follow_up_questions: turn.follow_up_questions.clone(),
        }
    }
}

/// Cross-turn memory for one pipeline run.
///
/// Built fresh by the session manager before each run and never mutated
/// during it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnContext {
    pub turn_number: u32,
    pub is_follow_up: bool,
    #[serde(default)]
    pub previous_turns: Vec<TurnSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_entry: Option<KnowledgeEntry>,
    /// Every question asked so far in the session, oldest first.
    #[serde(default)]
    pub asked_questions: Vec<String>,
}

impl TurnContext {
    /// Context for the first turn of a session.
    pub fn first_turn() -> Self {
        Self {
            turn_number: 1,
            is_follow_up: false,
            previous_turns: Vec::new(),
            previous_entry: None,
            asked_questions: Vec::new(),
        }
    }

    /// The entry a follow-up turn merges into.
    pub fn follow_up_entry(&self) -> Option<&KnowledgeEntry> {
        if self.is_follow_up {
            self.previous_entry.as_ref()
        } else {
            None
        }
    }
}
