//! Per-run pipeline state and the typed outputs each stage contributes.
//!
//! A run starts with every stage slot empty. Each stage returns a
//! [`StageUpdate`] that the orchestrator applies to [`PipelineState`];
//! a slot is filled at most once and never cleared.

use lorekeep_core::error::Error;
use lorekeep_core::knowledge::{KnowledgeEntry, ScoredEntry};
use lorekeep_core::session::{AgentInput, Intent, TurnContext};
use serde::{Deserialize, Serialize};

/// The stage graph's nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StageName {
    Classifier,
    ContextDispatcher,
    GapReasoning,
    Persona,
    Structuring,
}

impl std::fmt::Display for StageName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Classifier => "classifier",
            Self::ContextDispatcher => "contextDispatcher",
            Self::GapReasoning => "gapReasoning",
            Self::Persona => "persona",
            Self::Structuring => "structuring",
        };
        f.write_str(s)
    }
}

/// Which stage produced an output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Classifier,
    ContextDispatcher,
    GapReasoner,
    Persona,
    Structurer,
}

/// A stage result tagged with the role that produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentOutput<T> {
    pub agent_role: AgentRole,
    pub result: T,
}

impl<T> AgentOutput<T> {
    pub fn new(agent_role: AgentRole, result: T) -> Self {
        Self { agent_role, result }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassifierResult {
    pub category_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory_id: Option<String>,
    pub confidence: f64,
    pub intent: Intent,
    /// Reserved; routing does not read it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_topic_change: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggested_category_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_keywords: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextResult {
    pub same_session: Vec<ScoredEntry>,
    pub other_session: Vec<ScoredEntry>,
    pub summary: String,
}

impl ContextResult {
    pub fn is_empty(&self) -> bool {
        self.same_session.is_empty() && self.other_session.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// Sort key: high first.
    pub fn rank(self) -> u8 {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gap {
    pub field: String,
    #[serde(default)]
    pub description: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GapReasoningResult {
    #[serde(default)]
    pub gaps: Vec<Gap>,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
}

impl GapReasoningResult {
    pub fn has_open_items(&self) -> bool {
        !self.gaps.is_empty() || !self.follow_up_questions.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaResult {
    pub response: String,
    #[serde(default)]
    pub follow_up_questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuringResult {
    pub entry: KnowledgeEntry,
    pub is_complete: bool,
    #[serde(default)]
    pub missing_fields: Vec<String>,
}

pub type ClassifierOutput = AgentOutput<ClassifierResult>;
pub type ContextDispatcherOutput = AgentOutput<ContextResult>;
pub type GapReasoningOutput = AgentOutput<GapReasoningResult>;
pub type PersonaOutput = AgentOutput<PersonaResult>;
pub type StructuringOutput = AgentOutput<StructuringResult>;

/// The delta a stage returns; one variant per stage.
#[derive(Debug, Clone)]
pub enum StageUpdate {
    Classifier(ClassifierOutput),
    ContextDispatcher(ContextDispatcherOutput),
    GapReasoning(GapReasoningOutput),
    Persona(PersonaOutput),
    Structuring(StructuringOutput),
}

impl StageUpdate {
    pub fn stage(&self) -> StageName {
        match self {
            Self::Classifier(_) => StageName::Classifier,
            Self::ContextDispatcher(_) => StageName::ContextDispatcher,
            Self::GapReasoning(_) => StageName::GapReasoning,
            Self::Persona(_) => StageName::Persona,
            Self::Structuring(_) => StageName::Structuring,
        }
    }
}

/// Working memory of one orchestrator run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub session_id: String,
    pub input: AgentInput,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classifier_output: Option<ClassifierOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_dispatcher_output: Option<ContextDispatcherOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gap_reasoning_output: Option<GapReasoningOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub persona_output: Option<PersonaOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structuring_output: Option<StructuringOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_context: Option<TurnContext>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_category: Option<String>,
}

impl PipelineState {
    pub fn new(input: AgentInput, turn_context: Option<TurnContext>, active_category: Option<String>) -> Self {
        Self {
            session_id: input.session_id.clone(),
            input,
            classifier_output: None,
            context_dispatcher_output: None,
            gap_reasoning_output: None,
            persona_output: None,
            structuring_output: None,
            turn_context,
            active_category,
        }
    }

    /// Fill the slot named by `update`. Refilling a slot is a pipeline bug.
    pub fn apply(&mut self, update: StageUpdate) -> Result<(), Error> {
        fn fill<T>(slot: &mut Option<T>, value: T, stage: StageName) -> Result<(), Error> {
            if slot.is_some() {
                return Err(Error::Pipeline(format!("{stage} output already set")));
            }
            *slot = Some(value);
            Ok(())
        }

        match update {
            StageUpdate::Classifier(o) => fill(&mut self.classifier_output, o, StageName::Classifier),
            StageUpdate::ContextDispatcher(o) => {
                fill(&mut self.context_dispatcher_output, o, StageName::ContextDispatcher)
            }
            StageUpdate::GapReasoning(o) => fill(&mut self.gap_reasoning_output, o, StageName::GapReasoning),
            StageUpdate::Persona(o) => fill(&mut self.persona_output, o, StageName::Persona),
            StageUpdate::Structuring(o) => fill(&mut self.structuring_output, o, StageName::Structuring),
        }
    }

    /// The classifier result, or a pipeline error when it has not run.
    pub fn classification(&self) -> Result<&ClassifierResult, Error> {
        self.classifier_output
            .as_ref()
            .map(|o| &o.result)
            .ok_or_else(|| Error::Pipeline("classifier output missing".into()))
    }

    pub fn intent(&self) -> Option<Intent> {
        self.classifier_output.as_ref().map(|o| o.result.intent)
    }

    pub fn gaps(&self) -> Option<&GapReasoningResult> {
        self.gap_reasoning_output.as_ref().map(|o| &o.result)
    }

    pub fn context_summary(&self) -> Option<&str> {
        self.context_dispatcher_output.as_ref().map(|o| o.result.summary.as_str())
    }

    pub fn is_follow_up(&self) -> bool {
        self.turn_context.as_ref().is_some_and(|c| c.is_follow_up)
    }

    pub fn entry(&self) -> Option<&KnowledgeEntry> {
        self.structuring_output.as_ref().map(|o| &o.result.entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classified(intent: Intent) -> StageUpdate {
        StageUpdate::Classifier(AgentOutput::new(
            AgentRole::Classifier,
            ClassifierResult {
                category_id: "history".into(),
                subcategory_id: None,
                confidence: 0.9,
                intent,
                is_topic_change: None,
                summary: None,
                suggested_category_label: None,
                topic_keywords: None,
            },
        ))
    }

    #[test]
    fn slots_fill_once() {
        let mut state = PipelineState::new(AgentInput::new("s1", "hello"), None, None);
        assert!(state.classification().is_err());

        state.apply(classified(Intent::Greeting)).unwrap();
        assert_eq!(state.intent(), Some(Intent::Greeting));

        let err = state.apply(classified(Intent::Content)).unwrap_err();
        assert!(err.to_string().contains("classifier output already set"));
        assert_eq!(state.intent(), Some(Intent::Greeting));
    }

    #[test]
    fn classifier_result_parses_camel_case() {
        let raw = r#"{"categoryId":"_uncategorized","confidence":0.4,"intent":"proactive_request","suggestedCategoryLabel":"Mills"}"#;
        let result: ClassifierResult = serde_json::from_str(raw).unwrap();
        assert_eq!(result.intent, Intent::ProactiveRequest);
        assert_eq!(result.suggested_category_label.as_deref(), Some("Mills"));
    }

    #[test]
    fn priority_rank_orders_high_first() {
        let mut ps = vec![Priority::Low, Priority::High, Priority::Medium];
        ps.sort_by_key(|p| p.rank());
        assert_eq!(ps, vec![Priority::High, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn update_reports_its_stage() {
        assert_eq!(classified(Intent::Content).stage(), StageName::Classifier);
        assert_eq!(StageName::GapReasoning.to_string(), "gapReasoning");
    }
}
