//! Gap reasoner: finds unfilled fields and proposes follow-up questions.
//!
//! Known categories get a field checklist. Uncategorized input gets an
//! exploratory prompt built from the classifier's summary and suggested
//! label instead.

use async_trait::async_trait;
use lorekeep_core::error::Error;
use lorekeep_core::schema::{Category, DomainSchema, is_uncategorized};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use crate::llm::{ModelOutput, StructuredLlm};
use crate::pipeline::Stage;
use crate::state::{
    AgentOutput, AgentRole, ClassifierResult, GapReasoningResult, PipelineState, StageName, StageUpdate,
};

/// Hard cap on follow-up questions leaving this stage.
pub const MAX_GAP_QUESTIONS: usize = 3;

impl ModelOutput for GapReasoningResult {
    const NAME: &'static str = "gap_reasoning_output";

    fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "gaps": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "field": {"type": "string"},
                            "description": {"type": "string"},
                            "priority": {"type": "string", "enum": ["high", "medium", "low"]}
                        },
                        "required": ["field", "priority"]
                    }
                },
                "followUpQuestions": {"type": "array", "items": {"type": "string"}},
                "reasoning": {"type": ["string", "null"]}
            },
            "required": ["gaps", "followUpQuestions"]
        })
    }

    fn issues(&self) -> Vec<String> {
        self.gaps
            .iter()
            .enumerate()
            .filter(|(_, g)| g.field.trim().is_empty())
            .map(|(i, _)| format!("gaps[{i}].field: must not be empty"))
            .collect()
    }
}

pub struct GapReasoner {
    llm: StructuredLlm,
    domain: Arc<DomainSchema>,
}

impl GapReasoner {
    pub fn new(llm: StructuredLlm, domain: Arc<DomainSchema>) -> Self {
        Self { llm, domain }
    }

    fn structured_prompt(&self, category: &Category, state: &PipelineState) -> (String, String) {
        let system = format!(
            "You review what a user told us about \"{}\" and find which fields are still unknown. \
             Rate each gap high, medium or low and propose at most {MAX_GAP_QUESTIONS} short follow-up \
             questions. Reply with JSON only.",
            category.label
        );

        let mut user = String::new();
        let _ = writeln!(user, "Required fields: {}", list_or_none(&category.required_fields));
        let _ = writeln!(user, "Optional fields: {}", list_or_none(&category.optional_fields));
        if let Some(previous) = state.turn_context.as_ref().and_then(|c| c.follow_up_entry()) {
            let known: Vec<&str> = previous
                .structured_data
                .keys()
                .filter(|k| previous.has_field(k))
                .map(String::as_str)
                .collect();
            let _ = writeln!(
                user,
                "This answers earlier follow-up questions. Already known: {}",
                if known.is_empty() { "nothing yet".to_string() } else { known.join(", ") }
            );
        }
        push_context(&mut user, state);
        let _ = write!(user, "\nUser input:\n{}", state.input.content);
        (system, user)
    }

    fn exploratory_prompt(&self, classification: &ClassifierResult, state: &PipelineState) -> (String, String) {
        let system = format!(
            "The user shared something that fits none of our topics yet. Find what is still unclear \
             about it and propose at most {MAX_GAP_QUESTIONS} open-ended questions that help us \
             understand the topic. Reply with JSON only."
        );

        let mut user = String::new();
        if let Some(label) = &classification.suggested_category_label {
            let _ = writeln!(user, "Possible topic: {label}");
        }
        if let Some(summary) = &classification.summary {
            let _ = writeln!(user, "Summary: {summary}");
        }
        push_context(&mut user, state);
        let _ = write!(user, "\nUser input:\n{}", state.input.content);
        (system, user)
    }
}

fn list_or_none(fields: &[String]) -> String {
    if fields.is_empty() { "none".into() } else { fields.join(", ") }
}

fn push_context(out: &mut String, state: &PipelineState) {
    if let Some(summary) = state.context_summary() {
        let _ = writeln!(out, "\nRelated knowledge:\n{summary}");
    }
}

#[async_trait]
impl Stage for GapReasoner {
    fn name(&self) -> StageName {
        StageName::GapReasoning
    }

    async fn run(&self, state: &PipelineState) -> Result<StageUpdate, Error> {
        let classification = state.classification()?;
        let exploratory = is_uncategorized(&classification.category_id);

        let (system, user) = if exploratory {
            self.exploratory_prompt(classification, state)
        } else {
            let category = self
                .domain
                .category(&classification.category_id)
                .ok_or_else(|| Error::not_found("category", &classification.category_id))?;
            self.structured_prompt(category, state)
        };

        let mut result: GapReasoningResult = self.llm.invoke(&system, &user).await?;
        result.follow_up_questions.truncate(MAX_GAP_QUESTIONS);

        debug!(
            category = %classification.category_id,
            exploratory,
            gaps = result.gaps.len(),
            questions = result.follow_up_questions.len(),
            "Gaps identified"
        );
        Ok(StageUpdate::GapReasoning(AgentOutput::new(AgentRole::GapReasoner, result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, heritage_domain};
    use lorekeep_core::schema::UNCATEGORIZED;
    use lorekeep_core::session::{AgentInput, Intent};

    fn state_for(category: &str) -> PipelineState {
        let mut state = PipelineState::new(AgentInput::new("s1", "The old church was built in 1732"), None, None);
        state
            .apply(StageUpdate::Classifier(AgentOutput::new(
                AgentRole::Classifier,
                ClassifierResult {
                    category_id: category.into(),
                    subcategory_id: None,
                    confidence: 0.9,
                    intent: Intent::Content,
                    is_topic_change: None,
                    summary: Some("A water mill by the river".into()),
                    suggested_category_label: Some("Mills".into()),
                    topic_keywords: None,
                },
            )))
            .unwrap();
        state
    }

    fn stage(provider: Arc<ScriptedProvider>) -> GapReasoner {
        GapReasoner::new(StructuredLlm::new(provider, "test"), Arc::new(heritage_domain()))
    }

    fn gaps_of(update: StageUpdate) -> GapReasoningResult {
        match update {
            StageUpdate::GapReasoning(o) => o.result,
            other => panic!("unexpected update {:?}", other.stage()),
        }
    }

    #[tokio::test]
    async fn questions_are_truncated_to_three() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            r#"{"gaps":[{"field":"sources","description":"No source","priority":"high"}],
                "followUpQuestions":["q1","q2","q3","q4","q5"]}"#,
        ]));
        let result = gaps_of(stage(provider).run(&state_for("history")).await.unwrap());
        assert_eq!(result.follow_up_questions, vec!["q1", "q2", "q3"]);
        assert_eq!(result.gaps[0].field, "sources");
    }

    #[tokio::test]
    async fn structured_mode_lists_fields() {
        let provider = Arc::new(ScriptedProvider::new(vec![r#"{"gaps":[],"followUpQuestions":[]}"#]));
        stage(provider.clone()).run(&state_for("history")).await.unwrap();
        let prompt = provider.request(0).prompt_text();
        assert!(prompt.contains("Required fields: period, sources"));
        assert!(prompt.contains("Optional fields: architect"));
    }

    #[tokio::test]
    async fn exploratory_mode_never_mentions_required_fields() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            r#"{"gaps":[],"followUpQuestions":["Who ran the mill?"]}"#,
        ]));
        let result = gaps_of(stage(provider.clone()).run(&state_for(UNCATEGORIZED)).await.unwrap());
        assert_eq!(result.follow_up_questions.len(), 1);

        let prompt = provider.request(0).prompt_text().to_lowercase();
        assert!(!prompt.contains("required fields"));
        assert!(prompt.contains("possible topic: mills"));
        assert!(prompt.contains("a water mill by the river"));
    }

    #[tokio::test]
    async fn unknown_category_is_not_found() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let err = stage(provider.clone()).run(&state_for("geology")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "category", .. }));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn missing_classifier_output_is_pipeline_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let state = PipelineState::new(AgentInput::new("s1", "x"), None, None);
        let err = stage(provider).run(&state).await.unwrap_err();
        assert!(matches!(err, Error::Pipeline(_)));
    }
}
