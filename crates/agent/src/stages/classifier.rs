//! Classifier: assigns a category and an intent to the user's utterance.

use async_trait::async_trait;
use lorekeep_core::error::Error;
use lorekeep_core::schema::{DomainSchema, UNCATEGORIZED, is_uncategorized};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::debug;

use crate::llm::{ModelOutput, StructuredLlm};
use crate::pipeline::Stage;
use crate::state::{AgentOutput, AgentRole, ClassifierResult, PipelineState, StageName, StageUpdate};

/// How many prior turns the classifier sees.
const RECENT_TURNS: usize = 3;

impl ModelOutput for ClassifierResult {
    const NAME: &'static str = "classifier_output";

    fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "categoryId": {"type": "string"},
                "subcategoryId": {"type": ["string", "null"]},
                "confidence": {"type": "number", "minimum": 0, "maximum": 1},
                "intent": {"type": "string", "enum": ["content", "greeting", "proactive_request", "dont_know"]},
                "isTopicChange": {"type": ["boolean", "null"]},
                "summary": {"type": ["string", "null"]},
                "suggestedCategoryLabel": {"type": ["string", "null"]},
                "topicKeywords": {"type": ["array", "null"], "items": {"type": "string"}}
            },
            "required": ["categoryId", "confidence", "intent"]
        })
    }

    fn issues(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.category_id.trim().is_empty() {
            issues.push("categoryId: must not be empty".into());
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            issues.push(format!("confidence: {} outside [0, 1]", self.confidence));
        }
        issues
    }
}

pub struct Classifier {
    llm: StructuredLlm,
    domain: Arc<DomainSchema>,
}

impl Classifier {
    pub fn new(llm: StructuredLlm, domain: Arc<DomainSchema>) -> Self {
        Self { llm, domain }
    }

    fn system_prompt(&self) -> String {
        let mut prompt = format!(
            "You classify what a user shares in a conversation that collects knowledge about {}.\n\nCategories:\n",
            self.domain.name
        );
        for category in &self.domain.categories {
            let _ = writeln!(prompt, "- {}: {}. {}", category.id, category.label, category.description);
        }
        let _ = write!(
            prompt,
            "\nIntents:\n\
             - content: the user shares information worth recording\n\
             - greeting: small talk or a greeting without information\n\
             - proactive_request: the user asks you to suggest a topic\n\
             - dont_know: the user cannot answer the last question\n\n\
             Use categoryId \"{UNCATEGORIZED}\" when no category fits. In that case also give a \
             short suggestedCategoryLabel and a few topicKeywords. Reply with JSON only."
        );
        prompt
    }

    fn user_message(&self, state: &PipelineState) -> String {
        let mut message = String::new();
        if let Some(active) = &state.active_category {
            let _ = writeln!(message, "The conversation so far was about category: {active}");
        }
        if let Some(ctx) = &state.turn_context {
            let recent = ctx.previous_turns.iter().rev().take(RECENT_TURNS).collect::<Vec<_>>();
            if !recent.is_empty() {
                message.push_str("Recent turns:\n");
                for turn in recent.into_iter().rev() {
                    let _ = writeln!(message, "User: {}\nAssistant: {}", turn.user_input, turn.response);
                }
            }
        }
        let _ = write!(message, "\nClassify this input:\n{}", state.input.content);
        message
    }

    /// Unknown category ids collapse to the sentinel.
    fn resolve(&self, mut result: ClassifierResult) -> ClassifierResult {
        if !is_uncategorized(&result.category_id) && self.domain.category(&result.category_id).is_none() {
            debug!(guessed = %result.category_id, "Unknown category, treating as uncategorized");
            result.category_id = UNCATEGORIZED.to_string();
        }
        if is_uncategorized(&result.category_id) {
            result.subcategory_id = None;
        }
        result
    }
}

#[async_trait]
impl Stage for Classifier {
    fn name(&self) -> StageName {
        StageName::Classifier
    }

    async fn run(&self, state: &PipelineState) -> Result<StageUpdate, Error> {
        let raw: ClassifierResult = self
            .llm
            .invoke(&self.system_prompt(), &self.user_message(state))
            .await?;
        let result = self.resolve(raw);
        debug!(
            category = %result.category_id,
            intent = %result.intent,
            confidence = result.confidence,
            "Classified input"
        );
        Ok(StageUpdate::Classifier(AgentOutput::new(AgentRole::Classifier, result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ScriptedProvider, heritage_domain};
    use lorekeep_core::session::{AgentInput, Intent};

    async fn classify(reply: &str) -> (Arc<ScriptedProvider>, Result<StageUpdate, Error>) {
        let provider = Arc::new(ScriptedProvider::new(vec![reply]));
        let stage = Classifier::new(
            StructuredLlm::new(provider.clone(), "test"),
            Arc::new(heritage_domain()),
        );
        let state = PipelineState::new(
            AgentInput::new("s1", "The old church was built in 1732"),
            None,
            Some("history".into()),
        );
        let result = stage.run(&state).await;
        (provider, result)
    }

    fn result_of(update: StageUpdate) -> ClassifierResult {
        match update {
            StageUpdate::Classifier(o) => o.result,
            other => panic!("unexpected update {:?}", other.stage()),
        }
    }

    #[tokio::test]
    async fn known_category_passes_through() {
        let (provider, update) =
            classify(r#"{"categoryId":"history","confidence":0.92,"intent":"content"}"#).await;
        let result = result_of(update.unwrap());
        assert_eq!(result.category_id, "history");
        assert_eq!(result.intent, Intent::Content);

        let request = provider.request(0);
        let system = request.system_prompt().unwrap();
        assert!(system.contains("- history: History"));
        assert!(request.prompt_text().contains("category: history"));
    }

    #[tokio::test]
    async fn unknown_category_becomes_sentinel() {
        let (_, update) = classify(
            r#"{"categoryId":"geology","subcategoryId":"rocks","confidence":0.6,"intent":"content"}"#,
        )
        .await;
        let result = result_of(update.unwrap());
        assert_eq!(result.category_id, UNCATEGORIZED);
        assert!(result.subcategory_id.is_none());
    }

    #[tokio::test]
    async fn out_of_range_confidence_is_validation_error() {
        let (_, update) = classify(r#"{"categoryId":"history","confidence":1.7,"intent":"content"}"#).await;
        assert!(update.unwrap_err().is_validation());
    }

    #[tokio::test]
    async fn unknown_intent_is_validation_error() {
        let (_, update) = classify(r#"{"categoryId":"history","confidence":0.5,"intent":"rant"}"#).await;
        assert!(update.unwrap_err().is_validation());
    }
}
