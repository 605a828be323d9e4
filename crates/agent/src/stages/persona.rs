//! Persona responder: writes the reply in the configured voice.

use async_trait::async_trait;
use lorekeep_core::error::Error;
use lorekeep_core::schema::{Formality, PersonaVoice};
use lorekeep_core::session::Intent;
use std::fmt::Write as _;
use tracing::debug;

use crate::llm::{ModelOutput, StructuredLlm};
use crate::pipeline::Stage;
use crate::state::{AgentOutput, AgentRole, Gap, PersonaResult, PipelineState, StageName, StageUpdate};

/// Gaps surfaced to the reply prompt.
pub const MAX_PROMPT_GAPS: usize = 3;

impl ModelOutput for PersonaResult {
    const NAME: &'static str = "persona_output";

    fn json_schema() -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "response": {"type": "string"},
                "followUpQuestions": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["response", "followUpQuestions"]
        })
    }

    fn issues(&self) -> Vec<String> {
        if self.response.trim().is_empty() {
            vec!["response: must not be empty".into()]
        } else {
            Vec::new()
        }
    }
}

/// The highest-priority gaps, high before medium before low, original
/// order kept within a priority.
pub fn top_gaps(gaps: &[Gap]) -> Vec<&Gap> {
    let mut ordered: Vec<&Gap> = gaps.iter().collect();
    ordered.sort_by_key(|g| g.priority.rank());
    ordered.truncate(MAX_PROMPT_GAPS);
    ordered
}

pub struct PersonaResponder {
    llm: StructuredLlm,
    voice: PersonaVoice,
}

impl PersonaResponder {
    pub fn new(llm: StructuredLlm, voice: PersonaVoice) -> Self {
        Self { llm, voice }
    }

    fn system_prompt(&self) -> String {
        let voice = &self.voice;
        let formality = match voice.formality {
            Formality::Formal => "formal",
            Formality::Neutral => "neutral",
            Formality::Casual => "casual",
        };
        let mut prompt = format!(
            "You are {}, a {} interviewer who collects local knowledge. Keep a {} register and \
             answer in language \"{}\".",
            voice.name, voice.tonality, formality, voice.language
        );
        if let Some(address) = &voice.address_form {
            let _ = write!(prompt, " Address the user as \"{address}\".");
        }
        if voice.storytelling {
            prompt.push_str(" Weave short anecdotes into your reply where they fit.");
        }
        let _ = write!(
            prompt,
            " Ask at most {} follow-up questions. Reply with JSON only.",
            voice.max_follow_up_questions
        );
        prompt
    }

    fn user_message(&self, state: &PipelineState) -> String {
        let mut message = format!("User said:\n{}\n\n", state.input.content);

        match state.intent() {
            Some(Intent::Greeting) => {
                message.push_str("The user is greeting you. Greet them back and invite them to share what they know.");
            }
            Some(Intent::ProactiveRequest) => {
                message.push_str("The user wants you to suggest what to talk about. Propose one topic to start with.");
                push_context(&mut message, state);
            }
            Some(Intent::DontKnow) => {
                message.push_str("The user does not know the answer. Reassure them and move on to something else.");
            }
            Some(Intent::Content) | None => self.content_instructions(&mut message, state),
        }

        if let Some(ctx) = &state.turn_context
            && ctx.is_follow_up
            && !ctx.asked_questions.is_empty()
        {
            let _ = write!(
                message,
                "\n\nThis turn answers earlier questions. Do not repeat any of these:\n- {}",
                ctx.asked_questions.join("\n- ")
            );
        }
        message
    }

    fn content_instructions(&self, message: &mut String, state: &PipelineState) {
        let (gaps, questions) = match state.gaps() {
            Some(g) => (top_gaps(&g.gaps), g.follow_up_questions.as_slice()),
            None => (Vec::new(), &[][..]),
        };

        // No gaps means nothing to ask, even if the reasoner drafted questions
        if gaps.is_empty() {
            message.push_str(
                "Everything we need is known. Thank the user warmly and close this topic without asking anything.",
            );
            return;
        }

        message.push_str("Acknowledge what the user shared. Still missing:\n");
        for gap in gaps {
            let _ = writeln!(message, "- {} ({:?}): {}", gap.field, gap.priority, gap.description);
        }
        if !questions.is_empty() {
            let _ = write!(message, "\nSuggested questions:\n- {}", questions.join("\n- "));
        }
    }
}

fn push_context(out: &mut String, state: &PipelineState) {
    if let Some(summary) = state.context_summary() {
        let _ = write!(out, "\n\nWhat we already know:\n{summary}");
    }
}

#[async_trait]
impl Stage for PersonaResponder {
    fn name(&self) -> StageName {
        StageName::Persona
    }

    async fn run(&self, state: &PipelineState) -> Result<StageUpdate, Error> {
        let mut result: PersonaResult = self
            .llm
            .invoke(&self.system_prompt(), &self.user_message(state))
            .await?;
        result.follow_up_questions.truncate(self.voice.max_follow_up_questions);
        debug!(questions = result.follow_up_questions.len(), "Reply rendered");
        Ok(StageUpdate::Persona(AgentOutput::new(AgentRole::Persona, result)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ClassifierResult, GapReasoningResult, Priority};
    use crate::test_helpers::ScriptedProvider;
    use lorekeep_core::session::{AgentInput, TurnContext};
    use std::sync::Arc;

    fn gap(field: &str, priority: Priority) -> Gap {
        Gap {
            field: field.into(),
            description: format!("{field} unknown"),
            priority,
        }
    }

    fn state_with(intent: Intent, gaps: Option<GapReasoningResult>, ctx: Option<TurnContext>) -> PipelineState {
        let mut state = PipelineState::new(AgentInput::new("s1", "It was built in 1732"), ctx, None);
        state
            .apply(StageUpdate::Classifier(AgentOutput::new(
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
            )))
            .unwrap();
        if let Some(g) = gaps {
            state
                .apply(StageUpdate::GapReasoning(AgentOutput::new(AgentRole::GapReasoner, g)))
                .unwrap();
        }
        state
    }

    fn responder(provider: Arc<ScriptedProvider>, max_questions: usize) -> PersonaResponder {
        let voice = PersonaVoice {
            max_follow_up_questions: max_questions,
            ..PersonaVoice::default()
        };
        PersonaResponder::new(StructuredLlm::new(provider, "test"), voice)
    }

    #[test]
    fn top_gaps_is_stable_priority_order() {
        let gaps = vec![
            gap("a_low", Priority::Low),
            gap("b_high", Priority::High),
            gap("c_medium", Priority::Medium),
            gap("d_high", Priority::High),
        ];
        let fields: Vec<&str> = top_gaps(&gaps).iter().map(|g| g.field.as_str()).collect();
        assert_eq!(fields, vec!["b_high", "d_high", "c_medium"]);
    }

    #[tokio::test]
    async fn prompt_surfaces_only_top_three_gaps() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            r#"{"response":"Thanks! Do you know a source?","followUpQuestions":["Source?"]}"#,
        ]));
        let gaps = GapReasoningResult {
            gaps: vec![
                gap("trivia_field", Priority::Low),
                gap("sources", Priority::High),
                gap("architect", Priority::Medium),
                gap("builder", Priority::High),
                gap("footnote_field", Priority::Low),
            ],
            follow_up_questions: vec![],
            reasoning: None,
        };
        responder(provider.clone(), 2)
            .run(&state_with(Intent::Content, Some(gaps), None))
            .await
            .unwrap();

        let prompt = provider.request(0).prompt_text();
        assert!(prompt.contains("sources"));
        assert!(prompt.contains("builder"));
        assert!(prompt.contains("architect"));
        assert!(!prompt.contains("trivia_field"));
        assert!(!prompt.contains("footnote_field"));
    }

    #[tokio::test]
    async fn questions_truncated_to_voice_limit() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            r#"{"response":"Lovely.","followUpQuestions":["a","b","c"]}"#,
        ]));
        let update = responder(provider, 1)
            .run(&state_with(Intent::Content, None, None))
            .await
            .unwrap();
        let StageUpdate::Persona(out) = update else { panic!("expected persona update") };
        assert_eq!(out.result.follow_up_questions, vec!["a"]);
    }

    #[tokio::test]
    async fn no_gaps_asks_for_closing() {
        let provider = Arc::new(ScriptedProvider::new(vec![r#"{"response":"Thank you!","followUpQuestions":[]}"#]));
        let empty = GapReasoningResult { gaps: vec![], follow_up_questions: vec![], reasoning: None };
        responder(provider.clone(), 2)
            .run(&state_with(Intent::Content, Some(empty), None))
            .await
            .unwrap();
        assert!(provider.request(0).prompt_text().contains("close this topic"));
    }

    #[tokio::test]
    async fn empty_gaps_close_even_with_drafted_questions() {
        let provider = Arc::new(ScriptedProvider::new(vec![r#"{"response":"Thank you!","followUpQuestions":[]}"#]));
        let exploratory = GapReasoningResult {
            gaps: vec![],
            follow_up_questions: vec!["Who ran it?".into()],
            reasoning: None,
        };
        responder(provider.clone(), 2)
            .run(&state_with(Intent::Content, Some(exploratory), None))
            .await
            .unwrap();
        let prompt = provider.request(0).prompt_text();
        assert!(prompt.contains("close this topic"));
        assert!(!prompt.contains("Who ran it?"));
    }

    #[tokio::test]
    async fn follow_up_lists_questions_not_to_repeat() {
        let provider = Arc::new(ScriptedProvider::new(vec![r#"{"response":"Great.","followUpQuestions":[]}"#]));
        let ctx = TurnContext {
            turn_number: 2,
            is_follow_up: true,
            previous_turns: vec![],
            previous_entry: None,
            asked_questions: vec!["Where did you read that?".into()],
        };
        responder(provider.clone(), 2)
            .run(&state_with(Intent::Content, None, Some(ctx)))
            .await
            .unwrap();
        let prompt = provider.request(0).prompt_text();
        assert!(prompt.contains("Do not repeat"));
        assert!(prompt.contains("Where did you read that?"));
    }

    #[tokio::test]
    async fn malformed_reply_is_validation_error() {
        let provider = Arc::new(ScriptedProvider::new(vec![r#"{"reply":"hi"}"#]));
        let err = responder(provider, 2)
            .run(&state_with(Intent::Greeting, None, None))
            .await
            .unwrap_err();
        assert!(err.is_validation());
    }
}
