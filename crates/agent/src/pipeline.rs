//! The turn orchestrator.
//!
//! A run is a small fixed state machine over five stages:
//!
//! ```text
//! START → classifier ─┬─ greeting ──────────────────────────────→ persona → END
//!                     └─ otherwise → contextDispatcher → gapReasoning → persona ─┬─ content → structuring → END
//!                                                                                └─ otherwise → END
//! ```
//!
//! After each stage the driver applies its update to [`PipelineState`] and
//! asks [`transition`] for the next node. Stage errors abort the run; the
//! orchestrator never catches or retries them.

use async_trait::async_trait;
use lorekeep_core::error::Error;
use lorekeep_core::provider::EmbeddingClient;
use lorekeep_core::schema::{DomainSchema, PersonaVoice};
use lorekeep_core::session::{AgentInput, Intent, TurnContext};
use lorekeep_core::store::KnowledgeRepository;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

use crate::llm::StructuredLlm;
use crate::stages::context_dispatcher::RetrievalSettings;
use crate::stages::{Classifier, ContextDispatcher, GapReasoner, PersonaResponder, Structurer};
use crate::state::{PipelineState, StageName, StageUpdate};

/// One node of the stage graph.
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> StageName;

    /// Read the accumulated state and return this stage's update.
    async fn run(&self, state: &PipelineState) -> Result<StageUpdate, Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    Stage(StageName),
    End,
}

/// The node after `current`, judged from the state it left behind.
pub fn transition(current: StageName, state: &PipelineState) -> Result<Next, Error> {
    let intent = state.classification()?.intent;
    let next = match current {
        StageName::Classifier if intent == Intent::Greeting => Next::Stage(StageName::Persona),
        StageName::Classifier => Next::Stage(StageName::ContextDispatcher),
        StageName::ContextDispatcher => Next::Stage(StageName::GapReasoning),
        StageName::GapReasoning => Next::Stage(StageName::Persona),
        StageName::Persona if intent.is_content() => Next::Stage(StageName::Structuring),
        StageName::Persona | StageName::Structuring => Next::End,
    };
    Ok(next)
}

/// Collaborators shared by every run.
#[derive(Clone)]
pub struct PipelineDeps {
    pub llm: StructuredLlm,
    pub embedder: Option<Arc<dyn EmbeddingClient>>,
    pub knowledge: Option<Arc<dyn KnowledgeRepository>>,
    pub retrieval: RetrievalSettings,
}

/// Per-run options.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub turn_context: Option<TurnContext>,
    /// Hint for the classifier only; routing ignores it.
    pub active_category: Option<String>,
}

pub struct Pipeline {
    classifier: Arc<dyn Stage>,
    context_dispatcher: Arc<dyn Stage>,
    gap_reasoning: Arc<dyn Stage>,
    persona: Arc<dyn Stage>,
    structuring: Arc<dyn Stage>,
}

impl Pipeline {
    /// Wire the standard stages against one domain and persona voice.
    pub fn new(deps: &PipelineDeps, domain: Arc<DomainSchema>, voice: PersonaVoice) -> Self {
        Self {
            classifier: Arc::new(Classifier::new(deps.llm.clone(), domain.clone())),
            context_dispatcher: Arc::new(ContextDispatcher::new(
                deps.embedder.clone(),
                deps.knowledge.clone(),
                domain.id.clone(),
                deps.retrieval.clone(),
            )),
            gap_reasoning: Arc::new(GapReasoner::new(deps.llm.clone(), domain.clone())),
            persona: Arc::new(PersonaResponder::new(deps.llm.clone(), voice)),
            structuring: Arc::new(Structurer::new(deps.llm.clone(), domain)),
        }
    }

    /// Assemble from arbitrary stage implementations.
    pub fn from_stages(
        classifier: Arc<dyn Stage>,
        context_dispatcher: Arc<dyn Stage>,
        gap_reasoning: Arc<dyn Stage>,
        persona: Arc<dyn Stage>,
        structuring: Arc<dyn Stage>,
    ) -> Self {
        Self {
            classifier,
            context_dispatcher,
            gap_reasoning,
            persona,
            structuring,
        }
    }

    fn stage(&self, name: StageName) -> &Arc<dyn Stage> {
        match name {
            StageName::Classifier => &self.classifier,
            StageName::ContextDispatcher => &self.context_dispatcher,
            StageName::GapReasoning => &self.gap_reasoning,
            StageName::Persona => &self.persona,
            StageName::Structuring => &self.structuring,
        }
    }

    /// Run one turn to completion and return the final state.
    pub async fn run(&self, input: AgentInput, options: RunOptions) -> Result<PipelineState, Error> {
        let started = Instant::now();
        let mut state = PipelineState::new(input, options.turn_context, options.active_category);
        let mut current = StageName::Classifier;

        info!(
            session_id = %state.session_id,
            follow_up = state.is_follow_up(),
            "Pipeline run starting"
        );

        loop {
            let stage_started = Instant::now();
            let update = self.stage(current).run(&state).await?;
            if update.stage() != current {
                return Err(Error::Pipeline(format!(
                    "stage {current} returned an update for {}",
                    update.stage()
                )));
            }
            state.apply(update)?;
            debug!(
                stage = %current,
                elapsed_ms = stage_started.elapsed().as_millis() as u64,
                "Stage complete"
            );

            match transition(current, &state)? {
                Next::Stage(next) => current = next,
                Next::End => break,
            }
        }

        info!(
            session_id = %state.session_id,
            intent = ?state.intent(),
            structured = state.structuring_output.is_some(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Pipeline run complete"
        );
        Ok(state)
    }
}
