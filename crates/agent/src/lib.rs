//! The turn pipeline: the heart of lorekeep.
//!
//! Each user utterance runs through up to five stages:
//!
//! 1. **Classify** the input into a category and an intent
//! 2. **Dispatch context** from related knowledge entries
//! 3. **Reason about gaps** in the category's structured fields
//! 4. **Respond** in the persona's voice, asking about the top gaps
//! 5. **Structure** the turn into a knowledge entry, merging follow-ups
//!
//! Greetings skip straight to the persona; only content turns are
//! structured. The [`SessionManager`] wraps runs with cross-turn memory
//! and persistence.

pub mod enrichment;
pub mod llm;
pub mod pipeline;
pub mod session;
pub mod stages;
pub mod state;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use enrichment::{ClaimValidator, MAX_CLAIMS};
pub use llm::{ModelOutput, StructuredLlm};
pub use pipeline::{Next, Pipeline, PipelineDeps, RunOptions, Stage, transition};
pub use session::{SessionManager, TurnOutcome, build_turn_context};
pub use stages::context_dispatcher::{NO_CONTEXT, RetrievalSettings};
pub use state::{
    AgentOutput, AgentRole, ClassifierResult, ContextResult, Gap, GapReasoningResult, PersonaResult,
    PipelineState, Priority, StageName, StageUpdate, StructuringResult,
};
