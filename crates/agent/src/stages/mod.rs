//! The five pipeline stages.
//!
//! Each stage reads the accumulated [`PipelineState`](crate::state::PipelineState)
//! and returns exactly one [`StageUpdate`](crate::state::StageUpdate). Stages
//! hold no mutable state of their own, so one set of stages can serve
//! concurrent runs.

pub mod classifier;
pub mod context_dispatcher;
pub mod gap_reasoner;
pub mod persona;
pub mod structurer;

pub use classifier::Classifier;
pub use context_dispatcher::ContextDispatcher;
pub use gap_reasoner::{GapReasoner, MAX_GAP_QUESTIONS};
pub use persona::{MAX_PROMPT_GAPS, PersonaResponder};
pub use structurer::Structurer;
