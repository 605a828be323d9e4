//! Schema evolution for lorekeep.
//!
//! The domain schema is not fixed forever: captures that fit no category,
//! fields that keep turning up undeclared, and required fields nobody can
//! answer all feed [`EvolutionEngine`] proposals. Depending on the domain's
//! evolution mode those are applied automatically or wait for review.

pub mod engine;
pub mod patterns;

pub use engine::{CONFIDENCE_CAP, EvolutionEngine, EvolutionSettings, REQUIRED_SHARE};
pub use patterns::{Cluster, ClusterSettings, FieldCandidate, detect_patterns, slugify, undeclared_fields};
