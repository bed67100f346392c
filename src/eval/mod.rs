//! The routing evaluation engine.
//!
//! [`evaluator::RoutingEvaluator`] is the central state machine: each call
//! augments the known traits with derived facts, applies immediate-select
//! short-circuits, matches outcome rule conjunctions, and either completes,
//! asks the next trait, or hands a tie to [`tie::TieResolver`].
//!
//! Evaluation is pure given its inputs: the known-traits map is never
//! mutated, and with the language model disabled, identical inputs produce
//! identical results. LLM calls (winner picking, clarifying questions,
//! outcome summaries) are best effort; every one of them has a deterministic
//! fallback.

pub mod evaluator;
pub mod tie;

pub use evaluator::{EvalState, EvaluationResult, ResolutionMode, RoutingEvaluator};
pub use tie::TieResolver;
