//! # consult-core: conversational decision routing
//!
//! This crate decides, one question at a time, which outcome fits a user.
//! Given a declarative [`model::RoutingSpec`] of typed questions ("traits"),
//! derived facts, and candidate outcomes, each evaluation pass determines
//! the single next trait to ask, matches outcome rules after every answer,
//! and resolves ambiguity when several outcomes match at once.
//!
//! ## Pipeline
//!
//! ```text
//! raw answer → TraitParser → typed value → session map
//!                                             │
//!              RoutingSpec ──────────────► RoutingEvaluator
//!                                             │
//!        derived traits → immediate select → outcome matching
//!                                             │
//!                               0 │ 1 │ many matches
//!                          next trait │ done │ TieResolver
//! ```
//!
//! ## Components
//!
//! - [`model`]: the immutable spec — traits, derived expressions,
//!   immediate-select rules, outcomes, tie strategy. Compiled once, shared
//!   read-only across sessions.
//! - [`parser`]: free-form input to a typed [`expression::TraitValue`],
//!   deterministic fast paths with a language-model fallback.
//! - [`derive`] and [`rules`]: pure derived-fact computation and rule
//!   evaluation over the augmented trait map.
//! - [`eval`]: the routing state machine and the tie-resolution ladder.
//! - [`provider`]: the injected language-model capability. Optional by
//!   design: every LLM call site has a deterministic fallback, and with the
//!   model disabled the whole engine is a pure function of its inputs.
//! - [`session`]: caller-owned per-conversation state. This crate persists
//!   nothing and mutates nothing it is given.
//!
//! ## Error posture
//!
//! Nothing here panics on user input or surfaces an LLM failure to the end
//! user. Parse failures come back as retry-eliciting reasons, malformed
//! rules evaluate false, and a spec with no matching outcome and nothing
//! left to ask degrades to its first outcome.

pub mod config;
pub mod derive;
pub mod error;
pub mod eval;
pub mod expression;
pub mod model;
pub mod parser;
pub mod provider;
pub mod rules;
pub mod session;
pub mod timestamp;

pub use config::{EvaluatorConfig, LlmConfig};
pub use error::{Error, InternalResult};
pub use eval::{EvalState, EvaluationResult, ResolutionMode, RoutingEvaluator};
pub use expression::TraitValue;
pub use model::{RoutingSpec, SpecError, SpecWarning};
pub use parser::{TraitParseResult, TraitParser};
pub use provider::{LanguageModel, LlmError};
pub use session::Session;
