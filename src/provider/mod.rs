//! The language-model collaborator boundary.
//!
//! Everything LLM-shaped goes through the [`llm::LanguageModel`] trait. The
//! evaluator treats the model as a best-effort capability: every call site
//! has a deterministic fallback, and a missing or failing model never
//! surfaces as an error to the end user.

pub mod llm;
pub mod openai_chat;
pub mod simple_expert;

pub use llm::{
    CompletionRequest, DisabledModel, LanguageModel, LlmError, LlmResponse, LlmResult,
    ResponseMetadata,
};
