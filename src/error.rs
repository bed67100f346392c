use thiserror::Error;

use crate::expression::ExpressionError;
use crate::model::SpecError;
use crate::provider::llm::LlmError;

/// Crate-level error. Note that evaluation and parsing never return this to
/// callers: parse failures are carried as user-facing reasons inside
/// [`crate::parser::TraitParseResult`], and LLM failures degrade to
/// deterministic fallbacks. Only spec loading surfaces errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Spec error: {0}")]
    Spec(#[from] SpecError),
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),
    #[error("Language model error: {0}")]
    Llm(#[from] LlmError),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
