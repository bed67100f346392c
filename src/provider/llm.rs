use async_trait::async_trait;
use thiserror::Error;

use crate::timestamp::Timestamp;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum LlmError {
    #[error("language model not configured")]
    Unavailable,
    #[error("language model call timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("language model API error: {0}")]
    Api(String),
    #[error("malformed language model response: {0}")]
    MalformedResponse(String),
}

pub type LlmResult<T> = Result<T, LlmError>;

/// One prompt-completion call. Sampling parameters come from
/// [`crate::config::LlmConfig`]; call sites pick extraction or generation
/// settings via the helpers below.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl CompletionRequest {
    /// Cold sampling for extraction-style calls (parsing, winner picking).
    pub fn extraction(
        config: &crate::config::LlmConfig,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: config.extraction_max_tokens,
            temperature: config.extraction_temperature,
        }
    }

    /// Warmer sampling for generative calls (clarifying questions, summaries).
    pub fn generation(
        config: &crate::config::LlmConfig,
        system: impl Into<String>,
        user: impl Into<String>,
    ) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            max_tokens: config.generation_max_tokens,
            temperature: config.generation_temperature,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct LlmResponse {
    pub content: String,
    pub metadata: ResponseMetadata,
}

#[derive(Debug, Default, Clone)]
pub struct ResponseMetadata {
    pub model: String,
    pub created_at: Timestamp,
    pub token_usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
}

type TokenUsage = (usize, usize);

/// The language-model collaborator. Implementations must be cheap to probe
/// via [`LanguageModel::is_available`] so unconfigured deployments skip LLM
/// paths entirely.
#[mockall::automock]
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> LlmResult<LlmResponse>;

    fn is_available(&self) -> bool;

    fn name(&self) -> &str;
}

/// The no-LLM deployment. Every call reports unavailability, which pushes
/// the evaluator onto its deterministic fallback branches.
#[derive(Debug, Default, Clone)]
pub struct DisabledModel;

#[async_trait]
impl LanguageModel for DisabledModel {
    async fn complete(&self, _request: CompletionRequest) -> LlmResult<LlmResponse> {
        Err(LlmError::Unavailable)
    }

    fn is_available(&self) -> bool {
        false
    }

    fn name(&self) -> &str {
        "disabled"
    }
}
