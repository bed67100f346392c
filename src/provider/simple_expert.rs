use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use crate::provider::llm::{
    CompletionRequest, LanguageModel, LlmError, LlmResponse, LlmResult, ResponseMetadata,
};
use crate::timestamp::Timestamp;

type Pattern = String;

type Answer = String;

/// Deterministic stand-in for a real language model: replies are looked up
/// by substring match against the user prompt. Used in tests and offline
/// demos where reproducible dialogue is required.
#[derive(Debug, Default, Clone)]
pub struct SimpleExpertModel {
    knowledge: HashMap<Pattern, Answer>,
}

impl SimpleExpertModel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reply(mut self, pattern: impl Into<Pattern>, answer: impl Into<Answer>) -> Self {
        self.knowledge.insert(pattern.into(), answer.into());
        self
    }

    fn lookup(&self, prompt: &str) -> Option<String> {
        self.knowledge
            .iter()
            .find(|(pattern, _)| prompt.contains(pattern.as_str()))
            .map(|(_, answer)| answer.clone())
    }
}

#[async_trait]
impl LanguageModel for SimpleExpertModel {
    #[tracing::instrument(skip(self, request), level = "debug")]
    async fn complete(&self, request: CompletionRequest) -> LlmResult<LlmResponse> {
        let answer = self
            .lookup(&request.user)
            .ok_or_else(|| LlmError::Api("no canned reply matches prompt".to_string()))?;
        debug!(answer = %answer, "simple expert reply");
        Ok(LlmResponse {
            content: answer,
            metadata: ResponseMetadata {
                model: "simple_expert".to_string(),
                created_at: Timestamp::now(),
                token_usage: None,
                finish_reason: None,
            },
        })
    }

    fn is_available(&self) -> bool {
        true
    }

    fn name(&self) -> &str {
        "simple_expert"
    }
}
