use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
    },
    Client,
};
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tokio::time::timeout;
use tracing::debug;

use crate::config::LlmConfig;
use crate::provider::llm::{
    CompletionRequest, LanguageModel, LlmError, LlmResponse, LlmResult, ResponseMetadata,
};
use crate::timestamp::Timestamp;

/// OpenAI chat-completion backed language model. The request timeout from
/// [`LlmConfig`] is enforced here, so evaluator call sites see a plain
/// [`LlmError::Timeout`] and fall back deterministically.
pub struct OpenAiChatModel {
    client: Option<Client<OpenAIConfig>>,
    config: LlmConfig,
}

impl OpenAiChatModel {
    /// An unconfigured instance: `is_available` reports false and every call
    /// short-circuits. Useful when the API key is absent at startup.
    pub fn unconfigured(config: LlmConfig) -> Self {
        Self {
            client: None,
            config,
        }
    }

    pub fn new(config: LlmConfig, api_key: SecretString) -> Self {
        let openai_config = OpenAIConfig::new().with_api_key(api_key.expose_secret());
        Self {
            client: Some(Client::with_config(openai_config)),
            config,
        }
    }

    #[tracing::instrument(skip(self, request), fields(model = %self.config.model))]
    async fn chat_completion(&self, request: CompletionRequest) -> LlmResult<LlmResponse> {
        let client = self.client.as_ref().ok_or(LlmError::Unavailable)?;

        debug!(user_prompt = %request.user, "sending chat completion");

        let messages = vec![
            ChatCompletionRequestMessage::System(ChatCompletionRequestSystemMessage {
                content: ChatCompletionRequestSystemMessageContent::Text(request.system),
                name: None,
            }),
            ChatCompletionRequestMessage::User(ChatCompletionRequestUserMessage {
                content: ChatCompletionRequestUserMessageContent::Text(request.user),
                name: None,
            }),
        ];

        let api_request = CreateChatCompletionRequest {
            model: self.config.model.clone(),
            messages,
            temperature: Some(request.temperature),
            max_completion_tokens: Some(request.max_tokens),
            ..Default::default()
        };

        let response = timeout(self.config.request_timeout, client.chat().create(api_request))
            .await
            .map_err(|_| LlmError::Timeout(self.config.request_timeout))?
            .map_err(|e| LlmError::Api(e.to_string()))?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| LlmError::MalformedResponse("no response content".into()))?;

        Ok(LlmResponse {
            content,
            metadata: ResponseMetadata {
                model: self.config.model.clone(),
                created_at: Timestamp::now(),
                token_usage: response
                    .usage
                    .map(|u| (u.prompt_tokens as usize, u.completion_tokens as usize)),
                finish_reason: response
                    .choices
                    .first()
                    .map(|c| format!("{:?}", c.finish_reason)),
            },
        })
    }
}

#[async_trait]
impl LanguageModel for OpenAiChatModel {
    async fn complete(&self, request: CompletionRequest) -> LlmResult<LlmResponse> {
        self.chat_completion(request).await
    }

    fn is_available(&self) -> bool {
        self.client.is_some()
    }

    fn name(&self) -> &str {
        "openai_chat"
    }
}
