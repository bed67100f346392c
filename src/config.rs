use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Top-level configuration for the routing evaluator.
///
/// Everything here has a sensible default so an empty `{}` deserializes to a
/// working configuration. Timeouts are serialized as milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default)]
    pub llm: LlmConfig,

    /// When false, outcome summaries are never requested from the LLM even
    /// if a provider is configured.
    #[serde(default = "default_true")]
    pub summarize_outcomes: bool,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig::default(),
            summarize_outcomes: default_true(),
        }
    }
}

/// Sampling and transport settings for language-model calls.
///
/// Extraction calls (trait parsing, winner picking) run cold; generation
/// calls (clarifying questions, summaries) run warmer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_extraction_temperature")]
    pub extraction_temperature: f32,

    #[serde(default = "default_generation_temperature")]
    pub generation_temperature: f32,

    #[serde(default = "default_extraction_max_tokens")]
    pub extraction_max_tokens: u32,

    #[serde(default = "default_generation_max_tokens")]
    pub generation_max_tokens: u32,

    #[serde(default = "default_request_timeout", with = "duration_ms")]
    pub request_timeout: Duration,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            extraction_temperature: default_extraction_temperature(),
            generation_temperature: default_generation_temperature(),
            extraction_max_tokens: default_extraction_max_tokens(),
            generation_max_tokens: default_generation_max_tokens(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_extraction_temperature() -> f32 {
    0.0
}

fn default_generation_temperature() -> f32 {
    0.7
}

fn default_extraction_max_tokens() -> u32 {
    256
}

fn default_generation_max_tokens() -> u32 {
    512
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
