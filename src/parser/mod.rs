//! Trait parsing: free-form user input to a typed [`TraitValue`].
//!
//! Every answer type has a deterministic fast path; the language model is
//! only consulted when that path fails (or, for text and enum answers, when
//! a parse hint says quality matters). Parsing is stateless: the session is
//! read only to log how many prior attempts failed for the same trait, and
//! never changes parsing behavior. Failures come back as a user-facing
//! reason string in [`TraitParseResult`], never as an error.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use tracing::debug;

use crate::config::EvaluatorConfig;
use crate::expression::TraitValue;
use crate::model::{AnswerType, TraitDefinition};
use crate::provider::llm::{CompletionRequest, LanguageModel};
use crate::session::Session;

/// Inclusive bound applied to integer-list elements. The lists this system
/// collects are ages.
pub const LIST_ELEMENT_MIN: i64 = 0;
pub const LIST_ELEMENT_MAX: i64 = 120;

const SENTINEL_NONE: &str = "NONE";
const SENTINEL_INVALID: &str = "INVALID";
const SENTINEL_UNKNOWN: &str = "UNKNOWN";

const EXTRACTION_SYSTEM_PROMPT: &str =
    "You extract structured answers from conversational replies. \
     Reply with the extracted value only, no commentary.";

lazy_static! {
    static ref DIGIT_RUN: Regex = Regex::new(r"\d+").unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitParseResult {
    pub is_valid: bool,
    pub value: Option<TraitValue>,
    pub error_reason: Option<String>,
}

impl TraitParseResult {
    fn valid(value: TraitValue) -> Self {
        Self {
            is_valid: true,
            value: Some(value),
            error_reason: None,
        }
    }

    fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            value: None,
            error_reason: Some(reason.into()),
        }
    }
}

pub struct TraitParser {
    llm: Arc<dyn LanguageModel>,
    config: EvaluatorConfig,
}

impl TraitParser {
    pub fn new(llm: Arc<dyn LanguageModel>, config: EvaluatorConfig) -> Self {
        Self { llm, config }
    }

    /// Parse one answer for one trait. Never returns an error; every failure
    /// path produces a retry-eliciting reason instead.
    pub async fn parse(
        &self,
        raw_input: &str,
        definition: &TraitDefinition,
        session: &Session,
    ) -> TraitParseResult {
        debug!(
            trait_key = %definition.key,
            answer_type = %definition.answer_type,
            prior_failures = session.failure_count(&definition.key),
            "parsing answer"
        );

        match definition.answer_type {
            AnswerType::Integer => self.parse_integer(raw_input, definition).await,
            AnswerType::IntegerList => self.parse_integer_list(raw_input, definition).await,
            AnswerType::Text => self.parse_text(raw_input, definition).await,
            AnswerType::Enum => self.parse_enum(raw_input, definition).await,
            AnswerType::EnumList => self.parse_enum_list(raw_input, definition).await,
        }
    }

    async fn parse_integer(&self, raw_input: &str, definition: &TraitDefinition) -> TraitParseResult {
        if let Some(run) = DIGIT_RUN.find(raw_input) {
            if let Ok(value) = run.as_str().parse::<i64>() {
                return self.check_bounds(value, definition);
            }
        }

        if !self.llm.is_available() {
            return TraitParseResult::invalid("Please answer with a number.");
        }

        let request = CompletionRequest::extraction(
            &self.config.llm,
            EXTRACTION_SYSTEM_PROMPT,
            format!(
                "Extract a single integer from the reply below, converting number words \
                 (e.g. \"forty two\" -> 42). Reply {} if impossible.\nReply: {}",
                SENTINEL_NONE, raw_input
            ),
        );
        match self.llm.complete(request).await {
            Ok(response) => {
                let text = response.content.trim();
                if text.eq_ignore_ascii_case(SENTINEL_NONE) {
                    return TraitParseResult::invalid("Please answer with a number.");
                }
                match DIGIT_RUN
                    .find(text)
                    .and_then(|run| run.as_str().parse::<i64>().ok())
                {
                    Some(value) => self.check_bounds(value, definition),
                    None => TraitParseResult::invalid("Please answer with a number."),
                }
            }
            Err(e) => {
                debug!(error = %e, "integer extraction fallback failed");
                TraitParseResult::invalid("Please answer with a number.")
            }
        }
    }

    async fn parse_integer_list(
        &self,
        raw_input: &str,
        definition: &TraitDefinition,
    ) -> TraitParseResult {
        let (min, max) = list_bounds(definition);
        let values = extract_bounded_ints(raw_input, min, max);
        if !values.is_empty() {
            return TraitParseResult::valid(TraitValue::IntList(values));
        }

        if self.llm.is_available() {
            let request = CompletionRequest::extraction(
                &self.config.llm,
                EXTRACTION_SYSTEM_PROMPT,
                format!(
                    "Extract a comma-separated list of integers between {} and {} from the \
                     reply below, converting number words. Reply {} if impossible.\nReply: {}",
                    min, max, SENTINEL_NONE, raw_input
                ),
            );
            if let Ok(response) = self.llm.complete(request).await {
                let text = response.content.trim();
                if !text.eq_ignore_ascii_case(SENTINEL_NONE) {
                    let values = extract_bounded_ints(text, min, max);
                    if !values.is_empty() {
                        return TraitParseResult::valid(TraitValue::IntList(values));
                    }
                }
            }
        }

        TraitParseResult::invalid(format!(
            "Please list numbers between {} and {}, separated by commas.",
            min, max
        ))
    }

    async fn parse_text(&self, raw_input: &str, definition: &TraitDefinition) -> TraitParseResult {
        let trimmed = raw_input.trim();
        if trimmed.is_empty() {
            return TraitParseResult::invalid("Please type an answer.");
        }

        let Some(hint) = definition.parse_hint.as_deref() else {
            return TraitParseResult::valid(TraitValue::Str(trimmed.to_string()));
        };
        if !self.llm.is_available() {
            return TraitParseResult::valid(TraitValue::Str(trimmed.to_string()));
        }

        let request = CompletionRequest::extraction(
            &self.config.llm,
            EXTRACTION_SYSTEM_PROMPT,
            format!(
                "Clean up the reply below according to this guidance: {}\n\
                 Reply {} if the reply cannot satisfy the guidance.\nReply: {}",
                hint, SENTINEL_INVALID, trimmed
            ),
        );
        match self.llm.complete(request).await {
            Ok(response) => {
                let text = response.content.trim();
                if text.eq_ignore_ascii_case(SENTINEL_INVALID) || text.is_empty() {
                    TraitParseResult::invalid("That answer does not fit the question.")
                } else {
                    TraitParseResult::valid(TraitValue::Str(text.to_string()))
                }
            }
            // Best effort only: keep the user's own words.
            Err(e) => {
                debug!(error = %e, "text cleanup skipped");
                TraitParseResult::valid(TraitValue::Str(trimmed.to_string()))
            }
        }
    }

    async fn parse_enum(&self, raw_input: &str, definition: &TraitDefinition) -> TraitParseResult {
        if let Some(token) = keyword_match(raw_input, definition) {
            return TraitParseResult::valid(TraitValue::Str(token));
        }

        if self.llm.is_available() {
            let request = CompletionRequest::extraction(
                &self.config.llm,
                EXTRACTION_SYSTEM_PROMPT,
                format!(
                    "Map the reply below to exactly one of these tokens: {}.\n\
                     Reply {} if none fits.\nReply: {}",
                    definition.options.join(", "),
                    SENTINEL_UNKNOWN,
                    raw_input
                ),
            );
            if let Ok(response) = self.llm.complete(request).await {
                let token = normalize_token(response.content.trim());
                if !token.is_empty() && !token.eq_ignore_ascii_case(SENTINEL_UNKNOWN) {
                    return TraitParseResult::valid(TraitValue::Str(token));
                }
            }
        }

        TraitParseResult::invalid(format!(
            "Please pick one of: {}.",
            definition.options.join(", ")
        ))
    }

    async fn parse_enum_list(
        &self,
        raw_input: &str,
        definition: &TraitDefinition,
    ) -> TraitParseResult {
        if self.llm.is_available() {
            let request = CompletionRequest::extraction(
                &self.config.llm,
                EXTRACTION_SYSTEM_PROMPT,
                format!(
                    "Extract a comma-separated list of tokens from the reply below{}.\n\
                     Reply {} if nothing fits.\nReply: {}",
                    if definition.options.is_empty() {
                        String::new()
                    } else {
                        format!(", choosing from: {}", definition.options.join(", "))
                    },
                    SENTINEL_UNKNOWN,
                    raw_input
                ),
            );
            if let Ok(response) = self.llm.complete(request).await {
                let text = response.content.trim();
                if !text.eq_ignore_ascii_case(SENTINEL_UNKNOWN) {
                    let tokens = split_tokens(text);
                    if !tokens.is_empty() {
                        return TraitParseResult::valid(TraitValue::Str(tokens.join(",")));
                    }
                }
                return TraitParseResult::invalid("Please list one or more choices.");
            }
        }

        // LLM absent or failed: deterministic splitter.
        let tokens = split_tokens(raw_input);
        if tokens.is_empty() {
            TraitParseResult::invalid("Please list one or more choices.")
        } else {
            TraitParseResult::valid(TraitValue::Str(tokens.join(",")))
        }
    }

    fn check_bounds(&self, value: i64, definition: &TraitDefinition) -> TraitParseResult {
        if let Some(min) = definition.min_value {
            if value < min {
                return TraitParseResult::invalid(format!("Please give a number of at least {}.", min));
            }
        }
        if let Some(max) = definition.max_value {
            if value > max {
                return TraitParseResult::invalid(format!("Please give a number of at most {}.", max));
            }
        }
        TraitParseResult::valid(TraitValue::Int(value))
    }
}

fn list_bounds(definition: &TraitDefinition) -> (i64, i64) {
    (
        definition.min_value.unwrap_or(LIST_ELEMENT_MIN),
        definition.max_value.unwrap_or(LIST_ELEMENT_MAX),
    )
}

fn extract_bounded_ints(text: &str, min: i64, max: i64) -> Vec<i64> {
    DIGIT_RUN
        .find_iter(text)
        .filter_map(|run| run.as_str().parse::<i64>().ok())
        .filter(|n| (min..=max).contains(n))
        .collect()
}

/// Cheap deterministic pass for enum answers. Keywords come from parse-hint
/// segments of the form `TOKEN=keyword|keyword`; the option token itself
/// always counts as a keyword.
fn keyword_match(raw_input: &str, definition: &TraitDefinition) -> Option<String> {
    let haystack = raw_input.to_lowercase();

    if let Some(hint) = definition.parse_hint.as_deref() {
        for segment in hint.split(';') {
            let Some((token, keywords)) = segment.split_once('=') else {
                continue;
            };
            for keyword in keywords.split('|') {
                let keyword = keyword.trim().to_lowercase();
                if !keyword.is_empty() && haystack.contains(&keyword) {
                    return Some(normalize_token(token.trim()));
                }
            }
        }
    }

    for option in &definition.options {
        let plain = option.replace('_', " ").to_lowercase();
        if haystack.contains(&plain) || haystack.contains(&option.to_lowercase()) {
            return Some(option.clone());
        }
    }
    None
}

/// Split on the conversational separators and normalize each piece to an
/// UPPER_SNAKE_CASE token.
fn split_tokens(text: &str) -> Vec<String> {
    let unified = text
        .replace(" and ", ",")
        .replace(';', ",")
        .replace('&', ",");
    unified
        .split(',')
        .map(normalize_token)
        .filter(|token| !token.is_empty())
        .collect()
}

fn normalize_token(piece: &str) -> String {
    piece
        .trim()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .replace('-', "_")
        .to_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::llm::{DisabledModel, LlmError, LlmResponse, MockLanguageModel};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn definition(answer_type: AnswerType) -> TraitDefinition {
        TraitDefinition {
            key: "t".to_string(),
            question: "?".to_string(),
            answer_type,
            parse_hint: None,
            required: true,
            pseudo: false,
            depends_on: vec![],
            min_value: None,
            max_value: None,
            options: vec![],
            option_outcomes: HashMap::new(),
        }
    }

    fn offline_parser() -> TraitParser {
        TraitParser::new(Arc::new(DisabledModel), EvaluatorConfig::default())
    }

    fn canned(reply: &str) -> MockLanguageModel {
        let reply = reply.to_string();
        let mut mock = MockLanguageModel::new();
        mock.expect_is_available().return_const(true);
        mock.expect_complete().returning(move |_| {
            Ok(LlmResponse {
                content: reply.clone(),
                ..Default::default()
            })
        });
        mock
    }

    #[tokio::test]
    async fn test_integer_fast_path() {
        let parser = offline_parser();
        let result = parser
            .parse("5", &definition(AnswerType::Integer), &Session::new())
            .await;
        assert_eq!(result, TraitParseResult::valid(TraitValue::Int(5)));

        let result = parser
            .parse(
                "I think about 40 years",
                &definition(AnswerType::Integer),
                &Session::new(),
            )
            .await;
        assert_eq!(result.value, Some(TraitValue::Int(40)));
    }

    #[tokio::test]
    async fn test_integer_without_digits_and_without_llm_fails() {
        let parser = offline_parser();
        let result = parser
            .parse("forty", &definition(AnswerType::Integer), &Session::new())
            .await;
        assert!(!result.is_valid);
        assert!(result.error_reason.is_some());
    }

    #[tokio::test]
    async fn test_integer_number_words_via_llm() {
        let parser = TraitParser::new(Arc::new(canned("42")), EvaluatorConfig::default());
        let result = parser
            .parse("forty two", &definition(AnswerType::Integer), &Session::new())
            .await;
        assert_eq!(result.value, Some(TraitValue::Int(42)));
    }

    #[tokio::test]
    async fn test_integer_llm_none_sentinel_fails() {
        let parser = TraitParser::new(Arc::new(canned("NONE")), EvaluatorConfig::default());
        let result = parser
            .parse("no idea", &definition(AnswerType::Integer), &Session::new())
            .await;
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_integer_bounds() {
        let parser = offline_parser();
        let mut def = definition(AnswerType::Integer);
        def.min_value = Some(1);
        def.max_value = Some(10);
        assert!(!parser.parse("0", &def, &Session::new()).await.is_valid);
        assert!(!parser.parse("11", &def, &Session::new()).await.is_valid);
        assert!(parser.parse("7", &def, &Session::new()).await.is_valid);
    }

    #[tokio::test]
    async fn test_integer_list_preserves_order_and_bounds() {
        let parser = offline_parser();
        let result = parser
            .parse(
                "ages: 4, 9, 38, 40, 12",
                &definition(AnswerType::IntegerList),
                &Session::new(),
            )
            .await;
        assert_eq!(
            result.value,
            Some(TraitValue::IntList(vec![4, 9, 38, 40, 12]))
        );

        // 300 is outside [0, 120] and silently dropped.
        let result = parser
            .parse(
                "3, 300, 30",
                &definition(AnswerType::IntegerList),
                &Session::new(),
            )
            .await;
        assert_eq!(result.value, Some(TraitValue::IntList(vec![3, 30])));
    }

    #[tokio::test]
    async fn test_empty_text_is_invalid_with_reason() {
        let parser = offline_parser();
        let result = parser
            .parse("", &definition(AnswerType::Text), &Session::new())
            .await;
        assert!(!result.is_valid);
        assert!(!result.error_reason.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_text_without_hint_is_trimmed_verbatim() {
        let parser = offline_parser();
        let result = parser
            .parse("  Ada Lovelace  ", &definition(AnswerType::Text), &Session::new())
            .await;
        assert_eq!(result.value, Some(TraitValue::Str("Ada Lovelace".to_string())));
    }

    #[tokio::test]
    async fn test_text_hint_invalid_sentinel() {
        let parser = TraitParser::new(Arc::new(canned("INVALID")), EvaluatorConfig::default());
        let mut def = definition(AnswerType::Text);
        def.parse_hint = Some("a full name".to_string());
        let result = parser.parse("asdf", &def, &Session::new()).await;
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_text_llm_failure_keeps_user_words() {
        let mut mock = MockLanguageModel::new();
        mock.expect_is_available().return_const(true);
        mock.expect_complete()
            .returning(|_| Err(LlmError::Api("down".to_string())));
        let parser = TraitParser::new(Arc::new(mock), EvaluatorConfig::default());
        let mut def = definition(AnswerType::Text);
        def.parse_hint = Some("a full name".to_string());
        let result = parser.parse("Ada", &def, &Session::new()).await;
        assert_eq!(result.value, Some(TraitValue::Str("Ada".to_string())));
    }

    #[tokio::test]
    async fn test_enum_keyword_match_from_hint() {
        let parser = offline_parser();
        let mut def = definition(AnswerType::Enum);
        def.options = vec!["URGENT".to_string(), "ROUTINE".to_string()];
        def.parse_hint = Some("URGENT=right away|asap; ROUTINE=whenever|no rush".to_string());

        let result = parser
            .parse("we need this asap please", &def, &Session::new())
            .await;
        assert_eq!(result.value, Some(TraitValue::Str("URGENT".to_string())));

        let result = parser.parse("routine works", &def, &Session::new()).await;
        assert_eq!(result.value, Some(TraitValue::Str("ROUTINE".to_string())));
    }

    #[tokio::test]
    async fn test_enum_unknown_sentinel_fails() {
        let parser = TraitParser::new(Arc::new(canned("UNKNOWN")), EvaluatorConfig::default());
        let mut def = definition(AnswerType::Enum);
        def.options = vec!["A".to_string(), "B".to_string()];
        let result = parser.parse("neither really", &def, &Session::new()).await;
        assert!(!result.is_valid);
    }

    #[tokio::test]
    async fn test_enum_list_deterministic_splitter_without_llm() {
        let parser = offline_parser();
        let result = parser
            .parse(
                "back pain; knee pain and neck stiffness",
                &definition(AnswerType::EnumList),
                &Session::new(),
            )
            .await;
        assert_eq!(
            result.value,
            Some(TraitValue::Str(
                "BACK_PAIN,KNEE_PAIN,NECK_STIFFNESS".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_enum_list_llm_path() {
        let parser = TraitParser::new(
            Arc::new(canned("back pain, neck pain")),
            EvaluatorConfig::default(),
        );
        let result = parser
            .parse(
                "my back and neck hurt",
                &definition(AnswerType::EnumList),
                &Session::new(),
            )
            .await;
        assert_eq!(
            result.value,
            Some(TraitValue::Str("BACK_PAIN,NECK_PAIN".to_string()))
        );
    }
}
