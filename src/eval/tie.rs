//! Tie resolution: what happens when several outcomes match at once.
//!
//! The ladder is strictly ordered and degrades gracefully. With the language
//! model fully absent only rungs 1, 3, and 5 are reachable, all of them
//! deterministic. Author-defined pseudo-traits always take priority over an
//! LLM-generated clarifying question.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::EvaluatorConfig;
use crate::expression::TraitValue;
use crate::model::{AnswerType, OutcomeDefinition, RoutingSpec, TieMode, TraitDefinition};
use crate::provider::llm::{CompletionRequest, LanguageModel, LlmError, LlmResult};
use crate::session::{is_clarifier_key, CLARIFIER_KEY_PREFIX};

use super::evaluator::{render_traits, EvaluationResult, ResolutionMode};

const WINNER_PREFIX: &str = "WINNER:";
const SUMMARY_PREFIX: &str = "SUMMARY:";
const QUESTION_PREFIX: &str = "QUESTION:";
const TYPE_PREFIX: &str = "TYPE:";
const OPTIONS_PREFIX: &str = "OPTIONS:";

pub struct TieResolver {
    llm: Arc<dyn LanguageModel>,
    config: EvaluatorConfig,
}

impl TieResolver {
    pub fn new(llm: Arc<dyn LanguageModel>, config: EvaluatorConfig) -> Self {
        Self { llm, config }
    }

    /// Resolve a tie between two or more outcomes. First applicable rung
    /// wins:
    ///
    /// 1. strategy mode is not `LLM_CLARIFIER`: first tied outcome.
    /// 2. a clarifying answer is already known: ask the LLM to pick the
    ///    winner (failure falls through to rung 4, not 3).
    /// 3. an author-defined pseudo-trait can disambiguate: resolve from its
    ///    answer mapping, or ask the first unanswered one.
    /// 4. LLM available and attempts remain: generate a one-off clarifier.
    /// 5. first tied outcome.
    #[tracing::instrument(skip_all, fields(tied = tied.len()))]
    pub async fn resolve(
        &self,
        spec: &RoutingSpec,
        augmented: &HashMap<String, TraitValue>,
        tied: &[&OutcomeDefinition],
    ) -> EvaluationResult {
        let tied_ids: Vec<String> = tied.iter().map(|outcome| outcome.id.clone()).collect();

        if spec.tie_strategy.mode != TieMode::LlmClarifier {
            debug!("tie strategy disabled, resolving to first tied outcome");
            return self.first_tied(tied, tied_ids);
        }

        if let Some(answer) = clarifier_answer(augmented) {
            match self.pick_winner(tied, answer).await {
                Ok((winner, summary)) => {
                    let mut result =
                        EvaluationResult::complete(winner, ResolutionMode::LlmResolved)
                            .with_tied(tied_ids);
                    result.summary = summary;
                    return result;
                }
                Err(e) => {
                    debug!(error = %e, "winner pick failed, trying a fresh clarifier");
                    return self.generate_clarifier(spec, augmented, tied, tied_ids).await;
                }
            }
        }

        for pseudo in &spec.tie_strategy.pseudo_traits {
            match augmented.get(&pseudo.key) {
                None => {
                    debug!(trait_key = %pseudo.key, "asking author-defined clarifier");
                    return EvaluationResult::tie_pending(
                        pseudo.clone(),
                        tied_ids,
                        ResolutionMode::PseudoTraitClarifier,
                    );
                }
                Some(value) => {
                    if let Some(winner) = mapped_winner(pseudo, value, tied) {
                        debug!(outcome = %winner.id, "pseudo-trait answer selected winner");
                        return EvaluationResult::complete(
                            winner.clone(),
                            ResolutionMode::PseudoTraitClarifier,
                        )
                        .with_tied(tied_ids);
                    }
                    // Answered but inconclusive: try the next rung.
                }
            }
        }

        self.generate_clarifier(spec, augmented, tied, tied_ids).await
    }

    fn first_tied(&self, tied: &[&OutcomeDefinition], tied_ids: Vec<String>) -> EvaluationResult {
        EvaluationResult::complete(tied[0].clone(), ResolutionMode::TieFallback).with_tied(tied_ids)
    }

    /// Rung 2: the user already answered a clarifying question; let the LLM
    /// pick among the tied outcomes. Strict reply format, parsed by line
    /// prefix; anything else is a malformed response.
    async fn pick_winner(
        &self,
        tied: &[&OutcomeDefinition],
        answer: &str,
    ) -> LlmResult<(OutcomeDefinition, Option<String>)> {
        if !self.llm.is_available() {
            return Err(LlmError::Unavailable);
        }

        let candidates = tied
            .iter()
            .map(|outcome| format!("- {}: {}", outcome.id, outcome.content))
            .collect::<Vec<_>>()
            .join("\n");
        let request = CompletionRequest::extraction(
            &self.config.llm,
            "You choose the single best option given a user's clarification. \
             Reply in exactly two lines:\nWINNER: <id>\nSUMMARY: <one sentence>",
            format!(
                "CANDIDATES:\n{}\n\nUSER CLARIFICATION: {}\n\nPick the winner.",
                candidates, answer
            ),
        );

        let response = self.llm.complete(request).await?;
        let mut winner_id = None;
        let mut summary = None;
        for line in response.content.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix(WINNER_PREFIX) {
                winner_id = Some(rest.trim().to_string());
            } else if let Some(rest) = line.strip_prefix(SUMMARY_PREFIX) {
                summary = Some(rest.trim().to_string());
            }
        }

        let winner_id = winner_id
            .ok_or_else(|| LlmError::MalformedResponse(response.content.clone()))?;
        let winner = tied
            .iter()
            .find(|outcome| outcome.id == winner_id)
            .ok_or_else(|| {
                LlmError::MalformedResponse(format!("winner {} is not a tied outcome", winner_id))
            })?;

        Ok(((*winner).clone(), summary.filter(|s| !s.is_empty())))
    }

    /// Rung 4: synthesize a one-off clarifying question. Bounded by the
    /// strategy's attempt budget; any failure lands on rung 5.
    async fn generate_clarifier(
        &self,
        spec: &RoutingSpec,
        augmented: &HashMap<String, TraitValue>,
        tied: &[&OutcomeDefinition],
        tied_ids: Vec<String>,
    ) -> EvaluationResult {
        let attempts = augmented.keys().filter(|key| is_clarifier_key(key)).count();
        if attempts >= spec.tie_strategy.max_clarifier_attempts as usize {
            debug!(attempts, "clarifier attempt budget exhausted");
            return self.first_tied(tied, tied_ids);
        }
        if !self.llm.is_available() {
            return self.first_tied(tied, tied_ids);
        }

        let candidates = tied
            .iter()
            .map(|outcome| format!("- {}: {}", outcome.id, outcome.content))
            .collect::<Vec<_>>()
            .join("\n");
        let user_prompt = match &spec.tie_strategy.prompt_template {
            Some(template) => template.replace("{outcomes}", &candidates),
            None => format!(
                "These options all fit the user so far:\n{}\n\nWHAT WE KNOW:\n{}\n\n\
                 Write one short question that would tell them apart.",
                candidates,
                render_traits(augmented)
            ),
        };
        let request = CompletionRequest::generation(
            &self.config.llm,
            "You write one clarifying question to break a tie between options. \
             Reply in exactly this format:\nQUESTION: <text>\nTYPE: text|enum|enum_list\n\
             OPTIONS: <comma-separated, only for enum types>",
            user_prompt,
        );

        match self.llm.complete(request).await {
            Ok(response) => match parse_generated_clarifier(&response.content) {
                Some(definition) => {
                    debug!(trait_key = %definition.key, "generated clarifier");
                    EvaluationResult::tie_pending(
                        definition,
                        tied_ids,
                        ResolutionMode::LlmClarifier,
                    )
                }
                None => {
                    warn!(reply = %response.content, "unparsable clarifier reply");
                    self.first_tied(tied, tied_ids)
                }
            },
            Err(e) => {
                debug!(error = %e, "clarifier generation failed");
                self.first_tied(tied, tied_ids)
            }
        }
    }
}

/// First non-empty clarifying answer in the map, if any.
fn clarifier_answer(augmented: &HashMap<String, TraitValue>) -> Option<&str> {
    let mut keys: Vec<&String> = augmented
        .keys()
        .filter(|key| is_clarifier_key(key))
        .collect();
    keys.sort();
    keys.into_iter()
        .filter_map(|key| augmented.get(key))
        .filter_map(|value| value.as_str())
        .find(|answer| !answer.trim().is_empty())
}

/// Winner selected by an answered pseudo-trait's option mapping, when the
/// mapped outcome is actually among the tied ones.
fn mapped_winner<'a>(
    pseudo: &TraitDefinition,
    value: &TraitValue,
    tied: &[&'a OutcomeDefinition],
) -> Option<&'a OutcomeDefinition> {
    let answer = value.to_string();
    let outcome_id = pseudo
        .option_outcomes
        .iter()
        .find(|(option, _)| option.eq_ignore_ascii_case(&answer))
        .map(|(_, id)| id)?;
    tied.iter().find(|outcome| &outcome.id == outcome_id).copied()
}

/// Parse the strict QUESTION/TYPE/OPTIONS reply into an ephemeral trait
/// definition. Returns None on any format violation.
fn parse_generated_clarifier(reply: &str) -> Option<TraitDefinition> {
    let mut question = None;
    let mut answer_type = None;
    let mut options = Vec::new();

    for line in reply.lines() {
        let line = line.trim();
        if let Some(rest) = line.strip_prefix(QUESTION_PREFIX) {
            question = Some(rest.trim().to_string());
        } else if let Some(rest) = line.strip_prefix(TYPE_PREFIX) {
            answer_type = match rest.trim().to_lowercase().as_str() {
                "text" => Some(AnswerType::Text),
                "enum" => Some(AnswerType::Enum),
                "enum_list" => Some(AnswerType::EnumList),
                _ => return None,
            };
        } else if let Some(rest) = line.strip_prefix(OPTIONS_PREFIX) {
            options = rest
                .split(',')
                .map(|option| option.trim().to_string())
                .filter(|option| !option.is_empty())
                .collect();
        }
    }

    let question = question.filter(|q| !q.is_empty())?;
    let answer_type = answer_type?;
    if matches!(answer_type, AnswerType::Enum | AnswerType::EnumList) && options.is_empty() {
        return None;
    }

    Some(TraitDefinition {
        key: format!("{}{}", CLARIFIER_KEY_PREFIX, Uuid::new_v4().simple()),
        question,
        answer_type,
        parse_hint: None,
        required: false,
        pseudo: true,
        depends_on: vec![],
        min_value: None,
        max_value: None,
        options,
        option_outcomes: HashMap::new(),
    })
}
