use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EvaluatorConfig;
use crate::derive;
use crate::expression::TraitValue;
use crate::model::{OutcomeDefinition, RoutingSpec, TraitDefinition};
use crate::provider::llm::{CompletionRequest, DisabledModel, LanguageModel};
use crate::rules;

use super::tie::TieResolver;

/// Where one evaluation pass left the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum EvalState {
    /// No outcome determined yet; a next trait is being asked.
    Collecting,
    /// Multiple outcomes tied; a clarifying question is in flight.
    TiePending,
    /// Terminal: an outcome was chosen.
    Complete,
}

/// Which algorithmic path produced the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ResolutionMode {
    Immediate,
    SingleMatch,
    LlmResolved,
    PseudoTraitClarifier,
    LlmClarifier,
    TieFallback,
    Fallback,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub state: EvalState,

    /// Chosen outcome when `state` is `Complete`.
    pub outcome: Option<OutcomeDefinition>,

    /// Trait to ask next when `state` is `Collecting` or `TiePending`. For
    /// LLM-generated clarifiers this definition is ephemeral and must be
    /// stored on the session, never in the spec.
    pub next_trait: Option<TraitDefinition>,

    /// Ids of the simultaneously matching outcomes, in declaration order.
    /// Empty when no tie occurred.
    pub tied_outcomes: Vec<String>,

    pub resolution_mode: Option<ResolutionMode>,

    /// Optional best-effort natural-language justification. Absent whenever
    /// the language model is unavailable or failed; callers supply their own
    /// generic wording in that case.
    pub summary: Option<String>,
}

impl EvaluationResult {
    pub fn is_complete(&self) -> bool {
        self.state == EvalState::Complete
    }

    pub fn is_tie(&self) -> bool {
        !self.tied_outcomes.is_empty()
    }

    pub(crate) fn complete(outcome: OutcomeDefinition, mode: ResolutionMode) -> Self {
        Self {
            state: EvalState::Complete,
            outcome: Some(outcome),
            next_trait: None,
            tied_outcomes: Vec::new(),
            resolution_mode: Some(mode),
            summary: None,
        }
    }

    pub(crate) fn ask(definition: TraitDefinition) -> Self {
        Self {
            state: EvalState::Collecting,
            outcome: None,
            next_trait: Some(definition),
            tied_outcomes: Vec::new(),
            resolution_mode: None,
            summary: None,
        }
    }

    pub(crate) fn tie_pending(
        definition: TraitDefinition,
        tied_outcomes: Vec<String>,
        mode: ResolutionMode,
    ) -> Self {
        Self {
            state: EvalState::TiePending,
            outcome: None,
            next_trait: Some(definition),
            tied_outcomes,
            resolution_mode: Some(mode),
            summary: None,
        }
    }

    pub(crate) fn with_tied(mut self, tied_outcomes: Vec<String>) -> Self {
        self.tied_outcomes = tied_outcomes;
        self
    }
}

/// The central state machine. Holds no per-session state; a single instance
/// serves any number of concurrent sessions over read-only specs.
pub struct RoutingEvaluator {
    llm: Arc<dyn LanguageModel>,
    config: EvaluatorConfig,
}

impl RoutingEvaluator {
    pub fn new(llm: Arc<dyn LanguageModel>, config: EvaluatorConfig) -> Self {
        Self { llm, config }
    }

    /// Fully deterministic evaluator: every LLM rung degrades to its
    /// fallback.
    pub fn without_llm(config: EvaluatorConfig) -> Self {
        Self::new(Arc::new(DisabledModel), config)
    }

    /// Run one evaluation pass. The known-traits map is read only; derived
    /// traits are recomputed into a fresh augmented copy every call.
    #[tracing::instrument(skip(self, spec, known_traits), fields(spec_id = %spec.id))]
    pub async fn evaluate(
        &self,
        spec: &RoutingSpec,
        known_traits: &HashMap<String, TraitValue>,
    ) -> EvaluationResult {
        let augmented = derive::augment(spec, known_traits);

        // Immediate-select rules bypass outcome matching entirely.
        for immediate in &spec.immediate_select {
            let Some(rule) = &immediate.compiled else {
                continue;
            };
            if !rules::evaluate_rule(rule, &augmented) {
                continue;
            }
            match spec.outcome(&immediate.outcome_id) {
                Some(outcome) => {
                    debug!(outcome = %outcome.id, "immediate-select rule satisfied");
                    let mut result =
                        EvaluationResult::complete(outcome.clone(), ResolutionMode::Immediate);
                    self.attach_summary(&augmented, &mut result).await;
                    return result;
                }
                None => {
                    warn!(
                        outcome_id = %immediate.outcome_id,
                        "immediate-select rule points at unknown outcome"
                    );
                }
            }
        }

        let matched: Vec<&OutcomeDefinition> = spec
            .outcomes
            .iter()
            .filter(|outcome| match &outcome.compiled_rules {
                Some(compiled) => rules::evaluate_all(compiled, &augmented),
                // A malformed rule makes the conjunction unsatisfiable.
                None => false,
            })
            .collect();

        let mut result = match matched.len() {
            0 => self.next_trait(spec, &augmented),
            1 => EvaluationResult::complete(matched[0].clone(), ResolutionMode::SingleMatch),
            _ => {
                let resolver = TieResolver::new(self.llm.clone(), self.config.clone());
                resolver.resolve(spec, &augmented, &matched).await
            }
        };

        self.attach_summary(&augmented, &mut result).await;
        result
    }

    /// Pick the next trait to ask: first required, non-pseudo trait not yet
    /// known whose dependencies are all known, in declaration order; then
    /// the authored fallback order; then the defensive first-outcome default
    /// for malformed specs.
    fn next_trait(
        &self,
        spec: &RoutingSpec,
        augmented: &HashMap<String, TraitValue>,
    ) -> EvaluationResult {
        for definition in &spec.traits {
            if !definition.required || definition.pseudo {
                continue;
            }
            if augmented.contains_key(&definition.key) {
                continue;
            }
            if definition
                .depends_on
                .iter()
                .all(|dependency| augmented.contains_key(dependency))
            {
                return EvaluationResult::ask(definition.clone());
            }
        }

        for key in &spec.disambiguation.fallback_trait_order {
            if augmented.contains_key(key) {
                continue;
            }
            if let Some(definition) = spec.trait_def(key) {
                debug!(trait_key = %key, "selecting next trait from fallback order");
                return EvaluationResult::ask(definition.clone());
            }
        }

        warn!(
            spec_id = %spec.id,
            "no outcome matched and no trait left to ask, defaulting to first outcome"
        );
        EvaluationResult::complete(spec.outcomes[0].clone(), ResolutionMode::Fallback)
    }

    /// Best-effort one-paragraph justification. Any failure leaves the
    /// summary absent.
    async fn attach_summary(
        &self,
        augmented: &HashMap<String, TraitValue>,
        result: &mut EvaluationResult,
    ) {
        if !result.is_complete() || result.summary.is_some() {
            return;
        }
        if !self.config.summarize_outcomes || !self.llm.is_available() {
            return;
        }
        let Some(outcome) = &result.outcome else {
            return;
        };

        let request = CompletionRequest::generation(
            &self.config.llm,
            "You explain recommendation decisions to end users in one short paragraph.",
            format!(
                "RECOMMENDATION: {}\n\nWHAT WE KNOW:\n{}\n\nWrite one paragraph explaining why \
                 this recommendation fits, referencing what we know. No headings, no lists.",
                outcome.content,
                render_traits(augmented)
            ),
        );
        match self.llm.complete(request).await {
            Ok(response) => {
                let text = response.content.trim();
                if !text.is_empty() {
                    result.summary = Some(text.to_string());
                }
            }
            Err(e) => {
                debug!(error = %e, "summary generation skipped");
            }
        }
    }
}

/// Stable `key: value` rendering of a trait map for prompts.
pub(crate) fn render_traits(traits: &HashMap<String, TraitValue>) -> String {
    let mut entries: Vec<(&String, &TraitValue)> = traits.iter().collect();
    entries.sort_by_key(|(key, _)| key.as_str());
    entries
        .iter()
        .map(|(key, value)| format!("{}: {}", key, value))
        .collect::<Vec<_>>()
        .join("\n")
}
