//! The immutable routing specification.
//!
//! A [`RoutingSpec`] is authored elsewhere (the storage layer owns CRUD and
//! versioning), deserialized from JSON, and compiled once with
//! [`RoutingSpec::compile`] before any evaluation. Compilation parses every
//! rule and derived-expression string into the ASTs from [`crate::expression`]
//! and reports integrity problems: fatal shape errors as [`SpecError`],
//! non-fatal authoring concerns as [`SpecWarning`]s.
//!
//! Once compiled, a spec is read-only and safe to share across concurrent
//! sessions.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::expression::{Comparison, DerivedExpr};

#[derive(Debug, Error)]
pub enum SpecError {
    #[error("duplicate trait key: {0}")]
    DuplicateTraitKey(String),
    #[error("duplicate outcome id: {0}")]
    DuplicateOutcomeId(String),
    #[error("spec {0} declares no outcomes")]
    NoOutcomes(String),
    #[error("spec deserialization failed: {0}")]
    Deserialize(#[from] serde_json::Error),
}

pub type SpecResult<T> = Result<T, SpecError>;

/// Non-fatal authoring problem found at compile time. The evaluator still
/// runs (malformed rules evaluate false, malformed derived expressions are
/// omitted), but authoring tools should surface these.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecWarning {
    MalformedRule {
        context: String,
        rule: String,
        reason: String,
    },
    MalformedDerivedExpression {
        key: String,
        reason: String,
    },
    UnknownTraitReference {
        context: String,
        trait_key: String,
    },
    /// No outcome has an empty rule list and no immediate-select rule is a
    /// catch-all, so an exhausted trait list can hit the first-outcome
    /// fallback at runtime.
    NoCatchAllOutcome,
}

/// The answer shape a trait collects.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AnswerType {
    Text,
    Integer,
    IntegerList,
    Enum,
    EnumList,
}

/// One typed question. Immutable once the spec is loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraitDefinition {
    pub key: String,
    pub question: String,
    pub answer_type: AnswerType,

    /// Natural-language guidance for the parser and its LLM fallback.
    #[serde(default)]
    pub parse_hint: Option<String>,

    #[serde(default)]
    pub required: bool,

    /// Pseudo-traits only disambiguate ties; they never drive primary routing.
    #[serde(default)]
    pub pseudo: bool,

    /// Trait keys that must be known before this trait is asked.
    #[serde(default)]
    pub depends_on: Vec<String>,

    #[serde(default)]
    pub min_value: Option<i64>,

    #[serde(default)]
    pub max_value: Option<i64>,

    /// Expected tokens for enum / enum_list answers.
    #[serde(default)]
    pub options: Vec<String>,

    /// For tie pseudo-traits: answer option to the outcome id it selects.
    #[serde(default)]
    pub option_outcomes: HashMap<String, String>,
}

/// A secondary fact computed from known traits each evaluation pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DerivedTraitDefinition {
    pub key: String,
    pub expression: String,

    #[serde(skip)]
    pub compiled: Option<DerivedExpr>,
}

/// Short-circuit rule: first satisfied one selects its outcome outright,
/// bypassing normal outcome matching. Used for safety/compliance overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImmediateSelectRule {
    pub outcome_id: String,
    pub rule: String,

    #[serde(skip)]
    pub compiled: Option<Comparison>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalResult {
    #[serde(default)]
    pub button_label: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub analytics_code: Option<String>,
}

/// One candidate outcome. Its selection rules are a conjunction: all must
/// hold for the outcome to match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutcomeDefinition {
    pub id: String,

    #[serde(default)]
    pub rules: Vec<String>,

    pub content: String,

    #[serde(default)]
    pub final_result: Option<FinalResult>,

    /// None after compilation means at least one rule was malformed, which
    /// makes the conjunction unsatisfiable.
    #[serde(skip)]
    pub compiled_rules: Option<Vec<Comparison>>,
}

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum TieMode {
    #[default]
    None,
    LlmClarifier,
}

/// How ties between simultaneously matching outcomes are resolved.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TieStrategy {
    #[serde(default)]
    pub mode: TieMode,

    #[serde(default = "default_max_clarifier_attempts")]
    pub max_clarifier_attempts: u32,

    /// Author-defined clarifying questions, tried in order before any
    /// LLM-generated one.
    #[serde(default)]
    pub pseudo_traits: Vec<TraitDefinition>,

    /// Optional template for the clarifying-question prompt. `{outcomes}` is
    /// replaced with the tied outcome list.
    #[serde(default)]
    pub prompt_template: Option<String>,
}

fn default_max_clarifier_attempts() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Disambiguation {
    /// Trait keys scanned, in order, when no required trait is askable.
    #[serde(default)]
    pub fallback_trait_order: Vec<String>,
}

/// A complete routing specification: traits, derived facts, outcomes, and
/// tie-resolution strategy for one conversational flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingSpec {
    pub id: String,

    #[serde(default)]
    pub traits: Vec<TraitDefinition>,

    #[serde(default)]
    pub derived_traits: Vec<DerivedTraitDefinition>,

    #[serde(default)]
    pub immediate_select: Vec<ImmediateSelectRule>,

    pub outcomes: Vec<OutcomeDefinition>,

    #[serde(default)]
    pub tie_strategy: TieStrategy,

    #[serde(default)]
    pub disambiguation: Disambiguation,
}

impl RoutingSpec {
    /// Deserialize and compile in one step.
    pub fn from_json(raw: &str) -> SpecResult<(Self, Vec<SpecWarning>)> {
        let mut spec: RoutingSpec = serde_json::from_str(raw)?;
        let warnings = spec.compile()?;
        Ok((spec, warnings))
    }

    /// Parse every rule and derived expression into its AST and check spec
    /// integrity. Must be called once before evaluation; idempotent.
    pub fn compile(&mut self) -> SpecResult<Vec<SpecWarning>> {
        let mut warnings = Vec::new();

        if self.outcomes.is_empty() {
            return Err(SpecError::NoOutcomes(self.id.clone()));
        }

        let mut trait_keys = HashSet::new();
        for definition in self.traits.iter().chain(&self.tie_strategy.pseudo_traits) {
            if !trait_keys.insert(definition.key.clone()) {
                return Err(SpecError::DuplicateTraitKey(definition.key.clone()));
            }
        }
        for derived in &self.derived_traits {
            if !trait_keys.insert(derived.key.clone()) {
                return Err(SpecError::DuplicateTraitKey(derived.key.clone()));
            }
        }

        let mut outcome_ids = HashSet::new();
        for outcome in &self.outcomes {
            if !outcome_ids.insert(outcome.id.clone()) {
                return Err(SpecError::DuplicateOutcomeId(outcome.id.clone()));
            }
        }

        for derived in &mut self.derived_traits {
            match DerivedExpr::parse(&derived.expression) {
                Ok(compiled) => {
                    if !trait_keys.contains(compiled.source()) {
                        warnings.push(SpecWarning::UnknownTraitReference {
                            context: format!("derived trait {}", derived.key),
                            trait_key: compiled.source().to_string(),
                        });
                    }
                    derived.compiled = Some(compiled);
                }
                Err(e) => {
                    warn!(key = %derived.key, error = %e, "derived expression rejected");
                    warnings.push(SpecWarning::MalformedDerivedExpression {
                        key: derived.key.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        for immediate in &mut self.immediate_select {
            match Comparison::parse(&immediate.rule) {
                Ok(compiled) => immediate.compiled = Some(compiled),
                Err(e) => {
                    warn!(outcome = %immediate.outcome_id, error = %e, "immediate rule rejected");
                    warnings.push(SpecWarning::MalformedRule {
                        context: format!("immediate select for {}", immediate.outcome_id),
                        rule: immediate.rule.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let mut any_catch_all = false;
        for outcome in &mut self.outcomes {
            if outcome.rules.is_empty() {
                any_catch_all = true;
            }
            let mut compiled = Vec::with_capacity(outcome.rules.len());
            let mut unsatisfiable = false;
            for rule in &outcome.rules {
                match Comparison::parse(rule) {
                    Ok(comparison) => {
                        if !trait_keys.contains(&comparison.trait_key) {
                            warnings.push(SpecWarning::UnknownTraitReference {
                                context: format!("outcome {}", outcome.id),
                                trait_key: comparison.trait_key.clone(),
                            });
                        }
                        compiled.push(comparison);
                    }
                    Err(e) => {
                        warn!(outcome = %outcome.id, rule = %rule, error = %e, "outcome rule rejected");
                        warnings.push(SpecWarning::MalformedRule {
                            context: format!("outcome {}", outcome.id),
                            rule: rule.clone(),
                            reason: e.to_string(),
                        });
                        unsatisfiable = true;
                    }
                }
            }
            outcome.compiled_rules = if unsatisfiable { None } else { Some(compiled) };
        }

        for key in &self.disambiguation.fallback_trait_order {
            if !trait_keys.contains(key) {
                warnings.push(SpecWarning::UnknownTraitReference {
                    context: "fallback trait order".to_string(),
                    trait_key: key.clone(),
                });
            }
        }
        for definition in &self.traits {
            for dependency in &definition.depends_on {
                if !trait_keys.contains(dependency) {
                    warnings.push(SpecWarning::UnknownTraitReference {
                        context: format!("dependencies of {}", definition.key),
                        trait_key: dependency.clone(),
                    });
                }
            }
        }

        if !any_catch_all {
            warnings.push(SpecWarning::NoCatchAllOutcome);
        }

        Ok(warnings)
    }

    /// Look up a primary or tie pseudo-trait definition by key.
    pub fn trait_def(&self, key: &str) -> Option<&TraitDefinition> {
        self.traits
            .iter()
            .chain(&self.tie_strategy.pseudo_traits)
            .find(|definition| definition.key == key)
    }

    pub fn outcome(&self, id: &str) -> Option<&OutcomeDefinition> {
        self.outcomes.iter().find(|outcome| outcome.id == id)
    }
}
