//! Caller-owned conversation state.
//!
//! The evaluator itself is pure; everything that changes between turns lives
//! here and is mutated by the calling layer, exactly once per accepted
//! answer. The evaluator only ever reads this state (the parser uses the
//! validation history for diagnostic logging, never to change behavior).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::expression::TraitValue;
use crate::model::TraitDefinition;
use crate::timestamp::Timestamp;

/// Keys with this prefix hold clarifying answers collected during tie
/// resolution. They are session-scoped and never written back into a spec.
pub const CLARIFIER_KEY_PREFIX: &str = "clarifier_";

pub fn is_clarifier_key(key: &str) -> bool {
    key.starts_with(CLARIFIER_KEY_PREFIX)
}

/// One failed parse attempt, kept for diagnostics and retry accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationAttempt {
    pub trait_key: String,
    pub attempt: u32,
    pub reason: String,
    pub at: Timestamp,
}

/// State for one conversation. Owned by the caller; concurrent evaluations
/// against the same session must be serialized by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Session {
    pub known_traits: HashMap<String, TraitValue>,

    /// Key of the trait the conversation is currently waiting on.
    pub awaiting_trait: Option<String>,

    /// Consecutive parse failures for the awaited trait.
    pub retry_count: u32,

    pub validation_history: Vec<ValidationAttempt>,

    /// One-off pseudo-traits synthesized by the LLM clarifier for this
    /// session. Kept beside spec-declared traits, never merged into them.
    pub ephemeral_traits: Vec<TraitDefinition>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted answer and reset retry accounting.
    pub fn accept_answer(&mut self, trait_key: impl Into<String>, value: TraitValue) {
        let key = trait_key.into();
        self.known_traits.insert(key.clone(), value);
        if self.awaiting_trait.as_deref() == Some(key.as_str()) {
            self.awaiting_trait = None;
            self.retry_count = 0;
        }
    }

    pub fn record_failure(&mut self, trait_key: impl Into<String>, reason: impl Into<String>) {
        self.retry_count += 1;
        self.validation_history.push(ValidationAttempt {
            trait_key: trait_key.into(),
            attempt: self.retry_count,
            reason: reason.into(),
            at: Timestamp::now(),
        });
    }

    /// Prior parse failures for a trait. Diagnostic only.
    pub fn failure_count(&self, trait_key: &str) -> usize {
        self.validation_history
            .iter()
            .filter(|attempt| attempt.trait_key == trait_key)
            .count()
    }

    pub fn await_trait(&mut self, definition: &TraitDefinition) {
        self.awaiting_trait = Some(definition.key.clone());
        if is_clarifier_key(&definition.key)
            && !self
                .ephemeral_traits
                .iter()
                .any(|t| t.key == definition.key)
        {
            self.ephemeral_traits.push(definition.clone());
        }
    }

    /// Definition of the awaited trait, checking ephemeral clarifiers first.
    pub fn awaiting_definition<'a>(
        &'a self,
        spec_lookup: impl Fn(&str) -> Option<&'a TraitDefinition>,
    ) -> Option<&'a TraitDefinition> {
        let key = self.awaiting_trait.as_deref()?;
        self.ephemeral_traits
            .iter()
            .find(|t| t.key == key)
            .or_else(|| spec_lookup(key))
    }

    /// Number of clarifying answers already collected this session.
    pub fn clarifier_answer_count(&self) -> usize {
        self.known_traits
            .keys()
            .filter(|key| is_clarifier_key(key))
            .count()
    }
}
