//! Rule evaluation over the augmented trait map.
//!
//! Rules compare a single integer trait against an integer literal. An
//! absent trait key makes the rule false rather than an error: that is how
//! the routing evaluator tells "not yet known" apart from "known and
//! mismatching", and the next-trait selection algorithm depends on it. A
//! non-integer value under the key also evaluates false, logged as an
//! anomaly. Nothing here panics or returns an error.

use std::collections::HashMap;

use tracing::debug;

use crate::expression::{Comparison, TraitValue};

pub fn evaluate_rule(rule: &Comparison, traits: &HashMap<String, TraitValue>) -> bool {
    let Some(value) = traits.get(&rule.trait_key) else {
        return false;
    };
    match value.as_int() {
        Some(actual) => rule.op.holds(actual, rule.literal),
        None => {
            debug!(rule = %rule, value = %value, "non-integer value in comparison, rule is false");
            false
        }
    }
}

/// Conjunction over a rule list. Empty lists hold trivially, which is how
/// catch-all outcomes are expressed.
pub fn evaluate_all(rules: &[Comparison], traits: &HashMap<String, TraitValue>) -> bool {
    rules.iter().all(|rule| evaluate_rule(rule, traits))
}
