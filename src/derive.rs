//! Derived-trait computation.
//!
//! Secondary facts (`min(K)`, `max(K)`, `count(K >= N)`) are recomputed on
//! every evaluation pass from the current known traits. They are never
//! cached: known traits change between turns. The input map is not mutated;
//! callers get a fresh augmented copy.

use std::collections::HashMap;

use tracing::debug;

use crate::expression::{DerivedExpr, TraitValue};
use crate::model::RoutingSpec;

/// Augment the known-traits map with every computable derived trait.
///
/// A derived trait whose expression failed to compile, whose source trait is
/// absent, or whose source is not an integer list produces no value and its
/// key is omitted from the augmented map. Over a present but empty list,
/// `min`/`max` are omitted while `count` yields 0.
pub fn augment(
    spec: &RoutingSpec,
    known_traits: &HashMap<String, TraitValue>,
) -> HashMap<String, TraitValue> {
    let mut augmented = known_traits.clone();

    for derived in &spec.derived_traits {
        let Some(expr) = &derived.compiled else {
            debug!(key = %derived.key, "skipping uncompiled derived trait");
            continue;
        };
        match compute(expr, known_traits) {
            Some(value) => {
                augmented.insert(derived.key.clone(), value);
            }
            None => {
                debug!(
                    key = %derived.key,
                    source = %expr.source(),
                    "derived trait not computable from current known traits"
                );
            }
        }
    }

    augmented
}

fn compute(expr: &DerivedExpr, known_traits: &HashMap<String, TraitValue>) -> Option<TraitValue> {
    let source = known_traits.get(expr.source())?;
    let list = source.as_int_list()?;
    match expr {
        DerivedExpr::Min { .. } => list.iter().min().copied().map(TraitValue::Int),
        DerivedExpr::Max { .. } => list.iter().max().copied().map(TraitValue::Int),
        DerivedExpr::CountAtLeast { threshold, .. } => {
            let count = list.iter().filter(|n| **n >= *threshold).count();
            Some(TraitValue::Int(count as i64))
        }
    }
}
