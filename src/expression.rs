//! Trait values and the fixed expression grammars.
//!
//! Rule strings (`<traitKey> <op> <value>`) and derived-trait expressions
//! (`min(K)`, `max(K)`, `count(K >= N)`) are parsed exactly once, when a
//! routing spec is loaded, into the small ASTs defined here. Evaluation works
//! on the ASTs and never re-scans strings. The grammars are deliberately
//! closed: anything outside the three derived forms or the five comparison
//! operators is a parse error at load time.

use core::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A value a trait can hold. No nesting beyond a flat integer list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraitValue {
    Int(i64),
    IntList(Vec<i64>),
    Str(String),
}

impl TraitValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            TraitValue::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_int_list(&self) -> Option<&[i64]> {
        match self {
            TraitValue::IntList(list) => Some(list),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            TraitValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for TraitValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TraitValue::Str(s) => write!(f, "{}", s),
            TraitValue::Int(n) => write!(f, "{}", n),
            TraitValue::IntList(list) => {
                let rendered: Vec<String> = list.iter().map(|n| n.to_string()).collect();
                write!(f, "{}", rendered.join(", "))
            }
        }
    }
}

impl From<i64> for TraitValue {
    fn from(n: i64) -> Self {
        TraitValue::Int(n)
    }
}

impl From<Vec<i64>> for TraitValue {
    fn from(list: Vec<i64>) -> Self {
        TraitValue::IntList(list)
    }
}

impl From<&str> for TraitValue {
    fn from(s: &str) -> Self {
        TraitValue::Str(s.to_string())
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ExpressionError {
    #[error("no comparison operator in rule: {0}")]
    MissingOperator(String),
    #[error("empty trait key in rule: {0}")]
    EmptyTraitKey(String),
    #[error("non-integer literal in rule: {0}")]
    NonIntegerLiteral(String),
    #[error("unsupported derived expression: {0}")]
    UnsupportedDerivedForm(String),
}

pub type ExpressionResult<T> = Result<T, ExpressionError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
pub enum CompareOp {
    #[strum(serialize = "==")]
    Eq,
    #[strum(serialize = ">=")]
    Ge,
    #[strum(serialize = "<=")]
    Le,
    #[strum(serialize = ">")]
    Gt,
    #[strum(serialize = "<")]
    Lt,
}

impl CompareOp {
    pub fn holds(&self, left: i64, right: i64) -> bool {
        match self {
            CompareOp::Eq => left == right,
            CompareOp::Ge => left >= right,
            CompareOp::Le => left <= right,
            CompareOp::Gt => left > right,
            CompareOp::Lt => left < right,
        }
    }
}

/// One parsed selection rule: `<traitKey> <op> <integer>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub trait_key: String,
    pub op: CompareOp,
    pub literal: i64,
}

// Two-character operators first so ">=" is never split as ">" + "=".
const OPERATORS: [(&str, CompareOp); 5] = [
    ("==", CompareOp::Eq),
    (">=", CompareOp::Ge),
    ("<=", CompareOp::Le),
    (">", CompareOp::Gt),
    ("<", CompareOp::Lt),
];

impl Comparison {
    pub fn parse(raw: &str) -> ExpressionResult<Self> {
        let (op_text, op) = OPERATORS
            .iter()
            .find(|(text, _)| raw.contains(text))
            .copied()
            .ok_or_else(|| ExpressionError::MissingOperator(raw.to_string()))?;

        let (lhs, rhs) = raw
            .split_once(op_text)
            .ok_or_else(|| ExpressionError::MissingOperator(raw.to_string()))?;

        let trait_key = lhs.trim();
        if trait_key.is_empty() {
            return Err(ExpressionError::EmptyTraitKey(raw.to_string()));
        }

        let literal: i64 = rhs
            .trim()
            .parse()
            .map_err(|_| ExpressionError::NonIntegerLiteral(raw.to_string()))?;

        Ok(Self {
            trait_key: trait_key.to_string(),
            op,
            literal,
        })
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} {}", self.trait_key, self.op, self.literal)
    }
}

/// One parsed derived-trait expression. The grammar has exactly three forms
/// and must not grow new ones ad hoc.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DerivedExpr {
    Min { source: String },
    Max { source: String },
    CountAtLeast { source: String, threshold: i64 },
}

lazy_static! {
    static ref MIN_MAX_EXPR: Regex = Regex::new(r"^(min|max)\(\s*(\w+)\s*\)$").unwrap();
    static ref COUNT_EXPR: Regex = Regex::new(r"^count\(\s*(\w+)\s*>=\s*(-?\d+)\s*\)$").unwrap();
}

impl DerivedExpr {
    pub fn parse(raw: &str) -> ExpressionResult<Self> {
        let trimmed = raw.trim();
        if let Some(captures) = MIN_MAX_EXPR.captures(trimmed) {
            let source = captures[2].to_string();
            return Ok(match &captures[1] {
                "min" => DerivedExpr::Min { source },
                _ => DerivedExpr::Max { source },
            });
        }
        if let Some(captures) = COUNT_EXPR.captures(trimmed) {
            let threshold: i64 = captures[2]
                .parse()
                .map_err(|_| ExpressionError::UnsupportedDerivedForm(raw.to_string()))?;
            return Ok(DerivedExpr::CountAtLeast {
                source: captures[1].to_string(),
                threshold,
            });
        }
        Err(ExpressionError::UnsupportedDerivedForm(raw.to_string()))
    }

    pub fn source(&self) -> &str {
        match self {
            DerivedExpr::Min { source }
            | DerivedExpr::Max { source }
            | DerivedExpr::CountAtLeast { source, .. } => source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_comparison_operators() {
        let rule = Comparison::parse("age >= 18").unwrap();
        assert_eq!(
            rule,
            Comparison {
                trait_key: "age".to_string(),
                op: CompareOp::Ge,
                literal: 18,
            }
        );

        assert_eq!(Comparison::parse("count == 0").unwrap().op, CompareOp::Eq);
        assert_eq!(Comparison::parse("count<=5").unwrap().op, CompareOp::Le);
        assert_eq!(Comparison::parse("count > 2").unwrap().op, CompareOp::Gt);
        assert_eq!(Comparison::parse("count < 2").unwrap().op, CompareOp::Lt);
    }

    #[test]
    fn test_ge_is_not_split_as_gt() {
        let rule = Comparison::parse("youngest_age >= 3").unwrap();
        assert_eq!(rule.op, CompareOp::Ge);
        assert_eq!(rule.literal, 3);
    }

    #[test]
    fn test_parse_comparison_rejects_garbage() {
        assert!(matches!(
            Comparison::parse("no operator here"),
            Err(ExpressionError::MissingOperator(_))
        ));
        assert!(matches!(
            Comparison::parse(" >= 3"),
            Err(ExpressionError::EmptyTraitKey(_))
        ));
        assert!(matches!(
            Comparison::parse("age >= many"),
            Err(ExpressionError::NonIntegerLiteral(_))
        ));
    }

    #[test]
    fn test_parse_derived_forms() {
        assert_eq!(
            DerivedExpr::parse("min(ages)").unwrap(),
            DerivedExpr::Min {
                source: "ages".to_string()
            }
        );
        assert_eq!(
            DerivedExpr::parse("max( ages )").unwrap(),
            DerivedExpr::Max {
                source: "ages".to_string()
            }
        );
        assert_eq!(
            DerivedExpr::parse("count(ages >= 18)").unwrap(),
            DerivedExpr::CountAtLeast {
                source: "ages".to_string(),
                threshold: 18,
            }
        );
    }

    #[test]
    fn test_parse_derived_rejects_other_forms() {
        for raw in ["sum(ages)", "count(ages > 18)", "min(ages) + 1", "ages"] {
            assert!(
                matches!(
                    DerivedExpr::parse(raw),
                    Err(ExpressionError::UnsupportedDerivedForm(_))
                ),
                "expected rejection of {:?}",
                raw
            );
        }
    }

    #[test]
    fn test_trait_value_display() {
        assert_eq!(TraitValue::Str("hi".to_string()).to_string(), "hi");
        assert_eq!(TraitValue::Int(7).to_string(), "7");
        assert_eq!(TraitValue::IntList(vec![1, 2, 3]).to_string(), "1, 2, 3");
    }

    #[test]
    fn test_trait_value_untagged_serde() {
        let value: TraitValue = serde_json::from_str("[4, 9, 38]").unwrap();
        assert_eq!(value, TraitValue::IntList(vec![4, 9, 38]));
        let value: TraitValue = serde_json::from_str("42").unwrap();
        assert_eq!(value, TraitValue::Int(42));
        let value: TraitValue = serde_json::from_str("\"yes\"").unwrap();
        assert_eq!(value, TraitValue::Str("yes".to_string()));
    }
}
