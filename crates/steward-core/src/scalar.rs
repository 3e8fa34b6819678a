//! Scalar expectation values and their comparison rules.
//!
//! Device state planes return loosely typed values (most attributes arrive
//! as strings), so equality between a declared expectation and an observed
//! value is defined per variant rather than left to JSON equality.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A scalar value a proposal may declare as its expected outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// JSON null (also matches an absent attribute).
    Null,
    /// Boolean expectation; also matches its case-insensitive string form.
    Bool(bool),
    /// Numeric expectation; observed values are compared as `f64`.
    Number(f64),
    /// String expectation; everything else compares by string form.
    String(String),
}

impl Default for ScalarValue {
    fn default() -> Self {
        Self::Null
    }
}

/// Canonical string form of an observed JSON value, used for the
/// string-equality fallback and for evidence strings.
fn string_form(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_f64(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

impl ScalarValue {
    /// Whether the observed value satisfies this expectation.
    ///
    /// - booleans match JSON booleans or their case-insensitive string form;
    /// - numbers compare as `f64`, and an unparseable observation is unequal;
    /// - everything else compares by string form (`None` reads as null).
    pub fn matches(&self, actual: Option<&Value>) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        match self {
            Self::Bool(expected) => match actual {
                Value::Bool(b) => b == expected,
                other => string_form(other).to_lowercase() == expected.to_string(),
            },
            Self::Number(expected) => as_f64(actual).is_some_and(|a| a == *expected),
            Self::String(expected) => string_form(actual) == *expected,
            Self::Null => matches!(actual, Value::Null),
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "'{s}'"),
        }
    }
}

/// Render an observed value for evidence strings: strings are
/// single-quoted, a missing value reads as `'<unknown>'`.
pub fn display_observed(actual: Option<&Value>) -> String {
    match actual {
        None => "'<unknown>'".to_string(),
        Some(Value::String(s)) => format!("'{s}'"),
        Some(other) => string_form(other),
    }
}
