//! Condition evaluation: a pure `(condition, context) -> bool` function.
//!
//! Never fails: a malformed condition degrades to `false`, an absent one is
//! vacuously `true`.

use std::cmp::Ordering;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// `field <operator> value`, where `field` is a dot-separated context path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    /// Kept as text so an unknown operator survives storage and simply
    /// evaluates to `false`.
    pub operator: String,
    #[serde(default)]
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: impl Into<String>, value: Value) -> Self {
        Self { field: field.into(), operator: operator.into(), value }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Lt,
    Gte,
    Lte,
    Contains,
}

impl FromStr for Operator {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::Ne),
            ">" => Ok(Self::Gt),
            "<" => Ok(Self::Lt),
            ">=" => Ok(Self::Gte),
            "<=" => Ok(Self::Lte),
            "contains" => Ok(Self::Contains),
            _ => Err(()),
        }
    }
}

/// Evaluate `condition` against `context`.
pub fn evaluate(condition: Option<&Condition>, context: &Map<String, Value>) -> bool {
    let Some(condition) = condition else {
        return true;
    };
    let Ok(operator) = condition.operator.parse::<Operator>() else {
        return false;
    };
    let actual = resolve_path(context, &condition.field);
    let expected = &condition.value;

    match operator {
        Operator::Eq => actual.is_some_and(|a| loosely_equal(a, expected)),
        Operator::Ne => !actual.is_some_and(|a| loosely_equal(a, expected)),
        Operator::Gt => compare(actual, expected) == Some(Ordering::Greater),
        Operator::Lt => compare(actual, expected) == Some(Ordering::Less),
        Operator::Gte => matches!(compare(actual, expected), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lte => matches!(compare(actual, expected), Some(Ordering::Less | Ordering::Equal)),
        Operator::Contains => {
            actual.is_some_and(|a| stringify(a).contains(stringify(expected).as_str()))
        }
    }
}

/// Walk `path` ("a.b.c") through nested objects; `None` on any missing segment.
pub fn resolve_path<'a>(context: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = context.get(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

// 7 and 7.0 are equal; everything else compares structurally.
fn loosely_equal(a: &Value, b: &Value) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn compare(actual: Option<&Value>, expected: &Value) -> Option<Ordering> {
    match (actual?, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
