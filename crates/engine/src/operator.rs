//! Evaluates a single `(operator, actual, expected)` triple (spec §4.3).

use chainforge_core::pattern::{compile, PatternKind};
use serde_json::Value;

use crate::schema::Operator;

/// Evaluate `actual <operator> expected`. `matches` compiles (and caches)
/// `expected` as a regex against `actual`'s string form, returning `false`
/// on compile failure rather than erroring.
pub fn evaluate(operator: Operator, actual: Option<&Value>, expected: &Value) -> bool {
    use Operator::*;

    match operator {
        Exists => actual.map(|v| !v.is_null()).unwrap_or(false),
        NotExists => actual.map(|v| v.is_null()).unwrap_or(true),
        Eq => actual.map(|v| values_equal(v, expected)).unwrap_or(false),
        Neq => !actual.map(|v| values_equal(v, expected)).unwrap_or(false),
        Gt | Gte | Lt | Lte => compare_numeric(operator, actual, expected),
        In => actual
            .zip(expected.as_array())
            .map(|(v, seq)| seq.iter().any(|item| values_equal(item, v)))
            .unwrap_or(false),
        NotIn => !actual
            .zip(expected.as_array())
            .map(|(v, seq)| seq.iter().any(|item| values_equal(item, v)))
            .unwrap_or(false),
        Contains => contains(actual, expected),
        NotContains => !contains(actual, expected),
        Matches => matches_regex(actual, expected),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    a == b
}

fn as_f64(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn compare_numeric(operator: Operator, actual: Option<&Value>, expected: &Value) -> bool {
    let (Some(a), Some(b)) = (actual.and_then(as_f64), as_f64(expected)) else {
        return false;
    };
    match operator {
        Operator::Gt => a > b,
        Operator::Gte => a >= b,
        Operator::Lt => a < b,
        Operator::Lte => a <= b,
        _ => unreachable!(),
    }
}

fn contains(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        Some(Value::String(s)) => expected.as_str().map(|e| s.contains(e)).unwrap_or(false),
        Some(Value::Array(items)) => items.iter().any(|item| values_equal(item, expected)),
        _ => false,
    }
}

fn matches_regex(actual: Option<&Value>, expected: &Value) -> bool {
    let (Some(actual_str), Some(pattern)) = (actual.and_then(Value::as_str), expected.as_str())
    else {
        return false;
    };
    match compile(PatternKind::Raw, pattern) {
        Ok(regex) => regex.is_match(actual_str),
        Err(_) => false,
    }
}
