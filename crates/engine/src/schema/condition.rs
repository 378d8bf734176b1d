use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Where a condition's actual value is read from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConditionSource {
    Fact { pattern: String },
    Event { field: String },
    Context { key: String },
    Lookup { name: String, field: Option<String> },
    Baseline {
        metric: String,
        comparison: BaselineComparison,
        sensitivity: f64,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BaselineComparison {
    Above,
    Below,
    Outside,
}

/// Closed set of comparison operators. Parsers must reject unknown
/// variants rather than deserializing to a fallback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    Contains,
    NotContains,
    Matches,
    Exists,
    NotExists,
}

/// A single ordered condition. `value` may be a literal JSON value or a
/// `{ref: "path"}` object resolved at evaluation time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Condition {
    pub source: ConditionSource,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}
