use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LookupErrorStrategy {
    Skip,
    Fail,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LookupCache {
    #[serde(with = "crate::schema::duration_ms")]
    pub ttl: Duration,
}

/// A declarative call to an external service whose result joins the
/// evaluation context under `lookup.<name>`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lookup {
    pub name: String,
    pub service: String,
    pub method: String,
    #[serde(default)]
    pub args: Vec<Value>,
    #[serde(default)]
    pub cache: Option<LookupCache>,
    pub on_error: LookupErrorStrategy,
}
