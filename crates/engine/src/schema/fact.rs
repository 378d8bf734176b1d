use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single fact in the fact store. The key is opaque to the engine but
/// conventionally colon-delimited, e.g. `customer:123:age`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fact {
    pub key: String,
    pub value: Value,
    pub source: String,
    pub updated_at: DateTime<Utc>,
}
