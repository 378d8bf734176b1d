use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::condition::Condition;

/// A single step of an action list. Atomic variants perform one effect;
/// composed variants (`Conditional`, `ForEach`, `TryCatch`) sequence other
/// actions. Every field here may itself contain `${path}` interpolation or
/// a `{ref: "path"}` whole-value placeholder, expanded at execution time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    SetFact {
        key: Value,
        value: Value,
    },
    DeleteFact {
        key: Value,
    },
    EmitEvent {
        topic: Value,
        #[serde(default)]
        data: Value,
        #[serde(skip_serializing_if = "Option::is_none")]
        correlation_id: Option<Value>,
    },
    SetTimer {
        name: Value,
        duration: Value,
        on_expire: OnExpireSpec,
        #[serde(skip_serializing_if = "Option::is_none")]
        repeat: Option<RepeatSpec>,
    },
    CancelTimer {
        name: Value,
    },
    CallService {
        service: String,
        method: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Log {
        message: Value,
    },
    Conditional {
        conditions: Vec<Condition>,
        then: Vec<Action>,
        #[serde(default)]
        r#else: Vec<Action>,
    },
    ForEach {
        collection: Value,
        r#as: String,
        actions: Vec<Action>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_iterations: Option<usize>,
    },
    TryCatch {
        r#try: Vec<Action>,
        catch: CatchSpec,
        #[serde(default)]
        finally: Vec<Action>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OnExpireSpec {
    pub topic: Value,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepeatSpec {
    pub interval: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CatchSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#as: Option<String>,
    pub actions: Vec<Action>,
}
