use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What an expired timer emits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OnExpire {
    pub topic: String,
    #[serde(default)]
    pub data: Value,
}

/// Repeat policy for a timer. `max_count` bounds the number of times a
/// repeating timer fires before it is deleted, per the explicit
/// enforcement requirement (see DESIGN.md).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RepeatPolicy {
    #[serde(with = "crate::schema::duration_ms")]
    pub interval: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_count: Option<u32>,
}

/// A scheduled timer. Names are unique; registering a timer under an
/// existing name cancels the prior one atomically.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Timer {
    pub id: String,
    pub name: String,
    pub expires_at: DateTime<Utc>,
    pub on_expire: OnExpire,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repeat: Option<RepeatPolicy>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Number of times this timer has already fired. Used together with
    /// `repeat.max_count` to enforce the fire-at-most-N-times contract.
    #[serde(default)]
    pub fire_count: u32,
}
