//! The rule engine's data model (spec §3): facts, events, timers, rules,
//! groups, triggers, conditions, actions, and lookups.

mod action;
mod condition;
mod event;
mod fact;
mod lookup;
mod rule;
mod timer;

pub use action::{Action, CatchSpec, OnExpireSpec, RepeatSpec};
pub use condition::{BaselineComparison, Condition, ConditionSource, Operator};
pub use event::Event;
pub use fact::Fact;
pub use lookup::{Lookup, LookupCache, LookupErrorStrategy};
pub use rule::{Rule, RuleGroup, RuleInput, Trigger};
pub use timer::{OnExpire, RepeatPolicy, Timer};

/// Serde helper: (de)serialize a [`std::time::Duration`] as whole
/// milliseconds, matching the wire shape used throughout the rule schema.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
