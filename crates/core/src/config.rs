use std::env;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_bool(profile: &str, key: &str, default: bool) -> bool {
    profiled_env_opt(profile, key)
        .map(|v| v == "true" || v == "1")
        .unwrap_or(default)
}

fn profiled_env_duration(profile: &str, key: &str, default: &str) -> Duration {
    let literal = profiled_env_or(profile, key, default);
    parse_duration(&literal).unwrap_or_else(|_| {
        parse_duration(default).expect("default duration literal must be valid")
    })
}

/// Engine tunables, loaded from the environment with an optional profile
/// prefix (`CHAINFORGE_PROFILE=PROD` makes every key resolve as
/// `PROD_CHAINFORGE_*` first, falling back to `CHAINFORGE_*`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub profile: String,

    /// Maximum depth of forward-chaining re-triggering before the engine
    /// stops propagating further events from a single root trigger.
    pub max_forward_depth: usize,
    /// Maximum number of rules evaluated concurrently per trigger.
    pub max_concurrency: usize,

    /// Maximum number of events retained in the event store.
    pub event_store_capacity: usize,
    /// Maximum age of an event before eviction, regardless of capacity.
    #[serde(with = "duration_secs")]
    pub event_store_max_age: Duration,

    /// Poll interval for the hot-reload watcher.
    #[serde(with = "duration_secs")]
    pub hot_reload_interval: Duration,
    /// Validate rule documents before applying a reload.
    pub hot_reload_validate_before_apply: bool,
    /// Apply reloaded rule sets atomically (all-or-nothing).
    pub hot_reload_atomic: bool,

    /// Maximum depth explored by the backward chainer.
    pub backward_chain_max_depth: usize,
    /// Maximum number of rules considered during one backward-chain query.
    pub backward_chain_max_rules: usize,

    /// Maximum number of audit entries retained per rule.
    pub audit_log_max_entries_per_rule: usize,

    /// Default TTL applied to a lookup's cached result when the rule does
    /// not specify one.
    #[serde(with = "duration_secs")]
    pub lookup_default_ttl: Duration,
}

mod duration_secs {
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

impl EngineConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `CHAINFORGE_PROFILE`. When set, every key is
    /// first looked up as `{PROFILE}_CHAINFORGE_{KEY}`, falling back to
    /// `CHAINFORGE_{KEY}`.
    pub fn from_env() -> Self {
        let profile = env::var("CHAINFORGE_PROFILE")
            .unwrap_or_default()
            .to_uppercase();
        Self::for_profile(&profile)
    }

    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            max_forward_depth: profiled_env_usize(p, "CHAINFORGE_MAX_FORWARD_DEPTH", 10),
            max_concurrency: profiled_env_usize(p, "CHAINFORGE_MAX_CONCURRENCY", 10),
            event_store_capacity: profiled_env_usize(p, "CHAINFORGE_EVENT_STORE_CAPACITY", 10_000),
            event_store_max_age: profiled_env_duration(
                p,
                "CHAINFORGE_EVENT_STORE_MAX_AGE",
                "1h",
            ),
            hot_reload_interval: profiled_env_duration(p, "CHAINFORGE_HOT_RELOAD_INTERVAL", "30s"),
            hot_reload_validate_before_apply: profiled_env_bool(
                p,
                "CHAINFORGE_HOT_RELOAD_VALIDATE_BEFORE_APPLY",
                true,
            ),
            hot_reload_atomic: profiled_env_bool(p, "CHAINFORGE_HOT_RELOAD_ATOMIC", true),
            backward_chain_max_depth: profiled_env_usize(
                p,
                "CHAINFORGE_BACKWARD_CHAIN_MAX_DEPTH",
                10,
            ),
            backward_chain_max_rules: profiled_env_usize(
                p,
                "CHAINFORGE_BACKWARD_CHAIN_MAX_RULES",
                100,
            ),
            audit_log_max_entries_per_rule: profiled_env_usize(
                p,
                "CHAINFORGE_AUDIT_LOG_MAX_ENTRIES_PER_RULE",
                500,
            ),
            lookup_default_ttl: profiled_env_duration(p, "CHAINFORGE_LOOKUP_DEFAULT_TTL", "30s"),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() {
            "default"
        } else {
            &self.profile
        }
    }

    /// Print a summary for startup logs. Nothing in `EngineConfig` is a
    /// secret, so no redaction is needed, unlike the storage/AWS/LLM
    /// config it replaces.
    pub fn log_summary(&self) {
        tracing::info!(
            profile = self.profile_label(),
            max_forward_depth = self.max_forward_depth,
            max_concurrency = self.max_concurrency,
            event_store_capacity = self.event_store_capacity,
            hot_reload_interval_ms = self.hot_reload_interval.as_millis() as u64,
            backward_chain_max_depth = self.backward_chain_max_depth,
            "engine config loaded"
        );
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::for_profile("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_stable() {
        let cfg = EngineConfig::for_profile("");
        assert_eq!(cfg.max_forward_depth, 10);
        assert_eq!(cfg.max_concurrency, 10);
        assert_eq!(cfg.hot_reload_interval, Duration::from_secs(30));
        assert!(cfg.hot_reload_validate_before_apply);
        assert!(cfg.hot_reload_atomic);
    }

    #[test]
    fn profiled_override_wins() {
        std::env::set_var("TESTPROFILE_CHAINFORGE_MAX_FORWARD_DEPTH", "42");
        let cfg = EngineConfig::for_profile("testprofile");
        assert_eq!(cfg.max_forward_depth, 42);
        std::env::remove_var("TESTPROFILE_CHAINFORGE_MAX_FORWARD_DEPTH");
    }
}
