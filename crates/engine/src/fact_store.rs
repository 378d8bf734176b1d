//! Keyed fact store with pattern query and change-source tagging (spec §3,
//! §4.1). Reads are lock-free snapshots; writes happen only inside
//! orchestrator-initiated or action-execution paths.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use serde_json::Value;

use crate::context::fact_pattern_matches;
use crate::schema::Fact;

#[derive(Default)]
pub struct FactStore {
    facts: RwLock<HashMap<String, Fact>>,
}

impl FactStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a fact, returning the previous value (if any) so the caller
    /// can build the `trigger.fact.previous` context.
    pub fn set(&self, key: &str, value: Value, source: &str) -> Option<Value> {
        let mut facts = self.facts.write().unwrap();
        let previous = facts.get(key).map(|f| f.value.clone());
        facts.insert(
            key.to_string(),
            Fact {
                key: key.to_string(),
                value,
                source: source.to_string(),
                updated_at: Utc::now(),
            },
        );
        previous
    }

    pub fn get(&self, key: &str) -> Option<Fact> {
        self.facts.read().unwrap().get(key).cloned()
    }

    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.get(key).map(|f| f.value)
    }

    /// Returns `true` if a fact existed and was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.facts.write().unwrap().remove(key).is_some()
    }

    /// Pattern query using colon-delimited glob semantics.
    pub fn query(&self, pattern: &str) -> Vec<Fact> {
        self.facts
            .read()
            .unwrap()
            .values()
            .filter(|f| fact_pattern_matches(pattern, &f.key))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.facts.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.facts.read().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_get_round_trips() {
        let store = FactStore::new();
        store.set("customer:123:age", Value::from(30), "test");
        assert_eq!(store.get_value("customer:123:age"), Some(Value::from(30)));
    }

    #[test]
    fn set_returns_previous_value() {
        let store = FactStore::new();
        assert_eq!(store.set("k", Value::from(1), "a"), None);
        assert_eq!(store.set("k", Value::from(2), "a"), Some(Value::from(1)));
    }

    #[test]
    fn delete_reports_existence() {
        let store = FactStore::new();
        store.set("k", Value::from(1), "a");
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
    }

    #[test]
    fn query_matches_colon_wildcard() {
        let store = FactStore::new();
        store.set("customer:123:status", Value::from("online"), "a");
        store.set("customer:456:status", Value::from("offline"), "a");
        store.set("customer:123:age", Value::from(30), "a");
        let matched = store.query("customer:*:status");
        assert_eq!(matched.len(), 2);
    }
}
