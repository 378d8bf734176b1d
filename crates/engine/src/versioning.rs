//! Append-only per-rule version history with a field-level diff view and
//! rollback support. A `ServiceUnavailable` error-surface: callers that
//! never attach a versioning store simply don't get one (spec §7).

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde_json::Value;

use chainforge_core::error::{EngineError, Result};

use crate::schema::RuleInput;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct VersionEntry {
    pub version: u32,
    pub input: RuleInput,
    pub recorded_at: DateTime<Utc>,
    pub change: ChangeKind,
}

/// One field that differs between two versions. Operates at the same
/// top-level-field granularity as the hot-reload watcher's stable hash
/// (see DESIGN.md) — a field is reported whole, never recursed into.
#[derive(Debug, Clone)]
pub enum FieldChange {
    Added { field: String, value: Value },
    Removed { field: String, value: Value },
    Changed { field: String, from: Value, to: Value },
}

#[derive(Debug, Clone)]
pub struct RuleDiff {
    pub rule_id: String,
    pub from_version: u32,
    pub to_version: u32,
    pub changes: Vec<FieldChange>,
}

const FIELDS: &[&str] = &[
    "id", "name", "description", "priority", "enabled", "tags", "group", "trigger", "conditions",
    "actions", "lookups",
];

fn field_value(input: &RuleInput, field: &str) -> Value {
    let whole = serde_json::to_value(input).unwrap_or(Value::Null);
    whole.get(field).cloned().unwrap_or(Value::Null)
}

pub struct VersioningStore {
    history: RwLock<HashMap<String, Vec<VersionEntry>>>,
    max_entries_per_rule: usize,
}

impl VersioningStore {
    pub fn new(max_entries_per_rule: usize) -> Self {
        Self {
            history: RwLock::new(HashMap::new()),
            max_entries_per_rule,
        }
    }

    pub fn record(&self, rule_id: &str, version: u32, input: RuleInput, change: ChangeKind) {
        let mut history = self.history.write().unwrap();
        let entries = history.entry(rule_id.to_string()).or_default();
        entries.push(VersionEntry {
            version,
            input,
            recorded_at: Utc::now(),
            change,
        });
        if entries.len() > self.max_entries_per_rule {
            entries.remove(0);
        }
    }

    pub fn history(&self, rule_id: &str) -> Vec<VersionEntry> {
        self.history
            .read()
            .unwrap()
            .get(rule_id)
            .cloned()
            .unwrap_or_default()
    }

    fn find(&self, rule_id: &str, version: u32) -> Option<VersionEntry> {
        self.history
            .read()
            .unwrap()
            .get(rule_id)?
            .iter()
            .find(|e| e.version == version)
            .cloned()
    }

    /// Field-level diff between two historical versions of a rule.
    pub fn diff(&self, rule_id: &str, from: u32, to: u32) -> Result<RuleDiff> {
        let from_entry = self
            .find(rule_id, from)
            .ok_or_else(|| EngineError::NotFound(format!("rule {rule_id} has no version {from}")))?;
        let to_entry = self
            .find(rule_id, to)
            .ok_or_else(|| EngineError::NotFound(format!("rule {rule_id} has no version {to}")))?;

        let mut changes = Vec::new();
        for field in FIELDS {
            let before = field_value(&from_entry.input, field);
            let after = field_value(&to_entry.input, field);
            if before == after {
                continue;
            }
            let change = match (before.is_null(), after.is_null()) {
                (true, false) => FieldChange::Added { field: field.to_string(), value: after },
                (false, true) => FieldChange::Removed { field: field.to_string(), value: before },
                _ => FieldChange::Changed { field: field.to_string(), from: before, to: after },
            };
            changes.push(change);
        }

        Ok(RuleDiff {
            rule_id: rule_id.to_string(),
            from_version: from,
            to_version: to,
            changes,
        })
    }

    /// The rule input snapshot at `version`, for the caller to re-apply
    /// via `RuleManager::update`.
    pub fn rollback(&self, rule_id: &str, version: u32) -> Result<RuleInput> {
        self.find(rule_id, version)
            .map(|e| e.input)
            .ok_or_else(|| EngineError::NotFound(format!("rule {rule_id} has no version {version}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Trigger;

    fn input(id: &str, priority: i64) -> RuleInput {
        RuleInput {
            id: id.into(),
            name: id.into(),
            description: None,
            priority,
            enabled: true,
            tags: vec![],
            group: None,
            trigger: Trigger::Event { topic: "t".into() },
            conditions: vec![],
            actions: vec![],
            lookups: None,
        }
    }

    #[test]
    fn diff_reports_changed_priority() {
        let store = VersioningStore::new(10);
        store.record("r1", 1, input("r1", 1), ChangeKind::Created);
        store.record("r1", 2, input("r1", 5), ChangeKind::Updated);
        let diff = store.diff("r1", 1, 2).unwrap();
        assert!(diff
            .changes
            .iter()
            .any(|c| matches!(c, FieldChange::Changed { field, .. } if field == "priority")));
    }

    #[test]
    fn rollback_returns_historical_snapshot() {
        let store = VersioningStore::new(10);
        store.record("r1", 1, input("r1", 1), ChangeKind::Created);
        store.record("r1", 2, input("r1", 5), ChangeKind::Updated);
        let snapshot = store.rollback("r1", 1).unwrap();
        assert_eq!(snapshot.priority, 1);
    }

    #[test]
    fn history_caps_at_max_entries() {
        let store = VersioningStore::new(2);
        store.record("r1", 1, input("r1", 1), ChangeKind::Created);
        store.record("r1", 2, input("r1", 2), ChangeKind::Updated);
        store.record("r1", 3, input("r1", 3), ChangeKind::Updated);
        assert_eq!(store.history("r1").len(), 2);
        assert_eq!(store.history("r1")[0].version, 2);
    }

    #[test]
    fn missing_version_is_not_found() {
        let store = VersioningStore::new(10);
        store.record("r1", 1, input("r1", 1), ChangeKind::Created);
        let err = store.diff("r1", 1, 99).unwrap_err();
        assert!(matches!(err, EngineError::NotFound(_)));
    }
}
