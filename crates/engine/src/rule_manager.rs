//! Registers rules and groups, indexes them by trigger, and enforces
//! enable/disable and group gating (spec §4.2).

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::Utc;

use chainforge_core::error::{EngineError, Result, ValidationIssue};
use chainforge_core::pattern::is_literal;

use crate::context::{fact_pattern_matches, topic_pattern_matches};
use crate::schema::{Rule, RuleGroup, RuleInput, Trigger};

/// Per-trigger-kind inverted index: an exact map plus a wildcard list,
/// per the spec's "direct map + wildcard bucket" design.
#[derive(Default)]
struct Index {
    exact: HashMap<String, HashSet<String>>,
    wildcard: Vec<(String, String)>, // (pattern, rule_id)
}

impl Index {
    fn insert(&mut self, key: &str, rule_id: &str) {
        if is_literal(key) {
            self.exact
                .entry(key.to_string())
                .or_default()
                .insert(rule_id.to_string());
        } else {
            self.wildcard.push((key.to_string(), rule_id.to_string()));
        }
    }

    fn remove(&mut self, key: &str, rule_id: &str) {
        if let Some(set) = self.exact.get_mut(key) {
            set.remove(rule_id);
        }
        self.wildcard.retain(|(p, r)| !(p == key && r == rule_id));
    }

    fn lookup(&self, candidate: &str, matcher: impl Fn(&str, &str) -> bool) -> HashSet<String> {
        let mut out: HashSet<String> = self
            .exact
            .get(candidate)
            .cloned()
            .unwrap_or_default();
        for (pattern, rule_id) in &self.wildcard {
            if matcher(pattern, candidate) {
                out.insert(rule_id.clone());
            }
        }
        out
    }
}

#[derive(Default)]
struct State {
    rules: HashMap<String, Rule>,
    groups: HashMap<String, RuleGroup>,
    by_fact: Index,
    by_event: Index,
    by_timer: Index,
    by_temporal: HashMap<String, String>, // rule_id -> cron trigger key (rule_id itself)
    next_version: HashMap<String, u32>,
}

pub struct RuleManager {
    state: RwLock<State>,
}

impl RuleManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(State::default()),
        }
    }

    pub fn register_group(&self, group: RuleGroup) -> Result<()> {
        let mut state = self.state.write().unwrap();
        if state.groups.contains_key(&group.id) {
            return Err(EngineError::Conflict(format!(
                "group already exists: {}",
                group.id
            )));
        }
        state.groups.insert(group.id.clone(), group);
        Ok(())
    }

    pub fn get_group(&self, id: &str) -> Option<RuleGroup> {
        self.state.read().unwrap().groups.get(id).cloned()
    }

    pub fn set_group_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let group = state
            .groups
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("group not found: {id}")))?;
        group.enabled = enabled;
        Ok(())
    }

    /// Validate and register a new rule. Rejects duplicate ids, missing
    /// required fields, and dangling group references.
    pub fn register(&self, input: RuleInput) -> Result<Rule> {
        let issues = self.validate(&input, None);
        if issues.iter().any(|i| i.severity == chainforge_core::error::Severity::Error) {
            return Err(EngineError::Validation { issues });
        }

        let mut state = self.state.write().unwrap();
        if state.rules.contains_key(&input.id) {
            return Err(EngineError::Conflict(format!(
                "rule already exists: {}",
                input.id
            )));
        }

        let version = 1;
        state.next_version.insert(input.id.clone(), version);
        let rule = Rule::from_input(input, version, Utc::now());
        self.index_rule(&mut state, &rule);
        state.rules.insert(rule.id.clone(), rule.clone());
        Ok(rule)
    }

    /// Unregister + re-register atomically, preserving id and incrementing
    /// version. Returns the updated rule.
    pub fn update(&self, id: &str, input: RuleInput) -> Result<Rule> {
        if input.id != id {
            return Err(EngineError::BadRequest(
                "update input id must match target id".into(),
            ));
        }
        let issues = self.validate(&input, Some(id));
        if issues.iter().any(|i| i.severity == chainforge_core::error::Severity::Error) {
            return Err(EngineError::Validation { issues });
        }

        let mut state = self.state.write().unwrap();
        let existing = state
            .rules
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("rule not found: {id}")))?;
        self.unindex_rule(&mut state, &existing);

        let next_version = state.next_version.get(id).copied().unwrap_or(1) + 1;
        state.next_version.insert(id.to_string(), next_version);

        let mut rule = Rule::from_input(input, next_version, existing.created_at);
        rule.updated_at = Utc::now();
        self.index_rule(&mut state, &rule);
        state.rules.insert(id.to_string(), rule.clone());
        Ok(rule)
    }

    pub fn unregister(&self, id: &str) -> Result<Rule> {
        let mut state = self.state.write().unwrap();
        let rule = state
            .rules
            .remove(id)
            .ok_or_else(|| EngineError::NotFound(format!("rule not found: {id}")))?;
        self.unindex_rule(&mut state, &rule);
        Ok(rule)
    }

    pub fn enable(&self, id: &str) -> Result<()> {
        self.set_enabled(id, true)
    }

    pub fn disable(&self, id: &str) -> Result<()> {
        self.set_enabled(id, false)
    }

    fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let mut state = self.state.write().unwrap();
        let rule = state
            .rules
            .get_mut(id)
            .ok_or_else(|| EngineError::NotFound(format!("rule not found: {id}")))?;
        rule.enabled = enabled;
        rule.updated_at = Utc::now();
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Rule> {
        self.state.read().unwrap().rules.get(id).cloned()
    }

    pub fn get_all(&self) -> Vec<Rule> {
        self.state.read().unwrap().rules.values().cloned().collect()
    }

    /// All effectively-enabled rules, for callers (the backward chainer)
    /// that need to scan actions rather than look up by trigger key.
    pub fn get_all_effectively_enabled(&self) -> Vec<Rule> {
        let state = self.state.read().unwrap();
        state
            .rules
            .values()
            .filter(|r| Self::is_effectively_enabled(&state, r))
            .cloned()
            .collect()
    }

    fn is_effectively_enabled(state: &State, rule: &Rule) -> bool {
        if !rule.enabled {
            return false;
        }
        match &rule.group {
            Some(group_id) => state
                .groups
                .get(group_id)
                .map(|g| g.enabled)
                .unwrap_or(false),
            None => true,
        }
    }

    /// Effectively enabled rules matching `key` under the fact-pattern
    /// trigger grammar, sorted by descending priority (ties broken by
    /// insertion order for deterministic replay).
    pub fn get_by_fact_pattern(&self, key: &str) -> Vec<Rule> {
        self.select(|state| state.by_fact.lookup(key, fact_pattern_matches))
    }

    pub fn get_by_event_topic(&self, topic: &str) -> Vec<Rule> {
        self.select(|state| state.by_event.lookup(topic, topic_pattern_matches))
    }

    pub fn get_by_timer_name(&self, name: &str) -> Vec<Rule> {
        self.select(|state| state.by_timer.lookup(name, fact_pattern_matches))
    }

    pub fn get_temporal_rules(&self) -> Vec<Rule> {
        let state = self.state.read().unwrap();
        let ids: Vec<String> = state.by_temporal.keys().cloned().collect();
        drop(state);
        self.select(move |_| ids.iter().cloned().collect())
    }

    fn select(&self, candidate_ids: impl FnOnce(&State) -> HashSet<String>) -> Vec<Rule> {
        let state = self.state.read().unwrap();
        let ids = candidate_ids(&state);
        let mut rules: Vec<Rule> = ids
            .into_iter()
            .filter_map(|id| state.rules.get(&id).cloned())
            .filter(|r| Self::is_effectively_enabled(&state, r))
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }

    fn index_rule(&self, state: &mut State, rule: &Rule) {
        match &rule.trigger {
            Trigger::Fact { pattern } => state.by_fact.insert(pattern, &rule.id),
            Trigger::Event { topic } => state.by_event.insert(topic, &rule.id),
            Trigger::Timer { pattern } => state.by_timer.insert(pattern, &rule.id),
            Trigger::Temporal { .. } => {
                state.by_temporal.insert(rule.id.clone(), rule.id.clone());
            }
        }
    }

    fn unindex_rule(&self, state: &mut State, rule: &Rule) {
        match &rule.trigger {
            Trigger::Fact { pattern } => state.by_fact.remove(pattern, &rule.id),
            Trigger::Event { topic } => state.by_event.remove(topic, &rule.id),
            Trigger::Timer { pattern } => state.by_timer.remove(pattern, &rule.id),
            Trigger::Temporal { .. } => {
                state.by_temporal.remove(&rule.id);
            }
        }
    }

    /// Validate a candidate input without registering it. Used by the
    /// hot-reload watcher's `validateBeforeApply` pass.
    pub fn validate_input(&self, input: &RuleInput) -> Vec<ValidationIssue> {
        self.validate(input, None)
    }

    fn validate(&self, input: &RuleInput, _existing_id: Option<&str>) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();
        if input.id.trim().is_empty() {
            issues.push(ValidationIssue::error("id", "id must not be empty"));
        }
        if input.name.trim().is_empty() {
            issues.push(ValidationIssue::error("name", "name must not be empty"));
        }
        if let Some(group_id) = &input.group {
            let state = self.state.read().unwrap();
            if !state.groups.contains_key(group_id) {
                issues.push(ValidationIssue::error(
                    "group",
                    format!("group does not exist: {group_id}"),
                ));
            }
        }
        match &input.trigger {
            Trigger::Fact { pattern } if pattern.trim().is_empty() => {
                issues.push(ValidationIssue::error("trigger.pattern", "pattern must not be empty"));
            }
            Trigger::Event { topic } if topic.trim().is_empty() => {
                issues.push(ValidationIssue::error("trigger.topic", "topic must not be empty"));
            }
            Trigger::Timer { pattern } if pattern.trim().is_empty() => {
                issues.push(ValidationIssue::error("trigger.pattern", "pattern must not be empty"));
            }
            Trigger::Temporal { cron, .. } if cron.trim().is_empty() => {
                issues.push(ValidationIssue::error("trigger.cron", "cron must not be empty"));
            }
            _ => {}
        }
        if input.actions.is_empty() {
            issues.push(ValidationIssue::warning(
                "actions",
                "rule has no actions and will never have an observable effect",
            ));
        }
        issues
    }
}

impl Default for RuleManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Trigger;

    fn input(id: &str, topic: &str, priority: i64) -> RuleInput {
        RuleInput {
            id: id.to_string(),
            name: id.to_string(),
            description: None,
            priority,
            enabled: true,
            tags: vec![],
            group: None,
            trigger: Trigger::Event { topic: topic.to_string() },
            conditions: vec![],
            actions: vec![crate::schema::Action::Log { message: value_log() }],
            lookups: None,
        }
    }

    fn value_log() -> serde_json::Value {
        serde_json::json!("noop")
    }

    #[test]
    fn register_then_get_round_trips() {
        let mgr = RuleManager::new();
        let rule = mgr.register(input("r1", "order.created", 1)).unwrap();
        assert_eq!(mgr.get("r1"), Some(rule));
    }

    #[test]
    fn duplicate_id_is_conflict() {
        let mgr = RuleManager::new();
        mgr.register(input("r1", "order.created", 1)).unwrap();
        let err = mgr.register(input("r1", "order.created", 1)).unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));
    }

    #[test]
    fn dangling_group_reference_is_rejected() {
        let mgr = RuleManager::new();
        let mut i = input("r1", "order.created", 1);
        i.group = Some("missing-group".into());
        let err = mgr.register(i).unwrap_err();
        assert!(matches!(err, EngineError::Validation { .. }));
    }

    #[test]
    fn disabled_rules_are_excluded_from_selection() {
        let mgr = RuleManager::new();
        mgr.register(input("r1", "order.created", 1)).unwrap();
        mgr.disable("r1").unwrap();
        assert!(mgr.get_by_event_topic("order.created").is_empty());
    }

    #[test]
    fn group_gating_is_effective_without_touching_rule() {
        let mgr = RuleManager::new();
        mgr.register_group(RuleGroup {
            id: "g1".into(),
            name: "g1".into(),
            description: None,
            enabled: false,
        })
        .unwrap();
        let mut i = input("r1", "order.created", 1);
        i.group = Some("g1".into());
        mgr.register(i).unwrap();
        assert!(mgr.get_by_event_topic("order.created").is_empty());
        mgr.set_group_enabled("g1", true).unwrap();
        assert_eq!(mgr.get_by_event_topic("order.created").len(), 1);
    }

    #[test]
    fn selection_sorted_by_descending_priority() {
        let mgr = RuleManager::new();
        mgr.register(input("low", "t", 1)).unwrap();
        mgr.register(input("high", "t", 100)).unwrap();
        let rules = mgr.get_by_event_topic("t");
        assert_eq!(rules[0].id, "high");
        assert_eq!(rules[1].id, "low");
    }

    #[test]
    fn update_preserves_id_and_bumps_version() {
        let mgr = RuleManager::new();
        mgr.register(input("r1", "t", 1)).unwrap();
        let updated = mgr.update("r1", input("r1", "t2", 5)).unwrap();
        assert_eq!(updated.id, "r1");
        assert_eq!(updated.version, 2);
        assert_eq!(mgr.get_by_event_topic("t").len(), 0);
        assert_eq!(mgr.get_by_event_topic("t2").len(), 1);
    }
}
