//! Cron-driven `temporal` triggers (SPEC_FULL.md §11 — spec §3 names the
//! trigger kind but never elaborates it). Ticks once per second, consults
//! `due_rules(now)`, and the caller feeds due rule ids into the
//! orchestrator as a trigger whose payload is `{firedAt: timestamp}`.
//!
//! Grounded on the teacher's `scheduler/core.rs` + `scheduler/cron.rs`
//! almost unchanged; the cooldown concept doesn't apply here since the
//! `temporal` trigger schema carries no cooldown field, so it is dropped.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use cron::Schedule;
use tracing::warn;

use crate::rule_manager::RuleManager;
use crate::schema::Trigger;

/// Normalize a 5-field cron expression to the 6-field form the `cron`
/// crate requires (seconds prepended).
fn normalize_cron(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {trimmed}")
    } else {
        trimmed.to_string()
    }
}

/// A cron schedule is due at `now` if its most recent tick falls between
/// `last_run` (exclusive) and `now` (inclusive).
fn is_cron_due(schedule: &Schedule, now: DateTime<Utc>, last_run: Option<DateTime<Utc>>) -> bool {
    let check_from = last_run.unwrap_or(now - chrono::Duration::days(1));
    schedule.after(&check_from).next().is_some_and(|next| next <= now)
}

#[derive(Debug, Clone)]
struct ScheduleEntry {
    cron_expression: String,
    #[allow(dead_code)]
    timezone: Option<String>,
    last_triggered: Option<DateTime<Utc>>,
}

/// Tracks scheduling state for every rule with a `temporal` trigger.
/// Thread-safe via `std::sync::RwLock`, matching every other store in
/// this crate.
pub struct TemporalScheduler {
    entries: RwLock<HashMap<String, ScheduleEntry>>,
}

impl TemporalScheduler {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Resynchronize against the rule manager's current temporal rules.
    /// Call after registration, update, deletion, or a hot-reload cycle.
    pub fn sync_rules(&self, rules: &RuleManager) {
        let temporal = rules.get_temporal_rules();
        let current_ids: HashSet<String> = temporal.iter().map(|r| r.id.clone()).collect();

        let mut entries = self.entries.write().unwrap();
        entries.retain(|id, _| current_ids.contains(id));

        for rule in &temporal {
            let Trigger::Temporal { cron, timezone } = &rule.trigger else {
                continue;
            };
            let cron_expression = normalize_cron(cron);
            match entries.get_mut(&rule.id) {
                Some(entry) => {
                    entry.cron_expression = cron_expression;
                    entry.timezone = timezone.clone();
                }
                None => {
                    entries.insert(
                        rule.id.clone(),
                        ScheduleEntry {
                            cron_expression,
                            timezone: timezone.clone(),
                            last_triggered: None,
                        },
                    );
                }
            }
        }
    }

    /// Rule ids whose cron schedule is due at `now`. Does not mutate
    /// `last_triggered` — the caller confirms dispatch via
    /// [`record_trigger`](Self::record_trigger) once it has actually fed
    /// the trigger into the orchestrator.
    pub fn due_rules(&self, now: DateTime<Utc>) -> Vec<String> {
        let entries = self.entries.read().unwrap();
        entries
            .iter()
            .filter(|(id, entry)| match Schedule::from_str(&entry.cron_expression) {
                Ok(schedule) => is_cron_due(&schedule, now, entry.last_triggered),
                Err(error) => {
                    warn!(rule_id = %id, cron = %entry.cron_expression, %error, "invalid cron expression");
                    false
                }
            })
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub fn record_trigger(&self, rule_id: &str, at: DateTime<Utc>) {
        if let Some(entry) = self.entries.write().unwrap().get_mut(rule_id) {
            entry.last_triggered = Some(at);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl Default for TemporalScheduler {
    fn default() -> Self {
        Self::new()
    }
}
