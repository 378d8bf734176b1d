use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::action::Action;
use super::condition::Condition;
use super::lookup::Lookup;

/// Exactly one of these selects which stimulus kind a rule reacts to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trigger {
    Fact { pattern: String },
    Event { topic: String },
    Timer { pattern: String },
    Temporal {
        cron: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        timezone: Option<String>,
    },
}

impl Trigger {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Trigger::Fact { .. } => "fact",
            Trigger::Event { .. } => "event",
            Trigger::Timer { .. } => "timer",
            Trigger::Temporal { .. } => "temporal",
        }
    }
}

/// A named collection that gates rule activation as a unit. A rule is
/// *effectively enabled* iff `rule.enabled && (rule.group.is_none() ||
/// group.enabled)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleGroup {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub enabled: bool,
}

/// A declarative automation rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rule {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i64,
    pub enabled: bool,
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookups: Option<Vec<Lookup>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields accepted on `registerRule`/`updateRule`, before the engine
/// assigns `version`, `createdAt`, `updatedAt`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleInput {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    pub trigger: Trigger,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookups: Option<Vec<Lookup>>,
}

fn default_true() -> bool {
    true
}

impl Rule {
    pub fn from_input(input: RuleInput, version: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: input.id,
            name: input.name,
            description: input.description,
            priority: input.priority,
            enabled: input.enabled,
            version,
            tags: input.tags,
            group: input.group,
            trigger: input.trigger,
            conditions: input.conditions,
            actions: input.actions,
            lookups: input.lookups,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn as_input(&self) -> RuleInput {
        RuleInput {
            id: self.id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            priority: self.priority,
            enabled: self.enabled,
            tags: self.tags.clone(),
            group: self.group.clone(),
            trigger: self.trigger.clone(),
            conditions: self.conditions.clone(),
            actions: self.actions.clone(),
            lookups: self.lookups.clone(),
        }
    }
}
