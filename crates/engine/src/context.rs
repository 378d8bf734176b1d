//! The per-trigger evaluation context: the root JSON object that
//! `${path}` interpolation and `{ref: "path"}` resolution walk, built fresh
//! for every trigger processed.
//!
//! Reference paths (spec §4.4): `event.<field>` (the event's data payload),
//! `trigger.<kind>.<field>` (the full envelope, e.g. `trigger.event.id`),
//! `fact.<key>` (shorthand, valid for fact triggers), `var.<name.path>`,
//! `lookup.<name.field.path>`, `matched.<index>.<field>`. Undefined
//! references interpolate as empty string and resolve as `null`.

use std::collections::HashMap;

use serde_json::{Map, Value};

use chainforge_core::pattern::{matches, PatternKind};

use crate::schema::Event;

/// What fired this evaluation round.
#[derive(Debug, Clone)]
pub enum TriggerPayload {
    Fact {
        key: String,
        value: Value,
        previous: Option<Value>,
        source: String,
    },
    Event {
        event: Event,
    },
    Timer {
        id: String,
        name: String,
        data: Value,
    },
    Temporal {
        rule_id: String,
        fired_at: chrono::DateTime<chrono::Utc>,
    },
}

impl TriggerPayload {
    pub fn kind_name(&self) -> &'static str {
        match self {
            TriggerPayload::Fact { .. } => "fact",
            TriggerPayload::Event { .. } => "event",
            TriggerPayload::Timer { .. } => "timer",
            TriggerPayload::Temporal { .. } => "temporal",
        }
    }

    /// The trigger key used to consult the rule manager's inverted index:
    /// the fact key, event topic, or timer name.
    pub fn index_key(&self) -> &str {
        match self {
            TriggerPayload::Fact { key, .. } => key,
            TriggerPayload::Event { event } => &event.topic,
            TriggerPayload::Timer { name, .. } => name,
            TriggerPayload::Temporal { rule_id, .. } => rule_id,
        }
    }

    pub fn correlation_id(&self) -> Option<String> {
        match self {
            TriggerPayload::Event { event } => event.correlation_id.clone(),
            _ => None,
        }
    }

    fn as_json(&self) -> Value {
        match self {
            TriggerPayload::Fact {
                key,
                value,
                previous,
                source,
            } => serde_json::json!({
                "key": key,
                "value": value,
                "previous": previous,
                "source": source,
            }),
            TriggerPayload::Event { event } => serde_json::to_value(event).unwrap_or(Value::Null),
            TriggerPayload::Timer { id, name, data } => serde_json::json!({
                "id": id,
                "name": name,
                "data": data,
            }),
            TriggerPayload::Temporal { rule_id, fired_at } => serde_json::json!({
                "ruleId": rule_id,
                "firedAt": fired_at.to_rfc3339(),
            }),
        }
    }
}

/// The live evaluation context for one rule's condition/action run.
pub struct EvalContext<'a> {
    pub trigger: &'a TriggerPayload,
    pub variables: HashMap<String, Value>,
    pub lookups: HashMap<String, Value>,
    pub matched: Vec<Value>,
    /// Forward-chaining depth of the trigger this context was built for.
    /// Carried so a reentrant `emit_event` knows which depth its cascade
    /// continues at, without threading a separate parameter through every
    /// composed action.
    pub depth: usize,
}

impl<'a> EvalContext<'a> {
    pub fn new(trigger: &'a TriggerPayload) -> Self {
        Self {
            trigger,
            variables: HashMap::new(),
            lookups: HashMap::new(),
            matched: Vec::new(),
            depth: 0,
        }
    }

    /// Build the root JSON object that paths are resolved against.
    pub fn root(&self) -> Value {
        let mut root = Map::new();
        let trigger_json = self.trigger.as_json();

        let mut trigger_wrapper = Map::new();
        trigger_wrapper.insert(self.trigger.kind_name().to_string(), trigger_json.clone());
        root.insert("trigger".to_string(), Value::Object(trigger_wrapper));

        // `event.<field>` is a shorthand alias valid when the trigger is an
        // event, bound to the event's data payload so `event.items` reaches
        // the payload directly; the full envelope (id/topic/timestamp/...)
        // stays reachable under `trigger.event`. `fact.<key>` likewise
        // aliases the fact trigger.
        match self.trigger {
            TriggerPayload::Event { event } => {
                root.insert("event".to_string(), event.data.clone());
            }
            TriggerPayload::Fact { .. } => {
                root.insert("fact".to_string(), trigger_json);
            }
            TriggerPayload::Timer { .. } => {
                root.insert("timer".to_string(), trigger_json);
            }
            TriggerPayload::Temporal { .. } => {}
        }

        let vars: Map<String, Value> = self
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        root.insert("var".to_string(), Value::Object(vars));

        let lookups: Map<String, Value> = self
            .lookups
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        root.insert("lookup".to_string(), Value::Object(lookups));

        root.insert("matched".to_string(), Value::Array(self.matched.clone()));

        Value::Object(root)
    }
}

/// Walk a dot-delimited path into `root`, treating numeric segments as
/// array indices. Returns `None` for any undefined segment.
pub fn resolve_path<'v>(root: &'v Value, path: &str) -> Option<&'v Value> {
    let mut current = root;
    for segment in path.split('.') {
        if segment.is_empty() {
            continue;
        }
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => {
                let index: usize = segment.parse().ok()?;
                items.get(index)?
            }
            _ => return None,
        };
    }
    Some(current)
}

/// Expand `${path}` placeholders in a string. Undefined references
/// interpolate as empty string; non-string resolved values are rendered
/// via their JSON display form.
pub fn interpolate_string(input: &str, root: &Value) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.char_indices().peekable();

    while let Some((_, ch)) = chars.next() {
        if ch == '$' && chars.peek().map(|(_, c)| *c) == Some('{') {
            chars.next();
            let mut path = String::new();
            let mut closed = false;
            for (_, c) in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                path.push(c);
            }
            if !closed {
                out.push_str("${");
                out.push_str(&path);
                continue;
            }
            match resolve_path(root, path.trim()) {
                Some(Value::String(s)) => out.push_str(s),
                Some(other) => out.push_str(&value_to_display(other)),
                None => {}
            }
        } else {
            out.push(ch);
        }
    }

    out
}

fn value_to_display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Resolve one action/condition input field: a `{ref: "path"}` object
/// replaces the whole value; a string is `${path}`-interpolated in place;
/// arrays and objects are resolved recursively; anything else is a
/// literal.
pub fn resolve_value(value: &Value, root: &Value) -> Value {
    match value {
        Value::Object(map) if map.len() == 1 && map.contains_key("ref") => {
            match map.get("ref").and_then(Value::as_str) {
                Some(path) => resolve_path(root, path).cloned().unwrap_or(Value::Null),
                None => Value::Null,
            }
        }
        Value::String(s) => Value::String(interpolate_string(s, root)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, root)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_value(v, root)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// True when `pattern` (colon-delimited, `*` = one segment) matches `key`.
pub fn fact_pattern_matches(pattern: &str, key: &str) -> bool {
    matches(PatternKind::Colon, pattern, key).unwrap_or(false)
}

/// True when `pattern` (dot-delimited, `*`/`**`) matches `topic`.
pub fn topic_pattern_matches(pattern: &str, topic: &str) -> bool {
    matches(PatternKind::Dot, pattern, topic).unwrap_or(false)
}
