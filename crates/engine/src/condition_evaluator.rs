//! Evaluates an ordered condition list with short-circuit AND (spec §4.3).

use serde_json::Value;

use crate::baseline::BaselineStore;
use crate::context::{resolve_path, resolve_value, EvalContext};
use crate::fact_store::FactStore;
use crate::operator;
use crate::schema::{Condition, ConditionSource};

/// Observes each condition as it is evaluated, in order, stopping at the
/// first `false`. Used to make invariant 3 (spec §8) directly testable.
pub trait ConditionObserver {
    fn on_condition_evaluated(&mut self, index: usize, condition: &Condition, passed: bool);
}

impl ConditionObserver for () {
    fn on_condition_evaluated(&mut self, _index: usize, _condition: &Condition, _passed: bool) {}
}

/// Evaluate `conditions` against `ctx`, short-circuiting on the first
/// failure. An empty list always passes (spec §8 boundary behavior).
pub fn evaluate_all(
    conditions: &[Condition],
    ctx: &EvalContext,
    facts: &FactStore,
    baseline: Option<&BaselineStore>,
    observer: &mut impl ConditionObserver,
) -> bool {
    let root = ctx.root();
    for (index, condition) in conditions.iter().enumerate() {
        let passed = evaluate_one(condition, ctx, &root, facts, baseline);
        observer.on_condition_evaluated(index, condition, passed);
        if !passed {
            return false;
        }
    }
    true
}

fn evaluate_one(
    condition: &Condition,
    ctx: &EvalContext,
    root: &Value,
    facts: &FactStore,
    baseline: Option<&BaselineStore>,
) -> bool {
    if let ConditionSource::Baseline {
        metric,
        comparison,
        sensitivity,
    } = &condition.source
    {
        let Some(store) = baseline else { return false };
        let Some(probe) = resolve_value(&condition.value, root).as_f64() else {
            return false;
        };
        return store.evaluate(metric, probe, *comparison, *sensitivity);
    }

    let actual = resolve_source(&condition.source, ctx, root, facts);
    let expected = resolve_value(&condition.value, root);
    operator::evaluate(condition.operator, actual.as_ref(), &expected)
}

fn resolve_source(
    source: &ConditionSource,
    ctx: &EvalContext,
    root: &Value,
    facts: &FactStore,
) -> Option<Value> {
    match source {
        ConditionSource::Fact { pattern } => {
            if chainforge_core::pattern::is_literal(pattern) {
                facts.get_value(pattern)
            } else {
                facts.query(pattern).into_iter().next().map(|f| f.value)
            }
        }
        ConditionSource::Event { field } => resolve_path(root, &format!("event.{field}")).cloned(),
        ConditionSource::Context { key } => resolve_path(root, &format!("var.{key}")).cloned(),
        ConditionSource::Lookup { name, field } => {
            let path = match field {
                Some(f) => format!("lookup.{name}.{f}"),
                None => format!("lookup.{name}"),
            };
            resolve_path(root, &path).cloned()
        }
        ConditionSource::Baseline { .. } => {
            let _ = ctx;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TriggerPayload;
    use crate::schema::{Event, Operator};
    use serde_json::json;

    #[test]
    fn empty_condition_list_always_passes() {
        let trigger = TriggerPayload::Event {
            event: Event::new("t", json!({}), "test"),
        };
        let ctx = EvalContext::new(&trigger);
        let facts = FactStore::new();
        assert!(evaluate_all(&[], &ctx, &facts, None, &mut ()));
    }

    #[test]
    fn short_circuits_on_first_failure() {
        let trigger = TriggerPayload::Event {
            event: Event::new("t", json!({"a": 1}), "test"),
        };
        let ctx = EvalContext::new(&trigger);
        let facts = FactStore::new();
        let conditions = vec![
            Condition {
                source: ConditionSource::Event { field: "a".into() },
                operator: Operator::Eq,
                value: json!(2),
            },
            Condition {
                source: ConditionSource::Event { field: "a".into() },
                operator: Operator::Eq,
                value: json!(1),
            },
        ];
        struct Recorder(Vec<bool>);
        impl ConditionObserver for Recorder {
            fn on_condition_evaluated(&mut self, _i: usize, _c: &Condition, passed: bool) {
                self.0.push(passed);
            }
        }
        let mut recorder = Recorder(Vec::new());
        assert!(!evaluate_all(&conditions, &ctx, &facts, None, &mut recorder));
        assert_eq!(recorder.0, vec![false]);
    }

    #[test]
    fn fact_pattern_condition_reads_store() {
        let trigger = TriggerPayload::Event {
            event: Event::new("t", json!({}), "test"),
        };
        let ctx = EvalContext::new(&trigger);
        let facts = FactStore::new();
        facts.set("customer:123:status", json!("online"), "test");
        let conditions = vec![Condition {
            source: ConditionSource::Fact { pattern: "customer:123:status".into() },
            operator: Operator::Eq,
            value: json!("online"),
        }];
        assert!(evaluate_all(&conditions, &ctx, &facts, None, &mut ()));
    }
}
