//! Goal-directed backward chaining: proves whether a fact value or an
//! event emission is achievable from the current state without mutating
//! anything (spec §4.8).

use std::collections::HashSet;
use std::time::Instant;

use serde_json::Value;

use crate::fact_store::FactStore;
use crate::operator;
use crate::rule_manager::RuleManager;
use crate::schema::{Action, Condition, ConditionSource, Operator, Rule};

/// What the caller wants proven.
#[derive(Debug, Clone)]
pub enum Goal {
    Fact {
        key: String,
        value: Option<Value>,
        operator: Option<Operator>,
    },
    Event {
        topic: String,
    },
}

impl Goal {
    fn signature(&self) -> String {
        match self {
            Goal::Fact { key, .. } => format!("fact:{key}"),
            Goal::Event { topic } => format!("event:{topic}"),
        }
    }
}

/// One node of the returned proof tree.
#[derive(Debug, Clone)]
pub enum ProofNode {
    /// The goal is already true against the live fact store.
    FactExists { key: String, satisfied: bool },
    /// A condition whose source isn't itself provable (event/context/
    /// lookup/baseline) is assumed satisfiable for proof purposes; it
    /// depends on the runtime trigger, not on static rule structure.
    ContextAssumed { description: String },
    RuleSatisfied {
        rule_id: String,
        satisfied: bool,
        children: Vec<ProofNode>,
    },
    Unachievable { reason: String },
}

fn proof_satisfied(node: &ProofNode) -> bool {
    match node {
        ProofNode::FactExists { satisfied, .. } => *satisfied,
        ProofNode::ContextAssumed { .. } => true,
        ProofNode::RuleSatisfied { satisfied, .. } => *satisfied,
        ProofNode::Unachievable { .. } => false,
    }
}

pub struct BackwardChainResult {
    pub achievable: bool,
    pub proof: ProofNode,
    pub explored_rules: usize,
    pub max_depth_reached: bool,
    pub duration_ms: u64,
}

pub struct BackwardChainer<'a> {
    rules: &'a RuleManager,
    facts: &'a FactStore,
    max_depth: usize,
    max_explored_rules: usize,
}

impl<'a> BackwardChainer<'a> {
    pub fn new(rules: &'a RuleManager, facts: &'a FactStore) -> Self {
        Self {
            rules,
            facts,
            max_depth: 10,
            max_explored_rules: 100,
        }
    }

    pub fn with_limits(rules: &'a RuleManager, facts: &'a FactStore, max_depth: usize, max_explored_rules: usize) -> Self {
        Self {
            rules,
            facts,
            max_depth,
            max_explored_rules,
        }
    }

    pub fn query(&self, goal: Goal) -> BackwardChainResult {
        let start = Instant::now();
        let mut ancestors = HashSet::new();
        let mut explored = 0usize;
        let mut max_depth_reached = false;
        let proof = self.solve(&goal, &mut ancestors, 0, &mut explored, &mut max_depth_reached);
        BackwardChainResult {
            achievable: proof_satisfied(&proof),
            proof,
            explored_rules: explored,
            max_depth_reached,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn solve(
        &self,
        goal: &Goal,
        ancestors: &mut HashSet<String>,
        depth: usize,
        explored: &mut usize,
        max_depth_reached: &mut bool,
    ) -> ProofNode {
        if depth > self.max_depth {
            *max_depth_reached = true;
            return ProofNode::Unachievable { reason: "max_depth".into() };
        }

        let signature = goal.signature();
        if ancestors.contains(&signature) {
            return ProofNode::Unachievable { reason: "cycle_detected".into() };
        }

        if let Goal::Fact { key, value, operator: op } = goal {
            let actual = self.facts.get_value(key);
            let satisfied = match (value, op) {
                (Some(expected), maybe_op) => {
                    operator::evaluate(maybe_op.unwrap_or(Operator::Eq), actual.as_ref(), expected)
                }
                (None, _) => actual.is_some(),
            };
            if satisfied {
                return ProofNode::FactExists { key: key.clone(), satisfied: true };
            }
        }

        let candidates = self.candidate_rules(goal);
        if candidates.is_empty() {
            return ProofNode::Unachievable { reason: "no_rules".into() };
        }

        ancestors.insert(signature.clone());
        let mut last_attempt = None;
        for rule in &candidates {
            if *explored >= self.max_explored_rules {
                *max_depth_reached = true;
                break;
            }
            *explored += 1;

            let (satisfied, children) = self.try_rule(rule, ancestors, depth, explored, max_depth_reached);
            let node = ProofNode::RuleSatisfied {
                rule_id: rule.id.clone(),
                satisfied,
                children,
            };
            if satisfied {
                ancestors.remove(&signature);
                return node;
            }
            last_attempt = Some(node);
        }
        ancestors.remove(&signature);

        let _ = last_attempt;
        ProofNode::Unachievable { reason: "all_paths_failed".into() }
    }

    fn try_rule(
        &self,
        rule: &Rule,
        ancestors: &mut HashSet<String>,
        depth: usize,
        explored: &mut usize,
        max_depth_reached: &mut bool,
    ) -> (bool, Vec<ProofNode>) {
        let mut children = Vec::with_capacity(rule.conditions.len());
        let mut all_satisfied = true;
        for condition in &rule.conditions {
            let child = self.condition_proof(condition, ancestors, depth + 1, explored, max_depth_reached);
            let satisfied = proof_satisfied(&child);
            children.push(child);
            if !satisfied {
                all_satisfied = false;
                break;
            }
        }
        (all_satisfied, children)
    }

    fn condition_proof(
        &self,
        condition: &Condition,
        ancestors: &mut HashSet<String>,
        depth: usize,
        explored: &mut usize,
        max_depth_reached: &mut bool,
    ) -> ProofNode {
        match &condition.source {
            ConditionSource::Fact { pattern } => {
                let sub_goal = Goal::Fact {
                    key: pattern.clone(),
                    value: Some(condition.value.clone()),
                    operator: Some(condition.operator),
                };
                self.solve(&sub_goal, ancestors, depth, explored, max_depth_reached)
            }
            other => ProofNode::ContextAssumed {
                description: format!("{other:?}"),
            },
        }
    }

    fn candidate_rules(&self, goal: &Goal) -> Vec<Rule> {
        let mut rules: Vec<Rule> = self
            .rules
            .get_all_effectively_enabled()
            .into_iter()
            .filter(|rule| match goal {
                Goal::Fact { key, .. } => rule_produces_fact(rule, key),
                Goal::Event { topic } => rule_produces_event(rule, topic),
            })
            .collect();
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        rules
    }
}

fn rule_produces_fact(rule: &Rule, key: &str) -> bool {
    actions_contain(&rule.actions, &|action| matches!(
        action,
        Action::SetFact { key: Value::String(k), .. } if k == key
    ))
}

fn rule_produces_event(rule: &Rule, topic: &str) -> bool {
    actions_contain(&rule.actions, &|action| matches!(
        action,
        Action::EmitEvent { topic: Value::String(t), .. } if t == topic
    ))
}

fn actions_contain(actions: &[Action], pred: &dyn Fn(&Action) -> bool) -> bool {
    actions.iter().any(|action| {
        if pred(action) {
            return true;
        }
        match action {
            Action::Conditional { then, r#else, .. } => {
                actions_contain(then, pred) || actions_contain(r#else, pred)
            }
            Action::ForEach { actions, .. } => actions_contain(actions, pred),
            Action::TryCatch { r#try, catch, finally } => {
                actions_contain(r#try, pred) || actions_contain(&catch.actions, pred) || actions_contain(finally, pred)
            }
            _ => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Rule, Trigger};
    use serde_json::json;

    fn base_rule(id: &str, priority: i64, conditions: Vec<Condition>, actions: Vec<Action>) -> Rule {
        Rule {
            id: id.into(),
            name: id.into(),
            description: None,
            priority,
            enabled: true,
            version: 1,
            tags: vec![],
            group: None,
            trigger: Trigger::Event { topic: "noop".into() },
            conditions,
            actions,
            lookups: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn rule_input_from(rule: &Rule) -> crate::schema::RuleInput {
        rule.as_input()
    }

    #[test]
    fn fact_already_in_store_is_trivially_achievable() {
        let facts = FactStore::new();
        facts.set("customer:active", json!(true), "test");
        let rules = RuleManager::new();
        let chainer = BackwardChainer::new(&rules, &facts);
        let result = chainer.query(Goal::Fact {
            key: "customer:active".into(),
            value: Some(json!(true)),
            operator: None,
        });
        assert!(result.achievable);
        assert_eq!(result.explored_rules, 0);
    }

    #[test]
    fn two_rule_chain_is_achievable_with_two_explored_rules() {
        let facts = FactStore::new();
        facts.set("customer:active", json!(true), "test");
        let rules = RuleManager::new();

        let loyalty_rule = base_rule(
            "grant-loyalty-points",
            1,
            vec![Condition {
                source: ConditionSource::Fact { pattern: "customer:active".into() },
                operator: Operator::Eq,
                value: json!(true),
            }],
            vec![Action::SetFact { key: json!("customer:loyaltyPoints"), value: json!(100) }],
        );
        let vip_rule = base_rule(
            "vip-upgrade",
            1,
            vec![Condition {
                source: ConditionSource::Fact { pattern: "customer:loyaltyPoints".into() },
                operator: Operator::Gte,
                value: json!(50),
            }],
            vec![Action::SetFact { key: json!("customer:tier"), value: json!("vip") }],
        );

        rules.register(rule_input_from(&loyalty_rule)).unwrap();
        rules.register(rule_input_from(&vip_rule)).unwrap();

        let chainer = BackwardChainer::new(&rules, &facts);
        let result = chainer.query(Goal::Fact {
            key: "customer:tier".into(),
            value: None,
            operator: None,
        });

        assert!(result.achievable);
        assert_eq!(result.explored_rules, 2);
        match result.proof {
            ProofNode::RuleSatisfied { rule_id, .. } => assert_eq!(rule_id, "vip-upgrade"),
            other => panic!("expected RuleSatisfied root, got {other:?}"),
        }
    }

    #[test]
    fn unreachable_goal_with_no_producing_rule_reports_no_rules() {
        let facts = FactStore::new();
        let rules = RuleManager::new();
        let chainer = BackwardChainer::new(&rules, &facts);
        let result = chainer.query(Goal::Fact {
            key: "customer:ghost".into(),
            value: None,
            operator: None,
        });
        assert!(!result.achievable);
        assert!(matches!(result.proof, ProofNode::Unachievable { reason } if reason == "no_rules"));
    }

    #[test]
    fn cyclic_rule_chain_is_reported_unachievable() {
        let facts = FactStore::new();
        let rules = RuleManager::new();
        let a = base_rule(
            "a-sets-b",
            1,
            vec![Condition {
                source: ConditionSource::Fact { pattern: "x:b".into() },
                operator: Operator::Eq,
                value: json!(true),
            }],
            vec![Action::SetFact { key: json!("x:a"), value: json!(true) }],
        );
        let b = base_rule(
            "b-sets-a",
            1,
            vec![Condition {
                source: ConditionSource::Fact { pattern: "x:a".into() },
                operator: Operator::Eq,
                value: json!(true),
            }],
            vec![Action::SetFact { key: json!("x:b"), value: json!(true) }],
        );
        rules.register(rule_input_from(&a)).unwrap();
        rules.register(rule_input_from(&b)).unwrap();

        let chainer = BackwardChainer::new(&rules, &facts);
        let result = chainer.query(Goal::Fact { key: "x:a".into(), value: None, operator: None });
        assert!(!result.achievable);
    }
}
