//! The orchestrator that binds every subsystem together (spec §4): an
//! ordered trigger queue, rule selection and concurrent fan-out, the
//! forward-chaining depth guard, subscriber notification, and the public
//! surface the rest of the workspace drives the engine through.
//!
//! `Engine` is always held behind an `Arc`. It implements [`ActionHost`]
//! and [`TimerSink`] so [`ActionExecutor`] and [`TimerManager`] can call
//! back into it, which creates a construction cycle: those two need a
//! handle to the engine before the engine itself exists. `Arc::new_cyclic`
//! resolves it — [`EngineHandle`] wraps the `Weak<Engine>` it hands out
//! and upgrades it on every callback, becoming a silent no-op once the
//! engine itself has been dropped.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use chainforge_core::config::EngineConfig;
use chainforge_core::error::Result;

use chainforge_services::ServiceRegistry;

use crate::action_executor::{ActionExecutor, ActionHost};
use crate::backward_chainer::{BackwardChainResult, BackwardChainer, Goal};
use crate::baseline::BaselineStore;
use crate::condition_evaluator::evaluate_all;
use crate::context::{EvalContext, TriggerPayload};
use crate::event_store::EventStore;
use crate::fact_store::FactStore;
use crate::hot_reload::QueueBarrier;
use crate::lookup_resolver::{resolve_lookups, LookupCache, LookupResolution};
use crate::observability::{
    Attribution, AuditEventKind, Observability, TraceAttribution, TraceEventKind,
};
use crate::rule_manager::RuleManager;
use crate::schema::{Event, Fact, OnExpire, RepeatPolicy, Rule, RuleGroup, RuleInput, Timer};
use crate::scheduler::TemporalScheduler;
use crate::timer_manager::{parse_timer_duration, TimerManager, TimerSink};
use crate::versioning::{ChangeKind, VersioningStore};

/// Point-in-time counters exposed by [`Engine::get_stats`] (SPEC_FULL.md
/// §11's `getStats()`).
#[derive(Debug, Clone, Default)]
pub struct Stats {
    pub triggers_processed: u64,
    pub rules_skipped: HashMap<String, u64>,
    pub rules_failed: u64,
    pub forward_chaining_limit_hits: u64,
    pub queue_depth: usize,
    pub rule_counts_by_kind: HashMap<String, usize>,
}

#[derive(Default)]
struct EngineStats {
    triggers_processed: AtomicU64,
    forward_chaining_limit_hits: AtomicU64,
    rules_failed: AtomicU64,
    rules_skipped: RwLock<HashMap<String, u64>>,
    queue_depth: AtomicUsize,
}

type SubscriberHandler = dyn Fn(Event) -> BoxFuture<'static, ()> + Send + Sync;

struct Subscriber {
    id: u64,
    pattern: String,
    handler: Arc<SubscriberHandler>,
}

/// Forwards [`ActionHost`]/[`TimerSink`] callbacks into the engine via a
/// weak handle, so `Arc::new_cyclic` can hand it to subsystems built
/// before the engine's own `Arc` exists.
struct EngineHandle(Weak<Engine>);

#[async_trait]
impl ActionHost for EngineHandle {
    async fn emit_reentrant(&self, event: Event, depth: usize) {
        if let Some(engine) = self.0.upgrade() {
            engine.process_reentrant_event(event, depth).await;
        }
    }
}

#[async_trait]
impl TimerSink for EngineHandle {
    async fn on_timer_fired(&self, timer: Timer) {
        if let Some(engine) = self.0.upgrade() {
            engine.handle_timer_fired(timer).await;
        }
    }
}

pub struct Engine {
    config: EngineConfig,
    facts: Arc<FactStore>,
    events: Arc<EventStore>,
    timers: Arc<TimerManager>,
    rules: Arc<RuleManager>,
    services: Arc<ServiceRegistry>,
    lookup_cache: Arc<LookupCache>,
    baseline: Arc<BaselineStore>,
    versioning: Arc<VersioningStore>,
    scheduler: Arc<TemporalScheduler>,
    observability: Arc<Observability>,
    action_executor: ActionExecutor,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
    /// Serializes externally-triggered processing into arrival order.
    /// Reentrant triggers (actions re-emitting events) bypass it and run
    /// inline, matching spec §4.1's "nested triggers run synchronously
    /// within the causing trigger's processing".
    queue: AsyncMutex<()>,
    running: AtomicBool,
    stats: EngineStats,
}

impl Engine {
    pub fn new(config: EngineConfig, services: ServiceRegistry, observability: Observability) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Engine>| {
            let facts = Arc::new(FactStore::new());
            let events = Arc::new(EventStore::new(config.event_store_capacity, config.event_store_max_age));
            let rules = Arc::new(RuleManager::new());
            let services = Arc::new(services);
            let timers = Arc::new(TimerManager::new(Arc::new(EngineHandle(weak.clone()))));
            let lookup_cache = Arc::new(LookupCache::new());
            let baseline = Arc::new(BaselineStore::new());
            let versioning = Arc::new(VersioningStore::new(config.audit_log_max_entries_per_rule));
            let scheduler = Arc::new(TemporalScheduler::new());
            let observability = Arc::new(observability);
            let action_executor = ActionExecutor::new(
                facts.clone(),
                timers.clone(),
                services.clone(),
                Arc::new(EngineHandle(weak.clone())),
            );

            Self {
                config,
                facts,
                events,
                timers,
                rules,
                services,
                lookup_cache,
                baseline,
                versioning,
                scheduler,
                observability,
                action_executor,
                subscribers: RwLock::new(Vec::new()),
                next_subscriber_id: AtomicU64::new(1),
                queue: AsyncMutex::new(()),
                running: AtomicBool::new(false),
                stats: EngineStats::default(),
            }
        })
    }

    pub fn with_defaults(services: ServiceRegistry) -> Arc<Self> {
        Self::new(EngineConfig::from_env(), services, Observability::tracing())
    }

    pub async fn start(&self) {
        self.running.store(true, Ordering::SeqCst);
        self.config.log_summary();
        self.scheduler.sync_rules(&self.rules);
        tracing::info!(rules = self.rules.get_all().len(), "engine started");
    }

    /// Drains the queue, stops all timers, and drops subscribers. Does not
    /// consume `self` since the engine is always shared via `Arc`.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.drain().await;
        self.timers.stop().await;
        self.subscribers.write().unwrap().clear();
        tracing::info!("engine stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn drain(&self) {
        let _permit = self.queue.lock().await;
    }

    /// Spawns the once-per-second cron ticker (SPEC_FULL.md §11). The
    /// caller keeps the returned handle alive for as long as the engine
    /// should keep firing temporal rules.
    pub fn spawn_temporal_ticker(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));
            loop {
                interval.tick().await;
                let Some(engine) = weak.upgrade() else {
                    return;
                };
                if !engine.is_running() {
                    continue;
                }
                engine.scheduler.sync_rules(&engine.rules);
                let now = Utc::now();
                for rule_id in engine.scheduler.due_rules(now) {
                    engine.scheduler.record_trigger(&rule_id, now);
                    let trigger = TriggerPayload::Temporal { rule_id, fired_at: now };
                    engine.enqueue(trigger, 0).await;
                }
            }
        })
    }

    // ---- facts ----------------------------------------------------

    pub async fn set_fact(&self, key: &str, value: Value, source: &str) {
        let previous = self.facts.set(key, value.clone(), source);
        self.observability.auditor.audit(
            AuditEventKind::FactSet,
            json!({ "key": key, "value": value }),
            Attribution { actor: Some(source.to_string()), ..Default::default() },
        );
        let trigger = TriggerPayload::Fact {
            key: key.to_string(),
            value,
            previous,
            source: source.to_string(),
        };
        self.enqueue(trigger, 0).await;
    }

    pub fn get_fact(&self, key: &str) -> Option<Value> {
        self.facts.get_value(key)
    }

    pub fn delete_fact(&self, key: &str) -> bool {
        let existed = self.facts.delete(key);
        if existed {
            self.observability.auditor.audit(
                AuditEventKind::FactDeleted,
                json!({ "key": key }),
                Attribution { actor: Some("api".into()), ..Default::default() },
            );
        }
        existed
    }

    pub fn query_facts(&self, pattern: &str) -> Vec<Fact> {
        self.facts.query(pattern)
    }

    // ---- events -----------------------------------------------------

    pub async fn emit(&self, topic: &str, data: Value) -> Event {
        self.emit_correlated(topic, data, None, None).await
    }

    pub async fn emit_correlated(
        &self,
        topic: &str,
        data: Value,
        correlation_id: Option<String>,
        causation_id: Option<String>,
    ) -> Event {
        let event = Event::new(topic, data, "external")
            .with_correlation(correlation_id)
            .with_causation(causation_id);
        self.events.append(event.clone());
        self.notify_subscribers(&event).await;
        self.enqueue(TriggerPayload::Event { event: event.clone() }, 0).await;
        event
    }

    /// Called by [`EngineHandle`] when a rule's `emit_event` action fires.
    /// Runs inline (no queue hop) at the depth the causing rule already
    /// reached, so a chain of reentrant emits is bounded by
    /// `max_forward_depth` rather than left to wind unbounded.
    async fn process_reentrant_event(&self, event: Event, depth: usize) {
        self.events.append(event.clone());
        self.notify_subscribers(&event).await;
        self.process_trigger(TriggerPayload::Event { event }, depth).await;
    }

    async fn notify_subscribers(&self, event: &Event) {
        let handlers: Vec<Arc<SubscriberHandler>> = {
            let subs = self.subscribers.read().unwrap();
            let mut exact = Vec::new();
            let mut wildcard = Vec::new();
            for sub in subs.iter() {
                if sub.pattern == event.topic {
                    exact.push(sub.handler.clone());
                } else if crate::context::topic_pattern_matches(&sub.pattern, &event.topic) {
                    wildcard.push(sub.handler.clone());
                }
            }
            exact.append(&mut wildcard);
            exact
        };
        // Subscriber handlers return a plain future rather than a Result;
        // a handler that panics is not caught here (Rust does not make
        // catching panics across an await point free), unlike the
        // swallowed-exception semantics of the originating system.
        join_all(handlers.iter().map(|handler| handler(event.clone()))).await;
    }

    pub fn subscribe<F, Fut>(&self, pattern: impl Into<String>, handler: F) -> u64
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let wrapped: Arc<SubscriberHandler> = Arc::new(move |event| Box::pin(handler(event)) as BoxFuture<'static, ()>);
        self.subscribers.write().unwrap().push(Subscriber {
            id,
            pattern: pattern.into(),
            handler: wrapped,
        });
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut subs = self.subscribers.write().unwrap();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    // ---- timers -----------------------------------------------------

    pub async fn set_timer(
        &self,
        name: &str,
        duration_literal: &str,
        on_expire: OnExpire,
        repeat: Option<RepeatPolicy>,
        correlation_id: Option<String>,
    ) -> Result<Timer> {
        let duration = parse_timer_duration(duration_literal)?;
        Ok(self.timers.set_timer(name, duration, on_expire, repeat, correlation_id).await)
    }

    pub async fn cancel_timer(&self, name: &str) -> bool {
        self.timers.cancel_timer(name).await
    }

    pub async fn get_timer(&self, name: &str) -> Option<Timer> {
        self.timers.get_timer(name).await
    }

    async fn handle_timer_fired(&self, timer: Timer) {
        self.observability.tracer.trace(
            TraceEventKind::TimerFired,
            json!({ "timerId": timer.id, "name": timer.name }),
            TraceAttribution { correlation_id: timer.correlation_id.clone(), ..Default::default() },
        );
        self.enqueue(
            TriggerPayload::Timer {
                id: timer.id.clone(),
                name: timer.name.clone(),
                data: timer.on_expire.data.clone(),
            },
            0,
        )
        .await;

        let event = Event::new(timer.on_expire.topic.clone(), timer.on_expire.data.clone(), "timer")
            .with_correlation(timer.correlation_id.clone());
        self.events.append(event.clone());
        self.notify_subscribers(&event).await;
        self.enqueue(TriggerPayload::Event { event }, 1).await;
    }

    // ---- rules --------------------------------------------------------

    pub fn register_rule(&self, input: RuleInput) -> Result<Rule> {
        let rule = self.rules.register(input.clone())?;
        self.versioning.record(&rule.id, rule.version, input, ChangeKind::Created);
        self.scheduler.sync_rules(&self.rules);
        self.observability.auditor.audit(
            AuditEventKind::RuleRegistered,
            json!({ "ruleId": rule.id }),
            Attribution { actor: Some("api".into()), rule_id: Some(rule.id.clone()), ..Default::default() },
        );
        Ok(rule)
    }

    pub fn update_rule(&self, id: &str, input: RuleInput) -> Result<Rule> {
        let rule = self.rules.update(id, input.clone())?;
        self.versioning.record(&rule.id, rule.version, input, ChangeKind::Updated);
        self.scheduler.sync_rules(&self.rules);
        self.observability.auditor.audit(
            AuditEventKind::RuleUpdated,
            json!({ "ruleId": rule.id }),
            Attribution { actor: Some("api".into()), rule_id: Some(rule.id.clone()), ..Default::default() },
        );
        Ok(rule)
    }

    pub fn unregister_rule(&self, id: &str) -> Result<Rule> {
        let rule = self.rules.unregister(id)?;
        self.versioning.record(&rule.id, rule.version + 1, rule.as_input(), ChangeKind::Deleted);
        self.scheduler.sync_rules(&self.rules);
        self.observability.auditor.audit(
            AuditEventKind::RuleDeleted,
            json!({ "ruleId": rule.id }),
            Attribution { actor: Some("api".into()), rule_id: Some(rule.id.clone()), ..Default::default() },
        );
        Ok(rule)
    }

    pub fn rollback_rule(&self, id: &str, version: u32) -> Result<Rule> {
        let snapshot = self.versioning.rollback(id, version)?;
        let rule = self.rules.update(id, snapshot.clone())?;
        self.versioning.record(&rule.id, rule.version, snapshot, ChangeKind::Updated);
        self.observability.auditor.audit(
            AuditEventKind::RuleRolledBack,
            json!({ "ruleId": rule.id, "toVersion": version }),
            Attribution { actor: Some("api".into()), rule_id: Some(rule.id.clone()), ..Default::default() },
        );
        Ok(rule)
    }

    pub fn enable_rule(&self, id: &str) -> Result<()> {
        self.rules.enable(id)
    }

    pub fn disable_rule(&self, id: &str) -> Result<()> {
        self.rules.disable(id)
    }

    pub fn get_rule(&self, id: &str) -> Option<Rule> {
        self.rules.get(id)
    }

    pub fn get_all_rules(&self) -> Vec<Rule> {
        self.rules.get_all()
    }

    pub fn register_group(&self, group: RuleGroup) -> Result<()> {
        self.rules.register_group(group)
    }

    pub fn set_group_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        self.rules.set_group_enabled(id, enabled)
    }

    pub fn rule_manager(&self) -> &RuleManager {
        &self.rules
    }

    /// Re-derive scheduler state after a hot-reload cycle applied changes
    /// directly to the rule manager, bypassing `register_rule`/
    /// `update_rule`/`unregister_rule` (and so their version-history
    /// bookkeeping — hot-reloaded rules are tracked by the watcher's own
    /// stable-hash baseline instead, see DESIGN.md).
    pub fn sync_after_reload(&self) {
        self.scheduler.sync_rules(&self.rules);
    }

    pub fn versioning(&self) -> &VersioningStore {
        &self.versioning
    }

    /// A [`QueueBarrier`] the hot-reload worker can hand to
    /// [`crate::hot_reload::HotReloadWatcher::perform_check`], backed by a
    /// live `Arc` rather than the weak handle the action/timer bridges
    /// use — the caller already holds the engine alive.
    pub fn queue_barrier(self: &Arc<Self>) -> Arc<dyn QueueBarrier> {
        self.clone()
    }

    // ---- backward chaining ---------------------------------------------

    pub fn query(&self, goal: Goal) -> BackwardChainResult {
        BackwardChainer::with_limits(
            &self.rules,
            &self.facts,
            self.config.backward_chain_max_depth,
            self.config.backward_chain_max_rules,
        )
        .query(goal)
    }

    // ---- stats ----------------------------------------------------------

    pub fn get_stats(&self) -> Stats {
        let mut rule_counts_by_kind = HashMap::new();
        for rule in self.rules.get_all() {
            *rule_counts_by_kind.entry(rule.trigger.kind_name().to_string()).or_insert(0) += 1;
        }
        Stats {
            triggers_processed: self.stats.triggers_processed.load(Ordering::Relaxed),
            rules_skipped: self.stats.rules_skipped.read().unwrap().clone(),
            rules_failed: self.stats.rules_failed.load(Ordering::Relaxed),
            forward_chaining_limit_hits: self.stats.forward_chaining_limit_hits.load(Ordering::Relaxed),
            queue_depth: self.stats.queue_depth.load(Ordering::Relaxed),
            rule_counts_by_kind,
        }
    }

    // ---- trigger processing ---------------------------------------------

    async fn enqueue(&self, trigger: TriggerPayload, depth: usize) {
        self.stats.queue_depth.fetch_add(1, Ordering::Relaxed);
        let _permit = self.queue.lock().await;
        self.process_trigger(trigger, depth).await;
        self.stats.queue_depth.fetch_sub(1, Ordering::Relaxed);
    }

    async fn process_trigger(&self, trigger: TriggerPayload, depth: usize) {
        if depth >= self.config.max_forward_depth {
            self.stats.forward_chaining_limit_hits.fetch_add(1, Ordering::Relaxed);
            self.observability.tracer.trace(
                TraceEventKind::ForwardChainingLimit,
                json!({ "depth": depth, "triggerKind": trigger.kind_name() }),
                TraceAttribution { correlation_id: trigger.correlation_id(), ..Default::default() },
            );
            return;
        }

        self.stats.triggers_processed.fetch_add(1, Ordering::Relaxed);
        let matches = self.find_matching_rules(&trigger);
        self.run_rules(matches, &trigger, depth).await;
    }

    fn find_matching_rules(&self, trigger: &TriggerPayload) -> Vec<Rule> {
        match trigger {
            TriggerPayload::Fact { key, .. } => self.rules.get_by_fact_pattern(key),
            TriggerPayload::Event { event } => self.rules.get_by_event_topic(&event.topic),
            TriggerPayload::Timer { name, .. } => self.rules.get_by_timer_name(name),
            TriggerPayload::Temporal { rule_id, .. } => self.rules.get(rule_id).into_iter().collect(),
        }
    }

    /// Evaluates `rules` in priority-descending chunks of
    /// `max_concurrency`, so no single trigger can monopolize every worker
    /// thread (spec §4.2).
    async fn run_rules(&self, rules: Vec<Rule>, trigger: &TriggerPayload, depth: usize) {
        let chunk_size = self.config.max_concurrency.max(1);
        for chunk in rules.chunks(chunk_size) {
            join_all(chunk.iter().map(|rule| self.evaluate_and_run_rule(rule, trigger, depth))).await;
        }
    }

    async fn evaluate_and_run_rule(&self, rule: &Rule, trigger: &TriggerPayload, depth: usize) {
        let start = Instant::now();
        let mut ctx = EvalContext::new(trigger);
        ctx.depth = depth;

        self.observability.tracer.trace(
            TraceEventKind::RuleEvaluationStarted,
            json!({}),
            TraceAttribution {
                rule_id: Some(rule.id.clone()),
                rule_name: Some(rule.name.clone()),
                correlation_id: trigger.correlation_id(),
                ..Default::default()
            },
        );

        if let Some(lookups) = &rule.lookups {
            let root = ctx.root();
            match resolve_lookups(lookups, &root, &self.services, &self.lookup_cache, self.config.lookup_default_ttl).await {
                LookupResolution::Resolved(resolved) => ctx.lookups = resolved,
                LookupResolution::Skip { lookup, reason } => {
                    self.record_rule_skipped(rule, "lookup_failed", json!({ "lookup": lookup, "reason": reason }));
                    return;
                }
                LookupResolution::Failed { lookup, reason } => {
                    self.record_rule_failed(rule, format!("lookup {lookup} failed: {reason}"));
                    return;
                }
            }
        }

        let passed = evaluate_all(&rule.conditions, &ctx, &self.facts, Some(&self.baseline), &mut ());
        if !passed {
            self.record_rule_skipped(rule, "conditions_not_met", Value::Null);
            return;
        }

        self.observability.tracer.trace(
            TraceEventKind::RuleMatched,
            json!({}),
            TraceAttribution {
                rule_id: Some(rule.id.clone()),
                rule_name: Some(rule.name.clone()),
                correlation_id: trigger.correlation_id(),
                duration_ms: Some(start.elapsed().as_millis() as u64),
                ..Default::default()
            },
        );

        if let Err(error) = self.action_executor.execute(&rule.actions, &mut ctx, &mut ()).await {
            self.record_rule_failed(rule, error.message);
        }
    }

    fn record_rule_skipped(&self, rule: &Rule, reason: &str, details: Value) {
        *self.stats.rules_skipped.write().unwrap().entry(reason.to_string()).or_insert(0) += 1;
        self.observability.tracer.trace(
            TraceEventKind::RuleSkipped,
            json!({ "reason": reason, "details": details }),
            TraceAttribution { rule_id: Some(rule.id.clone()), rule_name: Some(rule.name.clone()), ..Default::default() },
        );
    }

    fn record_rule_failed(&self, rule: &Rule, message: String) {
        self.stats.rules_failed.fetch_add(1, Ordering::Relaxed);
        self.observability.auditor.audit(
            AuditEventKind::RuleFailed,
            json!({ "message": message }),
            Attribution { actor: Some("engine".into()), rule_id: Some(rule.id.clone()), ..Default::default() },
        );
    }
}

#[async_trait]
impl QueueBarrier for Engine {
    async fn wait_drained(&self) {
        self.drain().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Action, Condition, ConditionSource, Operator, Trigger};
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Mutex as TokioMutex;
    use tokio::time::{timeout, Duration};

    fn test_engine() -> Arc<Engine> {
        let mut config = EngineConfig::default();
        config.max_forward_depth = 5;
        Engine::new(config, ServiceRegistry::new(), Observability::default())
    }

    fn rule_input(id: &str, trigger: Trigger, actions: Vec<Action>) -> RuleInput {
        RuleInput {
            id: id.into(),
            name: id.into(),
            description: None,
            priority: 0,
            enabled: true,
            tags: vec![],
            group: None,
            trigger,
            conditions: vec![],
            actions,
            lookups: None,
        }
    }

    #[tokio::test]
    async fn set_fact_triggers_matching_rule_action() {
        let engine = test_engine();
        engine
            .register_rule(rule_input(
                "r1",
                Trigger::Fact { pattern: "door:*".into() },
                vec![Action::SetFact { key: json!("door_rule_ran"), value: json!(true) }],
            ))
            .unwrap();

        engine.set_fact("door:front", json!("open"), "sensor").await;
        assert_eq!(engine.get_fact("door_rule_ran"), Some(json!(true)));
    }

    #[tokio::test]
    async fn disabled_rule_does_not_run() {
        let engine = test_engine();
        let rule = engine
            .register_rule(rule_input(
                "r1",
                Trigger::Event { topic: "ping".into() },
                vec![Action::SetFact { key: json!("ran"), value: json!(true) }],
            ))
            .unwrap();
        engine.disable_rule(&rule.id).unwrap();

        engine.emit("ping", json!({})).await;
        assert_eq!(engine.get_fact("ran"), None);
    }

    #[tokio::test]
    async fn emit_event_action_cascades_and_stops_at_forward_depth_limit() {
        let engine = test_engine();
        engine
            .register_rule(rule_input(
                "cascade",
                Trigger::Event { topic: "ping".into() },
                vec![Action::EmitEvent { topic: json!("ping"), data: json!({}), correlation_id: None }],
            ))
            .unwrap();

        engine.emit("ping", json!({})).await;
        let stats = engine.get_stats();
        assert_eq!(stats.forward_chaining_limit_hits, 1);
    }

    #[tokio::test]
    async fn condition_failure_skips_without_running_actions() {
        let engine = test_engine();
        engine
            .register_rule(rule_input(
                "guarded",
                Trigger::Event { topic: "t".into() },
                vec![Action::SetFact { key: json!("should_not_run"), value: json!(true) }],
            ))
            .unwrap();
        let mut input = engine.get_rule("guarded").unwrap().as_input();
        input.conditions = vec![Condition {
            source: ConditionSource::Event { field: "data.flag".into() },
            operator: Operator::Eq,
            value: json!(true),
        }];
        engine.update_rule("guarded", input).unwrap();

        engine.emit("t", json!({ "flag": false })).await;
        assert_eq!(engine.get_fact("should_not_run"), None);
        assert_eq!(engine.get_stats().rules_skipped.get("conditions_not_met"), Some(&1));
    }

    #[tokio::test]
    async fn subscriber_observes_emitted_event() {
        let engine = test_engine();
        let seen = Arc::new(TokioMutex::new(Vec::new()));
        let seen_clone = seen.clone();
        engine.subscribe("orders.*", move |event| {
            let seen = seen_clone.clone();
            async move {
                seen.lock().await.push(event.topic);
            }
        });

        engine.emit("orders.created", json!({})).await;
        assert_eq!(seen.lock().await.as_slice(), ["orders.created"]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_future_notifications() {
        let engine = test_engine();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();
        let id = engine.subscribe("t", move |_event| {
            let count = count_clone.clone();
            async move {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
        engine.emit("t", json!({})).await;
        assert!(engine.unsubscribe(id));
        engine.emit("t", json!({})).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timer_expiration_cascades_to_configured_event() {
        let engine = test_engine();
        engine
            .register_rule(rule_input(
                "on_expire",
                Trigger::Event { topic: "timeout".into() },
                vec![Action::SetFact { key: json!("timed_out"), value: json!(true) }],
            ))
            .unwrap();

        engine
            .set_timer(
                "watchdog",
                "10ms",
                OnExpire { topic: "timeout".into(), data: json!({}) },
                None,
                None,
            )
            .await
            .unwrap();

        let deadline = Duration::from_secs(2);
        let result = timeout(deadline, async {
            loop {
                if engine.get_fact("timed_out").is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        assert!(result.is_ok(), "timer-driven rule never ran");
    }
}
