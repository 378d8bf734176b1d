//! Executes a rule's ordered action list, including composed actions
//! `conditional`, `for_each`, and `try_catch` (spec §4.4).

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use chainforge_services::ServiceRegistry;

use crate::condition_evaluator::evaluate_all;
use crate::context::{resolve_value, EvalContext};
use crate::fact_store::FactStore;
use crate::schema::{Action, Event};
use crate::timer_manager::{parse_timer_duration, TimerManager};

/// A failure raised while executing one atomic action. Carries enough
/// detail to be bound as the `catch.as` variable inside a `try_catch`.
#[derive(Debug, Clone)]
pub struct ActionError {
    pub action: String,
    pub message: String,
}

impl ActionError {
    fn new(action: &str, message: impl Into<String>) -> Self {
        Self {
            action: action.to_string(),
            message: message.into(),
        }
    }

    pub fn as_value(&self) -> Value {
        serde_json::json!({ "action": self.action, "message": self.message })
    }
}

/// Re-enters the orchestrator for an `emit_event` action. Implemented by
/// the engine so reentrant emissions flow through depth-checked, inline
/// trigger processing rather than the external ordered queue.
#[async_trait]
pub trait ActionHost: Send + Sync {
    async fn emit_reentrant(&self, event: Event, depth: usize);
}

/// Observes each atomic action as it starts, completes, or fails.
/// Composed actions (`conditional`, `for_each`, `try_catch`) fire around
/// themselves as well as their children, per spec §4.4.
pub trait ActionObserver {
    fn on_action_started(&mut self, action: &Action) {
        let _ = action;
    }
    fn on_action_completed(&mut self, action: &Action) {
        let _ = action;
    }
    fn on_action_failed(&mut self, action: &Action, error: &ActionError) {
        let _ = (action, error);
    }
}

impl ActionObserver for () {}

pub struct ActionExecutor {
    facts: Arc<FactStore>,
    timers: Arc<TimerManager>,
    services: Arc<ServiceRegistry>,
    host: Arc<dyn ActionHost>,
}

impl ActionExecutor {
    pub fn new(
        facts: Arc<FactStore>,
        timers: Arc<TimerManager>,
        services: Arc<ServiceRegistry>,
        host: Arc<dyn ActionHost>,
    ) -> Self {
        Self {
            facts,
            timers,
            services,
            host,
        }
    }

    /// Execute `actions` sequentially. A failed atomic action does not
    /// abort subsequent actions unless it escapes a `try_catch` — at this
    /// top level a failure simply stops the sequence and is reported to
    /// the caller as `rule_failed`.
    pub async fn execute(
        &self,
        actions: &[Action],
        ctx: &mut EvalContext<'_>,
        observer: &mut impl ActionObserver,
    ) -> Result<(), ActionError> {
        for action in actions {
            self.execute_one(action, ctx, observer).await?;
        }
        Ok(())
    }

    async fn execute_one(
        &self,
        action: &Action,
        ctx: &mut EvalContext<'_>,
        observer: &mut impl ActionObserver,
    ) -> Result<(), ActionError> {
        observer.on_action_started(action);
        let result = self.dispatch(action, ctx, observer).await;
        match &result {
            Ok(()) => observer.on_action_completed(action),
            Err(e) => observer.on_action_failed(action, e),
        }
        result
    }

    fn dispatch<'a>(
        &'a self,
        action: &'a Action,
        ctx: &'a mut EvalContext<'_>,
        observer: &'a mut impl ActionObserver,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), ActionError>> + Send + 'a>> {
        Box::pin(async move {
            let root = ctx.root();
            match action {
                Action::SetFact { key, value } => {
                    let key = expect_string(resolve_value(key, &root), "set_fact.key")?;
                    let value = resolve_value(value, &root);
                    self.facts.set(&key, value, "action");
                    Ok(())
                }
                Action::DeleteFact { key } => {
                    let key = expect_string(resolve_value(key, &root), "delete_fact.key")?;
                    self.facts.delete(&key);
                    Ok(())
                }
                Action::EmitEvent {
                    topic,
                    data,
                    correlation_id,
                } => {
                    let topic = expect_string(resolve_value(topic, &root), "emit_event.topic")?;
                    let data = resolve_value(data, &root);
                    let correlation_id = correlation_id
                        .as_ref()
                        .map(|c| resolve_value(c, &root))
                        .and_then(|v| v.as_str().map(str::to_string))
                        .or_else(|| ctx.trigger.correlation_id());
                    let event = Event::new(topic, data, "action").with_correlation(correlation_id);
                    self.host.emit_reentrant(event, ctx.depth + 1).await;
                    Ok(())
                }
                Action::SetTimer {
                    name,
                    duration,
                    on_expire,
                    repeat,
                } => {
                    let name = expect_string(resolve_value(name, &root), "set_timer.name")?;
                    let duration_literal =
                        expect_string(resolve_value(duration, &root), "set_timer.duration")?;
                    let duration = parse_timer_duration(&duration_literal)
                        .map_err(|e| ActionError::new("set_timer", e.to_string()))?;
                    let on_expire = crate::schema::OnExpire {
                        topic: expect_string(resolve_value(&on_expire.topic, &root), "set_timer.on_expire.topic")?,
                        data: resolve_value(&on_expire.data, &root),
                    };
                    let repeat = match repeat {
                        Some(r) => {
                            let interval_literal =
                                expect_string(resolve_value(&r.interval, &root), "set_timer.repeat.interval")?;
                            let interval = parse_timer_duration(&interval_literal)
                                .map_err(|e| ActionError::new("set_timer", e.to_string()))?;
                            Some(crate::schema::RepeatPolicy {
                                interval,
                                max_count: r.max_count,
                            })
                        }
                        None => None,
                    };
                    self.timers
                        .set_timer(&name, duration, on_expire, repeat, ctx.trigger.correlation_id())
                        .await;
                    Ok(())
                }
                Action::CancelTimer { name } => {
                    let name = expect_string(resolve_value(name, &root), "cancel_timer.name")?;
                    self.timers.cancel_timer(&name).await;
                    Ok(())
                }
                Action::CallService { service, method, args } => {
                    let args: Vec<Value> = args.iter().map(|a| resolve_value(a, &root)).collect();
                    self.services
                        .call(service, method, &args)
                        .await
                        .map(|_| ())
                        .map_err(|e| ActionError::new("call_service", e.to_string()))
                }
                Action::Log { message } => {
                    let message = resolve_value(message, &root);
                    tracing::info!(message = %message, "rule log action");
                    Ok(())
                }
                Action::Conditional { conditions, then, r#else } => {
                    let passed = evaluate_all(conditions, ctx, &self.facts, None, &mut ());
                    let branch = if passed { then } else { r#else };
                    for inner in branch {
                        self.execute_one(inner, ctx, observer).await?;
                    }
                    Ok(())
                }
                Action::ForEach {
                    collection,
                    r#as,
                    actions,
                    max_iterations,
                } => {
                    let collection = resolve_value(collection, &root);
                    let items: Vec<Value> = collection.as_array().cloned().unwrap_or_default();
                    let limit = max_iterations.unwrap_or(usize::MAX).min(items.len());
                    for (index, item) in items.into_iter().take(limit).enumerate() {
                        ctx.variables.insert(r#as.clone(), item);
                        ctx.variables
                            .insert(format!("{as}_index", as = r#as), Value::from(index));
                        for inner in actions {
                            self.execute_one(inner, ctx, observer).await?;
                        }
                    }
                    Ok(())
                }
                Action::TryCatch { r#try, catch, finally } => {
                    let mut try_result = Ok(());
                    for inner in r#try {
                        if let Err(e) = self.execute_one(inner, ctx, observer).await {
                            try_result = Err(e);
                            break;
                        }
                    }

                    let mut outcome = Ok(());
                    if let Err(error) = try_result {
                        if let Some(var_name) = &catch.r#as {
                            ctx.variables.insert(var_name.clone(), error.as_value());
                        }
                        for inner in &catch.actions {
                            if let Err(e) = self.execute_one(inner, ctx, observer).await {
                                outcome = Err(e);
                                break;
                            }
                        }
                    }

                    for inner in finally {
                        // `finally` runs regardless of outcome; a failure
                        // inside it takes precedence, matching the spec's
                        // "finally still runs" / escapes-propagate rule.
                        if let Err(e) = self.execute_one(inner, ctx, observer).await {
                            outcome = Err(e);
                        }
                    }

                    outcome
                }
            }
        })
    }
}

fn expect_string(value: Value, field: &str) -> Result<String, ActionError> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(ActionError::new(field, format!("expected string, got {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TriggerPayload;
    use chainforge_services::LogService;
    use serde_json::json;

    struct NoopHost;

    #[async_trait]
    impl ActionHost for NoopHost {
        async fn emit_reentrant(&self, _event: Event, _depth: usize) {}
    }

    fn executor() -> ActionExecutor {
        let facts = Arc::new(FactStore::new());
        let (tx, _rx) = tokio::sync::oneshot::channel::<()>();
        drop(tx);
        struct Sink;
        #[async_trait]
        impl crate::timer_manager::TimerSink for Sink {
            async fn on_timer_fired(&self, _timer: crate::schema::Timer) {}
        }
        let timers = Arc::new(TimerManager::new(Arc::new(Sink)));
        let mut registry = ServiceRegistry::new();
        registry.register(Arc::new(LogService::new()));
        ActionExecutor::new(facts, timers, Arc::new(registry), Arc::new(NoopHost))
    }

    #[tokio::test]
    async fn set_fact_then_delete_fact() {
        let exec = executor();
        let trigger = TriggerPayload::Event {
            event: crate::schema::Event::new("t", json!({}), "test"),
        };
        let mut ctx = EvalContext::new(&trigger);
        let actions = vec![
            Action::SetFact { key: json!("k"), value: json!(1) },
            Action::DeleteFact { key: json!("k") },
        ];
        exec.execute(&actions, &mut ctx, &mut ()).await.unwrap();
        assert_eq!(exec.facts.get_value("k"), None);
    }

    #[tokio::test]
    async fn for_each_binds_item_and_index() {
        let exec = executor();
        let trigger = TriggerPayload::Event {
            event: crate::schema::Event::new("t", json!({"items": [{"id": "1", "name": "A"}, {"id": "2", "name": "B"}]}), "test"),
        };
        let mut ctx = EvalContext::new(&trigger);
        let actions = vec![Action::ForEach {
            collection: json!({"ref": "event.items"}),
            r#as: "item".into(),
            actions: vec![Action::SetFact {
                key: Value::String("item:${var.item.id}:name".into()),
                value: Value::String("${var.item.name}".into()),
            }],
            max_iterations: None,
        }];
        exec.execute(&actions, &mut ctx, &mut ()).await.unwrap();
        assert_eq!(exec.facts.get_value("item:1:name"), Some(json!("A")));
        assert_eq!(exec.facts.get_value("item:2:name"), Some(json!("B")));
    }

    #[tokio::test]
    async fn empty_for_each_collection_runs_zero_iterations() {
        let exec = executor();
        let trigger = TriggerPayload::Event {
            event: crate::schema::Event::new("t", json!({}), "test"),
        };
        let mut ctx = EvalContext::new(&trigger);
        let actions = vec![
            Action::ForEach {
                collection: json!([]),
                r#as: "x".into(),
                actions: vec![Action::SetFact { key: json!("should_not_exist"), value: json!(true) }],
                max_iterations: None,
            },
            Action::SetFact { key: json!("sibling_ran"), value: json!(true) },
        ];
        exec.execute(&actions, &mut ctx, &mut ()).await.unwrap();
        assert_eq!(exec.facts.get_value("should_not_exist"), None);
        assert_eq!(exec.facts.get_value("sibling_ran"), Some(json!(true)));
    }

    #[tokio::test]
    async fn try_catch_runs_catch_on_failure_and_always_runs_finally() {
        let exec = executor();
        let trigger = TriggerPayload::Event {
            event: crate::schema::Event::new("t", json!({}), "test"),
        };
        let mut ctx = EvalContext::new(&trigger);
        let actions = vec![Action::TryCatch {
            r#try: vec![Action::CallService {
                service: "missing".into(),
                method: "m".into(),
                args: vec![],
            }],
            catch: crate::schema::CatchSpec {
                r#as: Some("err".into()),
                actions: vec![Action::SetFact { key: json!("caught"), value: json!(true) }],
            },
            finally: vec![Action::SetFact { key: json!("finally_ran"), value: json!(true) }],
        }];
        exec.execute(&actions, &mut ctx, &mut ()).await.unwrap();
        assert_eq!(exec.facts.get_value("caught"), Some(json!(true)));
        assert_eq!(exec.facts.get_value("finally_ran"), Some(json!(true)));
    }
}
