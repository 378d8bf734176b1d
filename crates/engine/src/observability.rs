//! Structured observability hooks (spec §6, "the engine emits structured
//! events into them through stable hooks"): `Tracer`, `Auditor`, and
//! `MetricsSink` traits that every subsystem calls into. A no-op default
//! lets the engine run with nothing attached; a `tracing`-backed adapter
//! forwards the same events into the process's log output.
//!
//! `TraceEvent` and `AuditEvent` are closed enums rather than bare strings
//! so a new event kind is a compile error at every call site, not a typo
//! waiting to happen — the same reasoning as the teacher's
//! `ExecutionPhase` in `audit_log.rs`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Extra attribution carried alongside a trace event, per spec §6's
/// `trace(type, details, {ruleId?, ruleName?, correlationId?, causationId?,
/// durationMs?})`.
#[derive(Debug, Clone, Default)]
pub struct TraceAttribution {
    pub rule_id: Option<String>,
    pub rule_name: Option<String>,
    pub correlation_id: Option<String>,
    pub causation_id: Option<String>,
    pub duration_ms: Option<u64>,
}

/// Who/what performed an audited action. Distinct from `TraceAttribution`
/// since audit entries are about accountability, not timing.
#[derive(Debug, Clone, Default)]
pub struct Attribution {
    pub actor: Option<String>,
    pub rule_id: Option<String>,
    pub correlation_id: Option<String>,
}

/// Closed vocabulary of trace event kinds, gathered from every place
/// spec.md names one explicitly (§4, §7, §8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceEventKind {
    /// Rule matched a trigger and began evaluation.
    RuleEvaluationStarted,
    /// A single condition finished evaluating (invariant 3, spec §8).
    ConditionEvaluated,
    /// A rule's condition chain passed; actions are about to run.
    RuleMatched,
    /// A rule was skipped without executing its actions, with a reason
    /// (`lookup_failed`, `conditions_not_met`).
    RuleSkipped,
    /// An action started, completed, or failed (spec §4.4 hooks).
    ActionStarted,
    ActionCompleted,
    ActionFailed,
    /// Forward-chaining depth exceeded on a branch (spec §7/§8 scenario 5).
    ForwardChainingLimit,
    /// A timer fired and its `onExpire` rule/event was dispatched.
    TimerFired,
    /// Hot-reload cycle lifecycle (spec §4.7).
    HotReloadStarted,
    HotReloadCompleted,
    HotReloadFailed,
}

/// Closed vocabulary of audit event kinds — accountability-facing,
/// distinct from the higher-volume trace stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventKind {
    RuleRegistered,
    RuleUpdated,
    RuleDeleted,
    RuleRolledBack,
    /// A rule's action sequence raised an error that no `try_catch`
    /// caught; the rule is skipped and sibling rules continue (spec §7).
    RuleFailed,
    FactSet,
    FactDeleted,
}

/// One kind of numeric instrument (spec §6: "metrics(counter/histogram/
/// gauge, name, labels, value)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Histogram,
    Gauge,
}

/// Records trace events. Implementors must not block the calling
/// subsystem for long — the orchestrator calls this inline on the hot
/// path (condition evaluation, action dispatch).
pub trait Tracer: Send + Sync {
    fn trace(&self, kind: TraceEventKind, details: Value, attribution: TraceAttribution);
}

/// Records audit events — accountability trail for mutations and
/// failures, independent of the tracer's higher-volume stream.
pub trait Auditor: Send + Sync {
    fn audit(&self, kind: AuditEventKind, details: Value, attribution: Attribution);
}

/// Records numeric instruments. `labels` follows the same key-value
/// convention as `tracing`'s structured fields.
pub trait MetricsSink: Send + Sync {
    fn record(&self, kind: MetricKind, name: &str, labels: &HashMap<String, String>, value: f64);
}

/// No-op implementations so the engine runs with nothing attached.
impl Tracer for () {
    fn trace(&self, _kind: TraceEventKind, _details: Value, _attribution: TraceAttribution) {}
}

impl Auditor for () {
    fn audit(&self, _kind: AuditEventKind, _details: Value, _attribution: Attribution) {}
}

impl MetricsSink for () {
    fn record(&self, _kind: MetricKind, _name: &str, _labels: &HashMap<String, String>, _value: f64) {}
}

/// Forwards every hook into the process's `tracing` output, exactly as
/// the teacher's `AuditLog`/`ExecutionPhase` pair records structured
/// fields rather than string-interpolated messages.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObservability;

impl Tracer for TracingObservability {
    fn trace(&self, kind: TraceEventKind, details: Value, attribution: TraceAttribution) {
        tracing::debug!(
            kind = ?kind,
            details = %details,
            rule_id = attribution.rule_id.as_deref().unwrap_or(""),
            rule_name = attribution.rule_name.as_deref().unwrap_or(""),
            correlation_id = attribution.correlation_id.as_deref().unwrap_or(""),
            causation_id = attribution.causation_id.as_deref().unwrap_or(""),
            duration_ms = attribution.duration_ms.unwrap_or_default(),
            "trace event"
        );
    }
}

impl Auditor for TracingObservability {
    fn audit(&self, kind: AuditEventKind, details: Value, attribution: Attribution) {
        tracing::info!(
            kind = ?kind,
            details = %details,
            actor = attribution.actor.as_deref().unwrap_or(""),
            rule_id = attribution.rule_id.as_deref().unwrap_or(""),
            correlation_id = attribution.correlation_id.as_deref().unwrap_or(""),
            "audit event"
        );
    }
}

impl MetricsSink for TracingObservability {
    fn record(&self, kind: MetricKind, name: &str, labels: &HashMap<String, String>, value: f64) {
        tracing::debug!(kind = ?kind, name, labels = ?labels, value, "metric");
    }
}

/// Bundles the three hooks the orchestrator and its subsystems are
/// actually handed, so `Engine::start` wires one object instead of three.
pub struct Observability {
    pub tracer: Box<dyn Tracer>,
    pub auditor: Box<dyn Auditor>,
    pub metrics: Box<dyn MetricsSink>,
}

impl Default for Observability {
    fn default() -> Self {
        Self {
            tracer: Box::new(()),
            auditor: Box::new(()),
            metrics: Box::new(()),
        }
    }
}

impl Observability {
    pub fn tracing() -> Self {
        Self {
            tracer: Box::new(TracingObservability),
            auditor: Box::new(TracingObservability),
            metrics: Box::new(TracingObservability),
        }
    }
}
