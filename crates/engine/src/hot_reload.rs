//! Periodic poll-and-diff reconciliation of rule sets from external
//! sources, under validate-then-atomic-apply semantics (spec §4.7).
//!
//! Unlike a filesystem-event watcher, this performs a scheduled
//! `performCheck()` sweep: load the full rule set, hash each rule's
//! top-level fields, diff against the baseline, and apply additions,
//! removals, and modifications in one step.

use std::collections::HashMap;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use chainforge_core::error::ValidationIssue;

use crate::rule_manager::RuleManager;
use crate::schema::RuleInput;

/// Waits for the orchestrator's processing queue to drain before rules
/// are swapped, so no rule is mutated mid-evaluation. The engine supplies
/// the real implementation; `()` is a no-op for standalone use and tests.
#[async_trait]
pub trait QueueBarrier: Send + Sync {
    async fn wait_drained(&self);
}

#[async_trait]
impl QueueBarrier for () {
    async fn wait_drained(&self) {}
}

/// Observes the three structured events a reload cycle may emit.
pub trait HotReloadObserver {
    fn on_started(&mut self, sources: usize) {
        let _ = sources;
    }
    fn on_completed(&mut self, added: usize, removed: usize, modified: usize, duration: Duration) {
        let _ = (added, removed, modified, duration);
    }
    fn on_failed(&mut self, reason: &str) {
        let _ = reason;
    }
}

impl HotReloadObserver for () {}

/// Outcome of one `performCheck()` cycle.
#[derive(Debug)]
pub enum HotReloadOutcome {
    Applied {
        added: Vec<String>,
        removed: Vec<String>,
        modified: Vec<String>,
        duration: Duration,
    },
    ValidationFailed {
        issues: Vec<ValidationIssue>,
    },
    SourceError {
        reason: String,
    },
}

/// A place rule definitions can be loaded from. The engine is constructed
/// with one or more of these; a directory source is the common case.
#[async_trait]
pub trait RuleSource: Send + Sync {
    async fn load_rules(&self) -> Result<Vec<RuleInput>, String>;
}

/// Scans a directory (optionally recursively) for `*.yml`/`*.yaml` files.
/// Each file may hold a single rule record or a YAML sequence of them.
pub struct DirectorySource {
    pub path: PathBuf,
    pub recursive: bool,
}

impl DirectorySource {
    pub fn new(path: impl Into<PathBuf>, recursive: bool) -> Self {
        Self {
            path: path.into(),
            recursive,
        }
    }

    fn collect_files(dir: &Path, recursive: bool, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                if recursive {
                    Self::collect_files(&path, recursive, out)?;
                }
                continue;
            }
            let is_yaml = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e == "yml" || e == "yaml")
                .unwrap_or(false);
            let is_dotfile = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.'))
                .unwrap_or(false);
            if is_yaml && !is_dotfile {
                out.push(path);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RuleSource for DirectorySource {
    async fn load_rules(&self) -> Result<Vec<RuleInput>, String> {
        let mut files = Vec::new();
        Self::collect_files(&self.path, self.recursive, &mut files).map_err(|e| e.to_string())?;

        let mut rules = Vec::new();
        for file in files {
            let contents = match fs::read_to_string(&file) {
                Ok(c) => c,
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "failed to read rule file during hot-reload");
                    continue;
                }
            };

            let parsed = serde_yaml::from_str::<Vec<RuleInput>>(&contents)
                .or_else(|_| serde_yaml::from_str::<RuleInput>(&contents).map(|r| vec![r]));

            match parsed {
                Ok(batch) => rules.extend(batch),
                Err(e) => {
                    warn!(path = %file.display(), error = %e, "failed to parse rule file during hot-reload, keeping previous version");
                }
            }
        }
        Ok(rules)
    }
}

/// Canonicalizes only the top-level fields of a rule input, matching the
/// source implementation's behavior (see DESIGN.md): `conditions` and
/// `actions` are not hashed, so a change nested purely inside them is
/// invisible to the diff unless a top-level field changes alongside it.
fn stable_hash(input: &RuleInput) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    input.id.hash(&mut hasher);
    input.name.hash(&mut hasher);
    input.description.hash(&mut hasher);
    input.priority.hash(&mut hasher);
    input.enabled.hash(&mut hasher);
    input.tags.hash(&mut hasher);
    input.group.hash(&mut hasher);
    serde_json::to_string(&input.trigger).unwrap_or_default().hash(&mut hasher);
    hasher.finish()
}

pub struct HotReloadWatcher {
    sources: Vec<Box<dyn RuleSource>>,
    pub interval: Duration,
    pub validate_before_apply: bool,
    pub atomic: bool,
    baseline: RwLock<HashMap<String, u64>>,
    reload_count: AtomicU64,
    failure_count: AtomicU64,
}

impl HotReloadWatcher {
    pub fn new(sources: Vec<Box<dyn RuleSource>>, interval: Duration, validate_before_apply: bool, atomic: bool) -> Self {
        Self {
            sources,
            interval,
            validate_before_apply,
            atomic,
            baseline: RwLock::new(HashMap::new()),
            reload_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
        }
    }

    pub fn reload_count(&self) -> u64 {
        self.reload_count.load(Ordering::SeqCst)
    }

    pub fn failure_count(&self) -> u64 {
        self.failure_count.load(Ordering::SeqCst)
    }

    /// Run one reconciliation cycle: load, diff, validate, apply.
    pub async fn perform_check(
        &self,
        rules: &RuleManager,
        barrier: &dyn QueueBarrier,
        observer: &mut impl HotReloadObserver,
    ) -> HotReloadOutcome {
        let start = Instant::now();
        observer.on_started(self.sources.len());

        let mut loaded = Vec::new();
        for source in &self.sources {
            match source.load_rules().await {
                Ok(batch) => loaded.extend(batch),
                Err(reason) => {
                    self.failure_count.fetch_add(1, Ordering::SeqCst);
                    observer.on_failed(&reason);
                    return HotReloadOutcome::SourceError { reason };
                }
            }
        }

        if self.validate_before_apply && self.atomic {
            let mut all_issues = Vec::new();
            for input in &loaded {
                all_issues.extend(rules.validate_input(input));
            }
            if all_issues
                .iter()
                .any(|i| i.severity == chainforge_core::error::Severity::Error)
            {
                self.failure_count.fetch_add(1, Ordering::SeqCst);
                observer.on_failed("validation_failed");
                return HotReloadOutcome::ValidationFailed { issues: all_issues };
            }
        }

        let mut new_hashes: HashMap<String, u64> = HashMap::new();
        let mut by_id: HashMap<String, RuleInput> = HashMap::new();
        for input in loaded {
            new_hashes.insert(input.id.clone(), stable_hash(&input));
            by_id.insert(input.id.clone(), input);
        }

        let baseline = self.baseline.read().unwrap().clone();
        let added: Vec<String> = new_hashes
            .keys()
            .filter(|id| !baseline.contains_key(*id))
            .cloned()
            .collect();
        let removed: Vec<String> = baseline
            .keys()
            .filter(|id| !new_hashes.contains_key(*id))
            .cloned()
            .collect();
        let modified: Vec<String> = new_hashes
            .iter()
            .filter(|(id, hash)| baseline.get(*id).map(|b| b != *hash).unwrap_or(false))
            .map(|(id, _)| id.clone())
            .collect();

        barrier.wait_drained().await;

        let mut applied_hashes = self.baseline.write().unwrap();
        for id in &removed {
            if rules.unregister(id).is_ok() {
                applied_hashes.remove(id);
            }
        }
        for id in &modified {
            if let Some(input) = by_id.get(id) {
                if rules.update(id, input.clone()).is_ok() {
                    applied_hashes.insert(id.clone(), new_hashes[id]);
                }
            }
        }
        for id in &added {
            if let Some(input) = by_id.get(id) {
                if rules.register(input.clone()).is_ok() {
                    applied_hashes.insert(id.clone(), new_hashes[id]);
                }
            }
        }
        drop(applied_hashes);

        self.reload_count.fetch_add(1, Ordering::SeqCst);
        let duration = start.elapsed();
        observer.on_completed(added.len(), removed.len(), modified.len(), duration);

        HotReloadOutcome::Applied {
            added,
            removed,
            modified,
            duration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Action, Trigger};
    use serde_json::json;
    use tempfile::TempDir;

    fn write_rule(dir: &Path, id: &str, topic: &str) {
        let yaml = format!(
            "id: {id}\nname: {id}\npriority: 0\nenabled: true\ntrigger:\n  kind: event\n  topic: {topic}\nactions:\n  - type: log\n    message: hi\n"
        );
        fs::write(dir.join(format!("{id}.yml")), yaml).unwrap();
    }

    #[tokio::test]
    async fn first_cycle_adds_all_discovered_rules() {
        let dir = TempDir::new().unwrap();
        write_rule(dir.path(), "r1", "order.created");
        let watcher = HotReloadWatcher::new(
            vec![Box::new(DirectorySource::new(dir.path(), false))],
            Duration::from_secs(30),
            true,
            true,
        );
        let rules = RuleManager::new();
        let outcome = watcher.perform_check(&rules, &(), &mut ()).await;
        match outcome {
            HotReloadOutcome::Applied { added, removed, modified, .. } => {
                assert_eq!(added, vec!["r1".to_string()]);
                assert!(removed.is_empty());
                assert!(modified.is_empty());
            }
            other => panic!("expected Applied, got {other:?}"),
        }
        assert!(rules.get("r1").is_some());
    }

    #[tokio::test]
    async fn deleting_file_removes_rule_on_next_cycle() {
        let dir = TempDir::new().unwrap();
        write_rule(dir.path(), "r1", "order.created");
        let watcher = HotReloadWatcher::new(
            vec![Box::new(DirectorySource::new(dir.path(), false))],
            Duration::from_secs(30),
            true,
            true,
        );
        let rules = RuleManager::new();
        watcher.perform_check(&rules, &(), &mut ()).await;
        fs::remove_file(dir.path().join("r1.yml")).unwrap();
        let outcome = watcher.perform_check(&rules, &(), &mut ()).await;
        match outcome {
            HotReloadOutcome::Applied { removed, .. } => assert_eq!(removed, vec!["r1".to_string()]),
            other => panic!("expected Applied, got {other:?}"),
        }
        assert!(rules.get("r1").is_none());
    }

    #[tokio::test]
    async fn top_level_field_change_is_detected_as_modified() {
        let dir = TempDir::new().unwrap();
        write_rule(dir.path(), "r1", "order.created");
        let watcher = HotReloadWatcher::new(
            vec![Box::new(DirectorySource::new(dir.path(), false))],
            Duration::from_secs(30),
            true,
            true,
        );
        let rules = RuleManager::new();
        watcher.perform_check(&rules, &(), &mut ()).await;
        write_rule(dir.path(), "r1", "order.updated");
        let outcome = watcher.perform_check(&rules, &(), &mut ()).await;
        match outcome {
            HotReloadOutcome::Applied { modified, .. } => assert_eq!(modified, vec!["r1".to_string()]),
            other => panic!("expected Applied, got {other:?}"),
        }
        assert_eq!(rules.get("r1").unwrap().trigger, Trigger::Event { topic: "order.updated".into() });
    }

    #[test]
    fn stable_hash_ignores_action_only_changes() {
        let base = RuleInput {
            id: "r1".into(),
            name: "r1".into(),
            description: None,
            priority: 0,
            enabled: true,
            tags: vec![],
            group: None,
            trigger: Trigger::Event { topic: "t".into() },
            conditions: vec![],
            actions: vec![Action::Log { message: json!("a") }],
            lookups: None,
        };
        let mut changed = base.clone();
        changed.actions = vec![Action::Log { message: json!("completely different") }];
        assert_eq!(stable_hash(&base), stable_hash(&changed));
    }
}
