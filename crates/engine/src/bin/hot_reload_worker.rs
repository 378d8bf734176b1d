//! hot-reload-worker — boots an engine against a rules directory and
//! keeps it reconciled on a poll-and-diff cycle until signaled.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{info, warn};

use chainforge_core::config::EngineConfig;
use chainforge_engine::engine::Engine;
use chainforge_engine::hot_reload::{DirectorySource, HotReloadObserver, HotReloadOutcome, HotReloadWatcher, RuleSource};
use chainforge_engine::observability::Observability;
use chainforge_services::{LogService, ServiceRegistry, WebhookService};

/// Rule engine worker — watches a rules directory and reconciles on an interval.
#[derive(Parser, Debug)]
#[command(name = "hot-reload-worker", version, about)]
struct Cli {
    /// Directory of `*.yml`/`*.yaml` rule files to load.
    #[arg(long, env = "CHAINFORGE_RULES_DIR", default_value = "rules")]
    rules_dir: String,

    /// Recurse into subdirectories of `rules_dir`.
    #[arg(long, env = "CHAINFORGE_RULES_RECURSIVE", default_value_t = true)]
    recursive: bool,

    /// Engine profile, prefixes every `CHAINFORGE_*` env var lookup.
    #[arg(long, env = "CHAINFORGE_PROFILE", default_value = "")]
    profile: String,
}

struct LoggingObserver;

impl HotReloadObserver for LoggingObserver {
    fn on_started(&mut self, sources: usize) {
        info!(sources, "hot-reload cycle started");
    }

    fn on_completed(&mut self, added: usize, removed: usize, modified: usize, duration: Duration) {
        info!(added, removed, modified, ms = duration.as_millis() as u64, "hot-reload cycle applied");
    }

    fn on_failed(&mut self, reason: &str) {
        warn!(reason, "hot-reload cycle failed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = EngineConfig::for_profile(&cli.profile);

    let mut services = ServiceRegistry::new();
    services.register(Arc::new(LogService::new()));
    services.register(Arc::new(WebhookService::new(None, Default::default())?));

    let watcher = HotReloadWatcher::new(
        vec![Box::new(DirectorySource::new(cli.rules_dir.clone(), cli.recursive)) as Box<dyn RuleSource>],
        config.hot_reload_interval,
        config.hot_reload_validate_before_apply,
        config.hot_reload_atomic,
    );

    let engine = Engine::new(config.clone(), services, Observability::tracing());
    engine.start().await;
    let _ticker = engine.spawn_temporal_ticker();

    info!(rules_dir = %cli.rules_dir, interval_secs = config.hot_reload_interval.as_secs(), "hot-reload-worker started");

    let mut observer = LoggingObserver;
    let mut interval = tokio::time::interval(config.hot_reload_interval);
    loop {
        tokio::select! {
            _ = interval.tick() => {
                let barrier = engine.queue_barrier();
                match watcher.perform_check(engine.rule_manager(), barrier.as_ref(), &mut observer).await {
                    HotReloadOutcome::Applied { added, modified, removed, .. } => {
                        if !added.is_empty() || !modified.is_empty() || !removed.is_empty() {
                            engine.sync_after_reload();
                        }
                    }
                    HotReloadOutcome::ValidationFailed { issues } => {
                        warn!(issue_count = issues.len(), "rule set failed validation, keeping previous rules");
                    }
                    HotReloadOutcome::SourceError { reason } => {
                        warn!(%reason, "failed to load rules from source");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
        }
    }

    engine.stop().await;
    info!("hot-reload-worker exited cleanly");
    Ok(())
}
