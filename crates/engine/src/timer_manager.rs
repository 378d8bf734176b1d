//! Schedule, cancel, and fire one-shot/repeating timers (spec §4.6).
//!
//! Each timer owns a background task that sleeps until `expires_at`, fires
//! its on-expire payload through [`TimerSink`], and — for repeating timers
//! under their `max_count` — reschedules itself. Cancellation signals the
//! task through a oneshot channel and removes the name from the map.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::{oneshot, RwLock};

use chainforge_core::error::EngineError;

use crate::schema::{OnExpire, RepeatPolicy, Timer};

/// Receives fired timers. Implemented by the orchestrator so a timer
/// expiration re-enters trigger processing.
#[async_trait]
pub trait TimerSink: Send + Sync {
    async fn on_timer_fired(&self, timer: Timer);
}

struct Entry {
    timer: Timer,
    cancel: oneshot::Sender<()>,
}

pub struct TimerManager {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    sink: Arc<dyn TimerSink>,
}

impl TimerManager {
    pub fn new(sink: Arc<dyn TimerSink>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            sink,
        }
    }

    /// Schedule a timer, cancelling any prior timer of the same name.
    pub async fn set_timer(
        &self,
        name: &str,
        duration: std::time::Duration,
        on_expire: OnExpire,
        repeat: Option<RepeatPolicy>,
        correlation_id: Option<String>,
    ) -> Timer {
        self.cancel_timer(name).await;

        let timer = Timer {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            expires_at: Utc::now() + chrono::Duration::from_std(duration).unwrap_or_default(),
            on_expire,
            repeat,
            correlation_id,
            fire_count: 0,
        };

        let (cancel_tx, cancel_rx) = oneshot::channel();
        self.entries.write().await.insert(
            name.to_string(),
            Entry {
                timer: timer.clone(),
                cancel: cancel_tx,
            },
        );

        spawn_timer_task(
            name.to_string(),
            duration,
            self.entries.clone(),
            self.sink.clone(),
            cancel_rx,
        );

        timer
    }

    /// Idempotent cancellation; returns whether a timer existed.
    pub async fn cancel_timer(&self, name: &str) -> bool {
        if let Some(entry) = self.entries.write().await.remove(name) {
            let _ = entry.cancel.send(());
            true
        } else {
            false
        }
    }

    pub async fn get_timer(&self, name: &str) -> Option<Timer> {
        self.entries.read().await.get(name).map(|e| e.timer.clone())
    }

    /// Cancel every scheduled timer. Called from `Engine::stop()`.
    pub async fn stop(&self) {
        let mut entries = self.entries.write().await;
        for (_, entry) in entries.drain() {
            let _ = entry.cancel.send(());
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

fn spawn_timer_task(
    name: String,
    initial_delay: std::time::Duration,
    entries: Arc<RwLock<HashMap<String, Entry>>>,
    sink: Arc<dyn TimerSink>,
    mut cancel_rx: oneshot::Receiver<()>,
) {
    tokio::spawn(async move {
        let mut delay = initial_delay;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = &mut cancel_rx => return,
            }

            let mut guard = entries.write().await;
            let Some(entry) = guard.get_mut(&name) else { return };
            entry.timer.fire_count += 1;
            let fired = entry.timer.clone();
            let repeat = entry.timer.repeat;
            drop(guard);

            sink.on_timer_fired(fired.clone()).await;

            let should_repeat = match repeat {
                Some(policy) => policy
                    .max_count
                    .map(|max| fired.fire_count < max)
                    .unwrap_or(true),
                None => false,
            };

            if !should_repeat {
                entries.write().await.remove(&name);
                return;
            }

            let interval = repeat.expect("should_repeat implies repeat policy").interval;
            let mut guard = entries.write().await;
            if let Some(entry) = guard.get_mut(&name) {
                entry.timer.expires_at = Utc::now()
                    + chrono::Duration::from_std(interval).unwrap_or_default();
            } else {
                return;
            }
            drop(guard);
            delay = interval;
        }
    });
}

/// Parse a duration literal (spec §6), mapping failures to `BadRequest`.
pub fn parse_timer_duration(literal: &str) -> Result<std::time::Duration, EngineError> {
    chainforge_core::duration::parse_duration(literal)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingSink(Arc<AtomicUsize>);

    #[async_trait]
    impl TimerSink for CountingSink {
        async fn on_timer_fired(&self, _timer: Timer) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn one_shot_timer_fires_once_and_is_removed() {
        let count = Arc::new(AtomicUsize::new(0));
        let manager = TimerManager::new(Arc::new(CountingSink(count.clone())));
        manager
            .set_timer(
                "t1",
                Duration::from_millis(10),
                OnExpire { topic: "t".into(), data: json!({}) },
                None,
                None,
            )
            .await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(manager.get_timer("t1").await.is_none());
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let count = Arc::new(AtomicUsize::new(0));
        let manager = TimerManager::new(Arc::new(CountingSink(count)));
        manager
            .set_timer(
                "t2",
                Duration::from_secs(10),
                OnExpire { topic: "t".into(), data: json!({}) },
                None,
                None,
            )
            .await;
        assert!(manager.cancel_timer("t2").await);
        assert!(!manager.cancel_timer("t2").await);
        assert!(manager.get_timer("t2").await.is_none());
    }

    #[tokio::test]
    async fn repeating_timer_respects_max_count() {
        let count = Arc::new(AtomicUsize::new(0));
        let manager = TimerManager::new(Arc::new(CountingSink(count.clone())));
        manager
            .set_timer(
                "t3",
                Duration::from_millis(5),
                OnExpire { topic: "t".into(), data: json!({}) },
                Some(RepeatPolicy {
                    interval: Duration::from_millis(5),
                    max_count: Some(3),
                }),
                None,
            )
            .await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
        assert!(manager.get_timer("t3").await.is_none());
    }

    #[tokio::test]
    async fn setting_same_name_cancels_prior() {
        let count = Arc::new(AtomicUsize::new(0));
        let manager = TimerManager::new(Arc::new(CountingSink(count.clone())));
        manager
            .set_timer(
                "t4",
                Duration::from_millis(200),
                OnExpire { topic: "t".into(), data: json!({}) },
                None,
                None,
            )
            .await;
        manager
            .set_timer(
                "t4",
                Duration::from_millis(10),
                OnExpire { topic: "t".into(), data: json!({}) },
                None,
                None,
            )
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
