//! Resolves a rule's `lookups[]` declarations against the service registry,
//! with TTL caching (spec §4.5).

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;

use chainforge_services::ServiceRegistry;

use crate::context::resolve_value;
use crate::schema::{Lookup, LookupErrorStrategy};

struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

/// A cache keyed by `hash(service, method, args)`, shared across all rules.
pub struct LookupCache {
    entries: RwLock<HashMap<u64, CacheEntry>>,
}

impl LookupCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, key: u64) -> Option<Value> {
        let entries = self.entries.read().unwrap();
        entries.get(&key).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.value.clone())
            } else {
                None
            }
        })
    }

    fn put(&self, key: u64, value: Value, ttl: Duration) {
        self.entries.write().unwrap().insert(
            key,
            CacheEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

impl Default for LookupCache {
    fn default() -> Self {
        Self::new()
    }
}

fn cache_key(service: &str, method: &str, args: &[Value]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    service.hash(&mut hasher);
    method.hash(&mut hasher);
    serde_json::to_string(args).unwrap_or_default().hash(&mut hasher);
    hasher.finish()
}

/// Outcome of resolving one rule's lookups.
pub enum LookupResolution {
    Resolved(HashMap<String, Value>),
    /// An `onError: skip` lookup failed; the rule must be skipped as a
    /// whole without evaluating its conditions.
    Skip { lookup: String, reason: String },
    /// An `onError: fail` lookup failed; this should surface as a rule
    /// execution error rather than a silent skip.
    Failed { lookup: String, reason: String },
}

/// Resolve every lookup concurrently against `root` (the trigger context,
/// pre-lookup). `default_ttl` applies when a lookup omits `cache`.
pub async fn resolve_lookups(
    lookups: &[Lookup],
    root: &Value,
    registry: &ServiceRegistry,
    cache: &LookupCache,
    default_ttl: Duration,
) -> LookupResolution {
    let futures = lookups.iter().map(|lookup| async move {
        let args: Vec<Value> = lookup.args.iter().map(|a| resolve_value(a, root)).collect();
        let ttl = lookup.cache.as_ref().map(|c| c.ttl).unwrap_or(default_ttl);
        let key = cache_key(&lookup.service, &lookup.method, &args);

        if let Some(cached) = cache.get(key) {
            return (lookup.name.clone(), lookup.on_error, Ok(cached));
        }

        match registry.call(&lookup.service, &lookup.method, &args).await {
            Ok(value) => {
                cache.put(key, value.clone(), ttl);
                (lookup.name.clone(), lookup.on_error, Ok(value))
            }
            Err(e) => (lookup.name.clone(), lookup.on_error, Err(e.to_string())),
        }
    });

    let results = join_all(futures).await;
    let mut resolved = HashMap::new();
    for (name, on_error, outcome) in results {
        match outcome {
            Ok(value) => {
                resolved.insert(name, value);
            }
            Err(reason) => {
                return match on_error {
                    LookupErrorStrategy::Skip => LookupResolution::Skip { lookup: name, reason },
                    LookupErrorStrategy::Fail => LookupResolution::Failed { lookup: name, reason },
                };
            }
        }
    }

    let _ = Utc::now();
    LookupResolution::Resolved(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chainforge_services::LogService;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> ServiceRegistry {
        let mut r = ServiceRegistry::new();
        r.register(Arc::new(LogService::new()));
        r
    }

    #[tokio::test]
    async fn resolves_all_lookups_concurrently() {
        let lookups = vec![Lookup {
            name: "l1".into(),
            service: "log".into(),
            method: "write".into(),
            args: vec![json!("hi")],
            cache: None,
            on_error: LookupErrorStrategy::Fail,
        }];
        let cache = LookupCache::new();
        let outcome = resolve_lookups(&lookups, &json!({}), &registry(), &cache, Duration::from_secs(1)).await;
        match outcome {
            LookupResolution::Resolved(map) => assert_eq!(map["l1"], json!(true)),
            _ => panic!("expected Resolved"),
        }
    }

    #[tokio::test]
    async fn missing_service_with_skip_strategy_skips() {
        let lookups = vec![Lookup {
            name: "l1".into(),
            service: "nope".into(),
            method: "m".into(),
            args: vec![],
            cache: None,
            on_error: LookupErrorStrategy::Skip,
        }];
        let cache = LookupCache::new();
        let outcome = resolve_lookups(&lookups, &json!({}), &registry(), &cache, Duration::from_secs(1)).await;
        assert!(matches!(outcome, LookupResolution::Skip { .. }));
    }

    #[tokio::test]
    async fn missing_service_with_fail_strategy_fails() {
        let lookups = vec![Lookup {
            name: "l1".into(),
            service: "nope".into(),
            method: "m".into(),
            args: vec![],
            cache: None,
            on_error: LookupErrorStrategy::Fail,
        }];
        let cache = LookupCache::new();
        let outcome = resolve_lookups(&lookups, &json!({}), &registry(), &cache, Duration::from_secs(1)).await;
        assert!(matches!(outcome, LookupResolution::Failed { .. }));
    }

    #[tokio::test]
    async fn cache_hit_avoids_second_call() {
        let lookups = vec![Lookup {
            name: "l1".into(),
            service: "log".into(),
            method: "write".into(),
            args: vec![json!("hi")],
            cache: Some(crate::schema::LookupCache { ttl: Duration::from_secs(60) }),
            on_error: LookupErrorStrategy::Fail,
        }];
        let cache = LookupCache::new();
        let r = registry();
        let first = resolve_lookups(&lookups, &json!({}), &r, &cache, Duration::from_secs(1)).await;
        assert!(matches!(first, LookupResolution::Resolved(_)));
        let second = resolve_lookups(&lookups, &json!({}), &r, &cache, Duration::from_secs(1)).await;
        assert!(matches!(second, LookupResolution::Resolved(_)));
    }
}
