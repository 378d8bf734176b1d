//! The service registry contract: a mapping from service name to an object
//! with callable, async methods, invoked by the engine's `call_service`
//! action. Missing services or methods are reported as errors the engine
//! turns into a skipped/failed action rather than a panic.

mod log;
mod webhook;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use log::LogService;
pub use webhook::WebhookService;

/// Errors raised while invoking a registered service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("service not found: {0}")]
    NotFound(String),

    #[error("method not found: {service}.{method}")]
    MethodNotFound { service: String, method: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid arguments: {0}")]
    InvalidArgs(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// A named, callable external service. Each method takes the resolved
/// argument vector from a rule's `call_service` action and returns a JSON
/// value (or an error the engine records as a failed action).
#[async_trait]
pub trait Service: Send + Sync {
    /// Invoke `method` with `args` already resolved against the rule's
    /// evaluation context (references and interpolations expanded).
    async fn call(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError>;

    /// Human-readable name used in logs and error messages.
    fn name(&self) -> &str;
}

/// Lookup table the engine is constructed with, mapping a service name
/// (as referenced by a rule's `call_service` action or `lookups[].service`)
/// to its implementation.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: HashMap<String, Arc<dyn Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
        }
    }

    pub fn register(&mut self, service: Arc<dyn Service>) {
        self.services.insert(service.name().to_string(), service);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Service>> {
        self.services.get(name).cloned()
    }

    /// Resolve and invoke `service.method(args)`, producing the
    /// `Service not found: <name>` error the engine's action executor is
    /// required to surface verbatim.
    pub async fn call(
        &self,
        service: &str,
        method: &str,
        args: &[Value],
    ) -> Result<Value, ServiceError> {
        let svc = self
            .services
            .get(service)
            .ok_or_else(|| ServiceError::NotFound(service.to_string()))?;
        svc.call(method, args).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_service_reports_not_found() {
        let registry = ServiceRegistry::new();
        let err = registry.call("nope", "do", &[]).await.unwrap_err();
        match err {
            ServiceError::NotFound(name) => assert_eq!(name, "nope"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn registered_service_is_reachable_by_name() {
        let mut registry = ServiceRegistry::new();
        registry.register(Arc::new(LogService::new()));
        let result = registry
            .call("log", "write", &[Value::String("hello".into())])
            .await
            .unwrap();
        assert_eq!(result, Value::Bool(true));
    }
}
