//! A trivial service that writes to the process's tracing output.
//!
//! Exists mainly as the target for rules whose `call_service` action wants
//! a side effect without any external dependency — and as a reference
//! implementation of [`Service`] for tests.

use async_trait::async_trait;
use serde_json::Value;

use crate::{Service, ServiceError};

#[derive(Debug, Default)]
pub struct LogService;

impl LogService {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Service for LogService {
    async fn call(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError> {
        match method {
            "write" => {
                let message = args
                    .first()
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .unwrap_or_else(|| args.iter().map(ToString::to_string).collect::<Vec<_>>().join(" "));
                tracing::info!(service = "log", %message, "call_service log.write");
                Ok(Value::Bool(true))
            }
            other => Err(ServiceError::MethodNotFound {
                service: "log".to_string(),
                method: other.to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "log"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn write_accepts_a_string_arg() {
        let svc = LogService::new();
        let result = svc
            .call("write", &[Value::String("hi".into())])
            .await
            .unwrap();
        assert_eq!(result, Value::Bool(true));
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let svc = LogService::new();
        let err = svc.call("nope", &[]).await.unwrap_err();
        assert!(matches!(err, ServiceError::MethodNotFound { .. }));
    }
}
