//! Generic HTTP webhook service.
//!
//! Delivers `call_service("webhook", "post", [url, body])`-style
//! invocations as JSON POSTs to a configured or caller-supplied endpoint.
//! Environment variable references (`${VAR_NAME}`) in a configured base URL
//! and header values are resolved eagerly at construction time.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::{Service, ServiceError};

#[derive(Debug)]
pub struct WebhookService {
    /// Default URL used when a call omits one; env vars already resolved.
    default_url: Option<String>,
    headers: HashMap<String, String>,
    client: reqwest::Client,
}

impl WebhookService {
    pub fn new(
        default_url: Option<String>,
        headers: HashMap<String, String>,
    ) -> Result<Self, ServiceError> {
        let default_url = default_url.map(|u| resolve_env_vars(&u)).transpose()?;
        let mut resolved_headers = HashMap::with_capacity(headers.len());
        for (key, value) in &headers {
            resolved_headers.insert(key.clone(), resolve_env_vars(value)?);
        }
        Ok(Self {
            default_url,
            headers: resolved_headers,
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl Service for WebhookService {
    async fn call(&self, method: &str, args: &[Value]) -> Result<Value, ServiceError> {
        match method {
            "post" | "send" => {
                let (url, body) = match args {
                    [Value::String(url), body] => (url.clone(), body.clone()),
                    [body] => (
                        self.default_url
                            .clone()
                            .ok_or_else(|| ServiceError::InvalidArgs("no url provided and no default configured".into()))?,
                        body.clone(),
                    ),
                    other => {
                        return Err(ServiceError::InvalidArgs(format!(
                            "webhook.{method} expects (url?, body), got {} args",
                            other.len()
                        )))
                    }
                };

                let mut request = self.client.post(&url).json(&body);
                for (key, value) in &self.headers {
                    request = request.header(key.as_str(), value.as_str());
                }

                let response = request.send().await?;
                let status = response.status();
                if !status.is_success() {
                    let body_text = response.text().await.unwrap_or_default();
                    tracing::warn!(%url, %status, body = %body_text, "webhook call_service returned non-2xx");
                    return Err(ServiceError::Config(format!(
                        "webhook returned {status}: {body_text}"
                    )));
                }
                let value = response.json::<Value>().await.unwrap_or(Value::Null);
                Ok(value)
            }
            other => Err(ServiceError::MethodNotFound {
                service: "webhook".to_string(),
                method: other.to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "webhook"
    }
}

/// Resolve `${VAR_NAME}` patterns using `std::env::var`.
fn resolve_env_vars(input: &str) -> Result<String, ServiceError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && chars.peek() == Some(&'{') {
            chars.next();
            let mut var_name = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == '}' {
                    closed = true;
                    break;
                }
                var_name.push(c);
            }
            if !closed {
                return Err(ServiceError::Config(format!(
                    "unclosed env var reference in: {input}"
                )));
            }
            let value = std::env::var(&var_name)
                .map_err(|_| ServiceError::Config(format!("env var not found: {var_name}")))?;
            result.push_str(&value);
        } else {
            result.push(ch);
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_env_vars_basic() {
        std::env::set_var("CHAINFORGE_WEBHOOK_TEST_HOST", "example.com");
        let result = resolve_env_vars("https://${CHAINFORGE_WEBHOOK_TEST_HOST}/hook").unwrap();
        assert_eq!(result, "https://example.com/hook");
        std::env::remove_var("CHAINFORGE_WEBHOOK_TEST_HOST");
    }

    #[test]
    fn resolve_env_vars_missing_errors() {
        let result = resolve_env_vars("${CHAINFORGE_ABSOLUTELY_NOT_SET}");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn call_without_url_or_default_is_invalid_args() {
        let svc = WebhookService::new(None, HashMap::new()).unwrap();
        let err = svc
            .call("post", &[Value::String("just one arg".into())])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidArgs(_)));
    }
}
