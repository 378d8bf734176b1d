//! Closed error taxonomy for the rule engine's public API surface.
//!
//! Every fallible operation exposed across a crate boundary returns
//! [`EngineError`] so callers never see a raw `std::io::Error` or parser
//! error — each variant carries a stable `code()` and HTTP-shaped
//! `status()` suitable for an (out-of-scope) API layer to map directly.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Severity of a single validation finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// One validation finding, JSON-path-like `path` plus a human message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub path: String,
    pub message: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn error(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    pub fn warning(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}

/// Errors surfaced at the engine's public API surface.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Rule input failed schema checks. Contains every issue found, not
    /// just the first; warnings (`Severity::Warning`) do not block
    /// registration but are still reported.
    #[error("rule validation failed: {} issue(s)", .issues.len())]
    Validation { issues: Vec<ValidationIssue> },

    /// Operation targeted a rule/group/fact/timer that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate id on register/create.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Optional subsystem (versioning, baseline, persistence) accessed
    /// while not configured.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Malformed request that isn't a schema-validation failure
    /// (bad duration literal, unknown pattern syntax, …).
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
}

impl EngineError {
    /// Stable machine-readable code for API mapping.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "RULE_VALIDATION_ERROR",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::Conflict(_) => "CONFLICT",
            EngineError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            EngineError::BadRequest(_) => "BAD_REQUEST",
            EngineError::Io(_) => "BAD_REQUEST",
            EngineError::Parse(_) => "BAD_REQUEST",
        }
    }

    /// HTTP-shaped numeric status suitable for a REST/GraphQL layer.
    pub fn status(&self) -> u16 {
        match self {
            EngineError::Validation { .. } => 400,
            EngineError::NotFound(_) => 404,
            EngineError::Conflict(_) => 409,
            EngineError::ServiceUnavailable(_) => 503,
            EngineError::BadRequest(_) => 400,
            EngineError::Io(_) => 400,
            EngineError::Parse(_) => 400,
        }
    }

    /// Build a single-error validation failure.
    pub fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Validation {
            issues: vec![ValidationIssue::error(path, message)],
        }
    }
}

/// Result alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_and_status_are_stable() {
        assert_eq!(EngineError::NotFound("x".into()).code(), "NOT_FOUND");
        assert_eq!(EngineError::NotFound("x".into()).status(), 404);
        assert_eq!(EngineError::Conflict("x".into()).status(), 409);
        assert_eq!(EngineError::ServiceUnavailable("x".into()).status(), 503);
    }

    #[test]
    fn validation_single_issue_helper() {
        let err = EngineError::validation("trigger", "missing trigger");
        match err {
            EngineError::Validation { issues } => {
                assert_eq!(issues.len(), 1);
                assert_eq!(issues[0].severity, Severity::Error);
            }
            _ => panic!("expected Validation"),
        }
    }
}
