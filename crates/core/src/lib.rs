pub mod config;
pub mod duration;
pub mod error;
pub mod pattern;

pub use config::EngineConfig;
pub use duration::parse_duration;
pub use error::{EngineError, Result, Severity, ValidationIssue};
