//! Glob pattern compilation and caching for fact keys, timer names, and
//! event topics.
//!
//! Fact keys and timer names are `:`-delimited; `*` matches exactly one
//! segment. Event topics are `.`-delimited; `*` matches exactly one segment
//! and `**` matches zero or more segments. Patterns are compiled to
//! [`regex::Regex`] once and cached by their literal text, as
//! `crates/rules/src/evaluator/mod.rs`'s trigger matching does for its own
//! dispatch.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

use regex::Regex;

use crate::error::EngineError;

/// Delimiter-dependent compilation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternKind {
    /// `:`-delimited, `*` = exactly one segment (facts, timers).
    Colon,
    /// `.`-delimited, `*` = exactly one segment, `**` = zero or more (events).
    Dot,
    /// Used as-is, for the condition evaluator's `matches` operator.
    Raw,
}

type Cache = RwLock<HashMap<(PatternKind, String), Arc<Regex>>>;

fn cache() -> &'static Cache {
    static CACHE: OnceLock<Cache> = OnceLock::new();
    CACHE.get_or_init(|| RwLock::new(HashMap::new()))
}

/// Compiles `pattern` under `kind`, reusing a cached regex when the same
/// literal pattern was compiled before.
pub fn compile(kind: PatternKind, pattern: &str) -> Result<Arc<Regex>, EngineError> {
    let cache_key = (kind, pattern.to_string());
    if let Some(hit) = cache().read().unwrap().get(&cache_key) {
        return Ok(hit.clone());
    }

    let regex_source = match kind {
        PatternKind::Colon => colon_to_regex(pattern),
        PatternKind::Dot => dot_to_regex(pattern),
        PatternKind::Raw => pattern.to_string(),
    };
    let compiled = Regex::new(&regex_source)
        .map_err(|e| EngineError::BadRequest(format!("invalid pattern {pattern:?}: {e}")))?;
    let compiled = Arc::new(compiled);

    cache()
        .write()
        .unwrap()
        .insert(cache_key, compiled.clone());
    Ok(compiled)
}

/// Convenience: compile-then-match in one call.
pub fn matches(kind: PatternKind, pattern: &str, candidate: &str) -> Result<bool, EngineError> {
    Ok(compile(kind, pattern)?.is_match(candidate))
}

/// A pattern contains no wildcard and can be looked up by exact match.
pub fn is_literal(pattern: &str) -> bool {
    !pattern.contains('*')
}

/// Drops every cached compiled pattern. Exposed for tests that need
/// deterministic recompilation.
pub fn clear_pattern_cache() {
    cache().write().unwrap().clear();
}

fn colon_to_regex(pattern: &str) -> String {
    let segments: Vec<String> = pattern
        .split(':')
        .map(|segment| {
            if segment == "*" {
                "[^:]+".to_string()
            } else {
                regex::escape(segment)
            }
        })
        .collect();
    format!("^{}$", segments.join(":"))
}

fn dot_to_regex(pattern: &str) -> String {
    let segments: Vec<&str> = pattern.split('.').collect();
    let n = segments.len();
    let mut out = String::from("^");
    let mut i = 0;
    while i < n {
        let segment = segments[i];
        if segment == "**" {
            let has_before = i > 0;
            let has_after = i + 1 < n;
            match (has_before, has_after) {
                // whole pattern is "**": any number of segments, zero included
                (false, false) => out.push_str("(?:[^.]+(?:\\.[^.]+)*)?"),
                // trailing "**": the dot before it is absorbed into the
                // repetition so the zero-segment case needs no trailing dot
                (true, false) => out.push_str("(?:\\.[^.]+)*"),
                // leading "**": same, mirrored at the start
                (false, true) => out.push_str("(?:[^.]+\\.)*"),
                // "**" in the middle still needs a mandatory dot separating
                // it from the next literal segment, since the zero-segment
                // case collapses to "a.b", not "ab"
                (true, true) => {
                    out.push_str("(?:\\.[^.]+)*\\.");
                    i += 1;
                    out.push_str(&match segments[i] {
                        "*" => "[^.]+".to_string(),
                        other => regex::escape(other),
                    });
                }
            }
        } else {
            if i > 0 && segments[i - 1] != "**" {
                out.push_str("\\.");
            }
            match segment {
                "*" => out.push_str("[^.]+"),
                other => out.push_str(&regex::escape(other)),
            }
        }
        i += 1;
    }
    out.push('$');
    out
}
