//! Duration literal parsing: `"30s"`, `"5m"`, `"2h"`, `"1d"`, `"2w"`, `"1y"`,
//! or a bare integer meaning milliseconds.

use std::time::Duration;

use crate::error::EngineError;

const MS_PER_SECOND: u64 = 1000;
const MS_PER_MINUTE: u64 = 60 * MS_PER_SECOND;
const MS_PER_HOUR: u64 = 60 * MS_PER_MINUTE;
const MS_PER_DAY: u64 = 24 * MS_PER_HOUR;
const MS_PER_WEEK: u64 = 7 * MS_PER_DAY;
const MS_PER_YEAR: u64 = 365 * MS_PER_DAY;

/// Parses a duration literal as described in the rule schema's temporal
/// fields (timer `interval`, lookup `ttl`, hot-reload `interval`, …).
///
/// Accepts `<digits><unit>` where unit is one of `ms|s|m|h|d|w|y`, or a bare
/// `<digits>` string, interpreted as milliseconds.
pub fn parse_duration(literal: &str) -> Result<Duration, EngineError> {
    let literal = literal.trim();
    if literal.is_empty() {
        return Err(EngineError::BadRequest("empty duration literal".into()));
    }

    if let Ok(ms) = literal.parse::<u64>() {
        return Ok(Duration::from_millis(ms));
    }

    let split_at = literal
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| invalid(literal))?;
    let (digits, unit) = literal.split_at(split_at);
    let value: u64 = digits.parse().map_err(|_| invalid(literal))?;

    let ms = match unit {
        "ms" => value,
        "s" => value.saturating_mul(MS_PER_SECOND),
        "m" => value.saturating_mul(MS_PER_MINUTE),
        "h" => value.saturating_mul(MS_PER_HOUR),
        "d" => value.saturating_mul(MS_PER_DAY),
        "w" => value.saturating_mul(MS_PER_WEEK),
        "y" => value.saturating_mul(MS_PER_YEAR),
        _ => return Err(invalid(literal)),
    };

    Ok(Duration::from_millis(ms))
}

fn invalid(literal: &str) -> EngineError {
    EngineError::BadRequest(format!("invalid duration literal: {literal:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_integer_is_milliseconds() {
        assert_eq!(parse_duration("500").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn units_convert_correctly() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("1d").unwrap(), Duration::from_secs(86400));
        assert_eq!(parse_duration("1w").unwrap(), Duration::from_secs(604800));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("abc").is_err());
        assert!(parse_duration("10x").is_err());
        assert!(parse_duration("-5s").is_err());
    }
}
