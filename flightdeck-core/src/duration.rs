//! Human-friendly duration parsing
//!
//! Intervals show up in flags (`--resource-checking-interval 1m`), pipeline
//! configs (`check_every: "2m"`), and plan timeouts (`"90s"`). All of them go
//! through this one parser.

use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("empty duration")]
    Empty,
    #[error("invalid duration {0:?}: expected a number followed by s, m, or h")]
    Invalid(String),
}

/// Parses `"30"` (seconds), `"30s"`, `"5m"`, or `"2h"` into a `Duration`.
pub fn parse(input: &str) -> Result<Duration, DurationParseError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let (number, unit) = match input.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => input.split_at(idx),
        None => (input, "s"),
    };

    let value: u64 = number
        .parse()
        .map_err(|_| DurationParseError::Invalid(input.to_string()))?;

    let secs = match unit {
        "s" => value,
        "m" => value * 60,
        "h" => value * 3600,
        _ => return Err(DurationParseError::Invalid(input.to_string())),
    };

    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_units() {
        assert_eq!(parse("30s"), Ok(Duration::from_secs(30)));
        assert_eq!(parse("5m"), Ok(Duration::from_secs(300)));
        assert_eq!(parse("2h"), Ok(Duration::from_secs(7200)));
    }

    #[test]
    fn test_parse_bare_number_is_seconds() {
        assert_eq!(parse("45"), Ok(Duration::from_secs(45)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse("").is_err());
        assert!(parse("abc").is_err());
        assert!(parse("5d").is_err());
        assert!(parse("m5").is_err());
    }
}
