//! Parsing for the human-readable duration strings used throughout pipeline
//! configuration (`1h`, `30s`, `500ms`).

use crate::error::{CoreError, Result};
use std::time::Duration;

/// Parses durations of the form `<number><unit>` where unit is one of
/// `ms`, `s`, `m`, `h`. A bare integer is interpreted as seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(CoreError::InvalidDuration(
            input.to_string(),
            "empty duration".to_string(),
        ));
    }

    let split_at = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (number_part, unit_part) = s.split_at(split_at);

    let value: f64 = number_part.parse().map_err(|_| {
        CoreError::InvalidDuration(input.to_string(), format!("invalid number '{number_part}'"))
    })?;

    let multiplier_ms: f64 = match unit_part {
        "" | "s" => 1000.0,
        "ms" => 1.0,
        "m" => 60_000.0,
        "h" => 3_600_000.0,
        other => {
            return Err(CoreError::InvalidDuration(
                input.to_string(),
                format!("unknown unit '{other}'"),
            ))
        }
    };

    let millis = value * multiplier_ms;
    if millis < 0.0 || !millis.is_finite() {
        return Err(CoreError::InvalidDuration(
            input.to_string(),
            "duration out of range".to_string(),
        ));
    }
    Ok(Duration::from_millis(millis as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_seconds() {
        assert_eq!(parse_duration("30s").unwrap(), Duration::from_secs(30));
    }

    #[test]
    fn parses_hours() {
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn parses_millis() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
    }

    #[test]
    fn bare_number_is_seconds() {
        assert_eq!(parse_duration("5").unwrap(), Duration::from_secs(5));
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_duration("5x").is_err());
    }

    #[test]
    fn rejects_empty() {
        assert!(parse_duration("").is_err());
    }
}
