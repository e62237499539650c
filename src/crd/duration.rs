//! # Durations
//!
//! Parsing and formatting of `spec.timeout` values.
//!
//! TaskRun timeouts use the metav1.Duration wire format: a sequence of decimal
//! numbers each followed by a unit (`ns`, `us`, `µs`, `ms`, `s`, `m`, `h`), for
//! example `1h0m0s`, `90s`, `1.5h` or `500ms`. Formatting produces the same
//! canonical form the API server echoes back (`1h0m0s`, `1m30s`, `1s`).

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

static COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used, reason = "static pattern")]
    Regex::new(r"(?P<number>\d+(?:\.\d*)?|\.\d+)(?P<unit>ns|us|µs|ms|s|m|h)")
        .expect("duration component pattern is valid")
});

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationError {
    #[error("duration string cannot be empty")]
    Empty,
    #[error("invalid duration {0:?}")]
    Invalid(String),
    #[error("duration {0:?} overflows")]
    Overflow(String),
}

/// Parse a duration string such as `1h0m0s`, `90s` or `1.5m`.
///
/// A bare `0` is accepted, negative durations are not.
pub fn parse_duration(input: &str) -> Result<Duration, DurationError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(DurationError::Empty);
    }
    if trimmed == "0" {
        return Ok(Duration::ZERO);
    }

    let mut consumed = 0;
    let mut total_nanos: f64 = 0.0;
    for captures in COMPONENT.captures_iter(trimmed) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        // Components must be contiguous, "1h 2m" or "1hfoo" is rejected.
        if whole.start() != consumed {
            return Err(DurationError::Invalid(trimmed.to_string()));
        }
        consumed = whole.end();

        let number: f64 = captures["number"]
            .parse()
            .map_err(|_parse_err| DurationError::Invalid(trimmed.to_string()))?;
        let unit_nanos = match &captures["unit"] {
            "ns" => 1.0,
            "us" | "µs" => 1e3,
            "ms" => 1e6,
            "s" => 1e9,
            "m" => 60.0 * 1e9,
            "h" => 3600.0 * 1e9,
            _ => return Err(DurationError::Invalid(trimmed.to_string())),
        };
        total_nanos += number * unit_nanos;
    }

    if consumed != trimmed.len() {
        return Err(DurationError::Invalid(trimmed.to_string()));
    }
    if !total_nanos.is_finite() || total_nanos > u64::MAX as f64 {
        return Err(DurationError::Overflow(trimmed.to_string()));
    }

    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "range checked above"
    )]
    let nanos = total_nanos.round() as u64;
    Ok(Duration::from_nanos(nanos))
}

/// Format a duration the way the API server prints it back.
pub fn format_duration(duration: Duration) -> String {
    if duration.is_zero() {
        return "0s".to_string();
    }

    let total_secs = duration.as_secs();
    let subsec_nanos = duration.subsec_nanos();

    if total_secs == 0 {
        return if subsec_nanos % 1_000_000 == 0 {
            format!("{}ms", subsec_nanos / 1_000_000)
        } else if subsec_nanos % 1_000 == 0 {
            format!("{}µs", subsec_nanos / 1_000)
        } else {
            format!("{subsec_nanos}ns")
        };
    }

    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;

    let seconds_part = if subsec_nanos == 0 {
        format!("{seconds}s")
    } else {
        let fraction = format!("{subsec_nanos:09}");
        format!("{seconds}.{}s", fraction.trim_end_matches('0'))
    };

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds_part}")
    } else if minutes > 0 {
        format!("{minutes}m{seconds_part}")
    } else {
        seconds_part
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compound_duration() {
        assert_eq!(parse_duration("1h0m0s").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("1.5h").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("0").unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert_eq!(parse_duration(""), Err(DurationError::Empty));
        assert!(parse_duration("10").is_err());
        assert!(parse_duration("1x").is_err());
        assert!(parse_duration("1h 2m").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("abc1s").is_err());
    }

    #[test]
    fn test_format_matches_api_server_output() {
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h0m0s");
        assert_eq!(format_duration(Duration::from_secs(90)), "1m30s");
        assert_eq!(format_duration(Duration::from_secs(1)), "1s");
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_duration(Duration::from_millis(500)), "500ms");
        assert_eq!(format_duration(Duration::ZERO), "0s");
    }
}
