//! # Duration Parsing
//!
//! Handles parsing and validating duration strings such as `5m`,
//! `1h30m`, `1.5s` or `300ms`, as used by the refresh interval annotation.

use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;

// One <number><unit> component; a duration is one or more of these back to back
static DURATION_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<number>\d+(?:\.\d*)?|\.\d+)(?P<unit>ns|us|µs|μs|ms|s|m|h)")
        .expect("Failed to compile duration pattern - this should never happen")
});

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DurationError {
    #[error("invalid duration {0:?}, expected e.g. \"30s\", \"5m\" or \"1h30m\"")]
    Invalid(String),
    #[error("negative duration {0:?}")]
    Negative(String),
    #[error("{field} {value:?} must be at least {min:?}")]
    TooShort {
        field: String,
        value: String,
        min: Duration,
    },
}

fn unit_nanos(unit: &str) -> f64 {
    match unit {
        "ns" => 1.0,
        "us" | "µs" | "μs" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        // Only "h" is left, the pattern admits nothing else
        _ => 3600e9,
    }
}

/// Parse a duration string such as `1h30m` into a [`Duration`]
///
/// A bare `0` is accepted. A leading `+` is allowed, a leading `-` is an
/// error unless the value is zero.
pub fn parse_go_duration(duration_str: &str) -> Result<Duration, DurationError> {
    let trimmed = duration_str.trim();
    let invalid = || DurationError::Invalid(trimmed.to_string());

    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        Some(_) => (false, trimmed),
        None => return Err(invalid()),
    };
    if unsigned == "0" {
        return Ok(Duration::ZERO);
    }

    let mut nanos = 0f64;
    let mut expected_start = 0;
    for captures in DURATION_COMPONENT.captures_iter(unsigned) {
        let (Some(whole), Some(number), Some(unit)) =
            (captures.get(0), captures.name("number"), captures.name("unit"))
        else {
            return Err(invalid());
        };
        if whole.start() != expected_start {
            return Err(invalid());
        }
        expected_start = whole.end();

        let value: f64 = number.as_str().parse().map_err(|_| invalid())?;
        nanos += value * unit_nanos(unit.as_str());
    }
    if expected_start == 0 || expected_start != unsigned.len() {
        return Err(invalid());
    }

    if negative && nanos > 0.0 {
        return Err(DurationError::Negative(trimmed.to_string()));
    }
    if !nanos.is_finite() || nanos > u64::MAX as f64 {
        return Err(invalid());
    }
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        reason = "value is finite, non-negative and range checked above"
    )]
    let nanos = nanos.round() as u64;
    Ok(Duration::from_nanos(nanos))
}

/// Parse `value` and check it is at least `min`
pub fn validate_duration_interval(
    value: &str,
    field_name: &str,
    min: Duration,
) -> Result<Duration, DurationError> {
    let duration = parse_go_duration(value)?;
    if duration < min {
        return Err(DurationError::TooShort {
            field: field_name.to_string(),
            value: value.trim().to_string(),
            min,
        });
    }
    Ok(duration)
}
