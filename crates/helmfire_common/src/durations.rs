//! Duration parsing for flags and uptime formatting.

use crate::error::{HelmfireError, Result};
use std::time::Duration;

/// Parse `500ms`, `30s`, `5m`, `1h`, `1h30m` or a bare number of seconds.
pub fn parse_duration(input: &str) -> Result<Duration> {
    let s = input.trim();
    if s.is_empty() {
        return Err(invalid(input, "empty duration"));
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            return Err(invalid(input, "expected a number"));
        }
        let value: u64 = rest[..digits]
            .parse()
            .map_err(|_| invalid(input, "number out of range"))?;
        rest = &rest[digits..];

        let unit_len = rest.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        let unit = &rest[..unit_len];
        rest = &rest[unit_len..];

        let part = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            "" => return Err(invalid(input, "missing unit")),
            other => return Err(invalid(input, &format!("unknown unit '{}'", other))),
        };
        total = total.saturating_add(part);
    }
    Ok(total)
}

fn invalid(input: &str, reason: &str) -> HelmfireError {
    HelmfireError::InvalidConfig(format!("invalid duration '{}': {}", input, reason))
}

/// Whole seconds for a drift interval. Zero stays zero (disabled); anything
/// shorter than a second is rounded up to one.
pub fn interval_secs(interval: Duration) -> u64 {
    if interval.is_zero() {
        0
    } else {
        interval.as_secs().max(1)
    }
}

/// Format whole seconds as `1h2m3s`, omitting leading zero units.
pub fn format_uptime(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}h{}m{}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m{}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}
