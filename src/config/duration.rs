//! # Duration Parsing
//!
//! Kubernetes-style duration strings used by `POLL_INTERVAL`.

use anyhow::Result;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

// Matches: <number><unit> where unit is s, m, h or d
static DURATION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<number>\d+)(?P<unit>[smhd])$")
        .expect("Failed to compile duration regex - this should never happen")
});

/// Parse Kubernetes duration string into std::time::Duration
/// Supports formats: "30s", "1m", "5m", "1h", "2h", "1d"
/// Returns Duration or error if format is invalid
pub fn parse_kubernetes_duration(duration_str: &str) -> Result<Duration> {
    let duration_trimmed = duration_str.trim();

    if duration_trimmed.is_empty() {
        return Err(anyhow::anyhow!("Duration string cannot be empty"));
    }

    let interval_lower = duration_trimmed.to_lowercase();

    let captures = DURATION_REGEX.captures(&interval_lower).ok_or_else(|| {
        anyhow::anyhow!(
            "Invalid duration format '{}'. Expected format: <number><unit> (e.g., '30s', '1m', '1h')",
            duration_trimmed
        )
    })?;

    let number: u64 = captures["number"].parse().map_err(|e| {
        anyhow::anyhow!(
            "Invalid duration number '{}' in '{}': {}",
            &captures["number"],
            duration_trimmed,
            e
        )
    })?;

    if number == 0 {
        return Err(anyhow::anyhow!(
            "Duration number must be greater than 0, got '{}'",
            duration_trimmed
        ));
    }

    let multiplier = match &captures["unit"] {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        unit => {
            return Err(anyhow::anyhow!(
                "Invalid unit '{}' in duration '{}'. Expected: s, m, h, or d",
                unit,
                duration_trimmed
            ));
        }
    };

    let seconds = number.checked_mul(multiplier).ok_or_else(|| {
        anyhow::anyhow!("Duration '{}' is too large", duration_trimmed)
    })?;

    Ok(Duration::from_secs(seconds))
}
