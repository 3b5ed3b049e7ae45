//! Parsing for human-readable durations like "10m", "24h", "7d".

use anyhow::{Context, Result};
use chrono::Duration;

/// Parse a duration string like "7d", "24h", "10m", "60s".
///
/// Supported units:
/// - `d` - days (24 hours)
/// - `h` - hours
/// - `m` - minutes
/// - `s` - seconds
///
/// The input is case-insensitive and whitespace is trimmed.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim().to_lowercase();
    let (num, unit) = if let Some(n) = s.strip_suffix('d') {
        (n, "d")
    } else if let Some(n) = s.strip_suffix('h') {
        (n, "h")
    } else if let Some(n) = s.strip_suffix('m') {
        (n, "m")
    } else if let Some(n) = s.strip_suffix('s') {
        (n, "s")
    } else {
        anyhow::bail!("duration must end with d, h, m, or s");
    };

    let num: i64 = num.parse().context("invalid number in duration")?;
    anyhow::ensure!(num >= 0, "duration must not be negative");

    let secs = match unit {
        "d" => num.checked_mul(24 * 60 * 60),
        "h" => num.checked_mul(60 * 60),
        "m" => num.checked_mul(60),
        _ => Some(num),
    }
    .context("duration is too large")?;

    Ok(Duration::seconds(secs))
}
