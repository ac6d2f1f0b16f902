//! Parsing utilities for human-readable configuration values

use std::time::Duration;

/// Parse a duration string (e.g., "250ms", "2s", "1m").
///
/// Returns `None` for anything that is not a non-negative integer followed by
/// an optional unit.
///
/// # Supported formats
/// - `"1h"` - hours
/// - `"5m"` - minutes
/// - `"30s"` or `"30"` - seconds
/// - `"100ms"` - milliseconds
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim().to_lowercase();
    let (num_str, multiplier) = if let Some(n) = s.strip_suffix("ms") {
        (n, 1)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60 * 1000)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 60 * 60 * 1000)
    } else {
        (s.as_str(), 1000)
    };

    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
        .map(Duration::from_millis)
}

/// Parse an entry count (e.g., "512", "10k", "1M").
///
/// Suffixes are decimal: `k` = 1 000, `m` = 1 000 000.
pub fn parse_capacity(s: &str) -> Option<usize> {
    let s = s.trim().to_lowercase();
    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('k') {
        (n, 1_000)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 1_000_000)
    } else {
        (s.as_str(), 1)
    };

    num_str
        .trim()
        .parse::<usize>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
}
