//! Shared utility functions used across multiple modules.

use chrono::{DateTime, Utc};

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Canonical phone form: whitespace and dashes removed.
///
/// Returns `None` when nothing is left.
pub fn normalize_phone(value: Option<String>) -> Option<String> {
    let compact: String = value?
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();
    (!compact.is_empty()).then_some(compact)
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Timestamps are stored as Unix microseconds.
pub fn to_storage_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

/// Inverse of [`to_storage_micros`]; out-of-range values clamp to the epoch.
pub fn from_storage_micros(micros: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(micros).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Current time truncated to storage precision.
pub fn storage_now() -> DateTime<Utc> {
    from_storage_micros(to_storage_micros(Utc::now()))
}

/// Stable, non-reversible fingerprint of a user id for log lines.
pub fn user_fingerprint(user_id: &str) -> u64 {
    use std::hash::{Hash, Hasher};

    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    user_id.hash(&mut hasher);
    hasher.finish()
}
