use chrono::{DateTime, Utc};
use std::time::Duration;

/// How long to wait before proactively refreshing a token that expires at
/// `expires_at`. Zero means "refresh now".
pub fn refresh_delay(now: DateTime<Utc>, expires_at: DateTime<Utc>, threshold: Duration) -> Duration {
    let until_expiry = expires_at - now;
    let threshold =
        chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::days(36_500));
    if until_expiry <= threshold {
        return Duration::ZERO;
    }
    (until_expiry - threshold).to_std().unwrap_or(Duration::ZERO)
}

/// Shortest wait between two proactive refreshes.
pub const MIN_REFRESH_GAP: Duration = Duration::from_secs(30);

/// Delay before the next proactive refresh of a token that was just issued.
/// Unlike [`refresh_delay`] this never asks for an immediate refresh: a
/// lifetime at or under the threshold waits half the lifetime, and never
/// less than [`MIN_REFRESH_GAP`].
pub fn next_refresh_delay(
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    threshold: Duration,
) -> Duration {
    let half_life = (expires_at - now).to_std().unwrap_or(Duration::ZERO) / 2;
    refresh_delay(now, expires_at, threshold)
        .max(half_life)
        .max(MIN_REFRESH_GAP)
}

/// Expiry as stored: epoch milliseconds.
pub fn to_epoch_ms(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub fn from_epoch_ms(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

/// Longest token lifetime taken at face value (one year).
const MAX_LIFETIME_SECS: u64 = 365 * 24 * 3600;

/// `issued_at + expires_in_secs * 1000`.
pub fn expiry_from(issued_at: DateTime<Utc>, expires_in_secs: u64) -> DateTime<Utc> {
    issued_at + chrono::Duration::seconds(expires_in_secs.min(MAX_LIFETIME_SECS) as i64)
}
