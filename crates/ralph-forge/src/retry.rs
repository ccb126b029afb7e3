// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure retry classification and `Retry-After` parsing, kept free of any
//! transport so the decision logic is exhaustively unit-testable.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Status codes and network-error kinds eligible for retry, per the
/// forge client's retry-classification contract.
pub fn is_retriable_status(status: u16) -> bool {
    matches!(status, 408 | 425 | 429) || (500..600).contains(&status)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkErrorKind {
    Timeout,
    ConnectionReset,
    ConnectionRefused,
    NotFound,
    TemporaryFailure,
    Other,
}

impl NetworkErrorKind {
    pub fn is_retriable(self) -> bool {
        !matches!(self, NetworkErrorKind::Other)
    }
}

/// Classifies a `reqwest::Error` into the ETIMEDOUT/ECONNRESET/etc.
/// bucket the forge client's retry policy distinguishes.
pub fn classify_network_error(err: &reqwest::Error) -> NetworkErrorKind {
    if err.is_timeout() {
        return NetworkErrorKind::Timeout;
    }
    if err.is_connect() {
        return NetworkErrorKind::ConnectionRefused;
    }
    let text = err.to_string().to_lowercase();
    if text.contains("connection reset") {
        NetworkErrorKind::ConnectionReset
    } else if text.contains("not found") || text.contains("notfound") {
        NetworkErrorKind::NotFound
    } else if text.contains("temporary failure") || text.contains("try again") {
        NetworkErrorKind::TemporaryFailure
    } else if err.is_connect() || err.is_request() {
        NetworkErrorKind::ConnectionRefused
    } else {
        NetworkErrorKind::Other
    }
}

/// Parses a `Retry-After` header value, accepting either a delta-seconds
/// integer or an HTTP-date, relative to `now`.
pub fn parse_retry_after(value: &str, now: DateTime<Utc>) -> Option<Duration> {
    let trimmed = value.trim();
    if let Ok(secs) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(secs));
    }
    let parsed = DateTime::parse_from_rfc2822(trimmed).ok()?;
    let target = parsed.with_timezone(&Utc);
    let delta = target.signed_duration_since(now);
    if delta.num_milliseconds() <= 0 {
        Some(Duration::from_secs(0))
    } else {
        Some(Duration::from_millis(delta.num_milliseconds() as u64))
    }
}

/// Capped exponential backoff with full jitter: `rand_in [0, base * 2^attempt]`,
/// clamped to `max`.
pub fn backoff_delay(base: Duration, attempt: u32, max: Duration, jitter: f64) -> Duration {
    let exp = base.as_millis().saturating_mul(1u128 << attempt.min(20));
    let capped = exp.min(max.as_millis());
    let scaled = (capped as f64 * jitter.clamp(0.0, 1.0)) as u128;
    Duration::from_millis(scaled.max(0) as u64)
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
