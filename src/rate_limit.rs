//! Fixed-window rate limiting keyed by client identity.
//!
//! - [`RateLimiterStore`] (in `store`): the window map plus the `check` operation.
//! - [`client_key`] (in `client`): derives the client key from an `X-Forwarded-For` value.
//! - [`RateLimitLayer`] (in `middleware`): tower middleware that checks before calling the
//!   inner service.
//!
//! A rejected check is a value ([`RateLimitResult::success`] is `false`), never an error,
//! and it does not consume quota.

use std::time::Duration;

pub mod client;
pub mod middleware;
pub mod store;

pub use crate::error::RateLimitError;
pub use client::{client_key, FORWARDED_FOR, LOOPBACK_CLIENT, UNKNOWN_CLIENT};
pub use middleware::{RateLimitLayer, RateLimitService};
pub use store::{RateLimiterStore, RateLimiterStoreBuilder, StoreBuildError};

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";

/// Outcome of a single check. Not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RateLimitResult {
    /// Whether this request is allowed.
    pub success: bool,
    /// The limit that was checked against.
    pub limit: u32,
    /// Requests left in the current window after this check; 0 when rejected.
    pub remaining: u32,
    /// When the current window rolls over, in the store clock's milliseconds.
    pub reset: u64,
}

impl RateLimitResult {
    /// Time until the window rolls over, as seen from `now_millis`.
    pub fn retry_after(&self, now_millis: u64) -> Duration {
        Duration::from_millis(self.reset.saturating_sub(now_millis))
    }

    /// Standard `X-RateLimit-*` response headers.
    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset.to_string()),
        ]
    }
}

/// A limit/window pair, as configured for one call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RateLimitRule {
    /// Requests allowed per window.
    pub limit: u32,
    #[cfg_attr(feature = "serde", serde(rename = "window_ms", with = "window_ms"))]
    pub window: Duration,
}

impl RateLimitRule {
    pub const fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub const fn per_second(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(1))
    }

    pub const fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }
}

impl std::fmt::Display for RateLimitRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} per {:?}", self.limit, self.window)
    }
}

#[cfg(feature = "serde")]
mod window_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(window: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(u64::try_from(window.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
