//! Ready-made rules and retry policies for the call sites a clinic website backend has.
//!
//! Rate limit rules (per client, fixed one-minute windows):
//! - [`chat_rule`]: AI chat endpoint, 10 per minute.
//! - [`booking_rule`]: appointment submission, 5 per minute.
//! - [`voice_session_rule`]: voice-agent session minting, 10 per minute.
//!
//! Retry builders (tweak further, then `build()`):
//! - [`external_fetch`]: one upstream call, default schedule (3 retries, 1s, doubling).
//! - [`job_poll`]: poll an async job until `ready` says so.
//!
//! ```rust
//! use callguard::presets;
//! use callguard::RateLimiterStore;
//!
//! let store = RateLimiterStore::new();
//! let gate = store.check_rule("198.51.100.4", &presets::booking_rule());
//! assert_eq!(gate.remaining, 4);
//! ```

use crate::retry::RetryPolicyBuilder;
use crate::{RateLimitRule, RetryPolicy};
use std::time::Duration;

const CHAT_PER_MINUTE: u32 = 10;
const BOOKING_PER_MINUTE: u32 = 5;
const VOICE_SESSION_PER_MINUTE: u32 = 10;
const JOB_POLL_RETRIES: usize = 5;

pub const fn chat_rule() -> RateLimitRule {
    RateLimitRule::per_minute(CHAT_PER_MINUTE)
}

pub const fn booking_rule() -> RateLimitRule {
    RateLimitRule::per_minute(BOOKING_PER_MINUTE)
}

pub const fn voice_session_rule() -> RateLimitRule {
    RateLimitRule::per_minute(VOICE_SESSION_PER_MINUTE)
}

/// Single outbound call (upstream HTTP fetch, sandbox command).
pub fn external_fetch<T, E>(name: &str) -> RetryPolicyBuilder<T, E> {
    RetryPolicy::builder().name(name)
}

/// Poll until `ready` accepts the status. A not-ready status is retried like a failure.
pub fn job_poll<T, E, F>(name: &str, ready: F) -> RetryPolicyBuilder<T, E>
where
    F: Fn(&T) -> bool + Send + Sync + 'static,
{
    RetryPolicy::builder()
        .name(name)
        .max_retries(JOB_POLL_RETRIES)
        .initial_delay(Duration::from_secs(1))
        .backoff_factor(2.0)
        .predicate(ready)
}
