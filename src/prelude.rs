//! Convenient re-exports for common callguard types.
pub use crate::{
    backoff::{Backoff, BackoffError, MAX_BACKOFF},
    clock::{Clock, ManualClock, SystemClock},
    error::{RateLimitError, RetryError},
    jitter::Jitter,
    rate_limit::{
        client_key, RateLimitLayer, RateLimitResult, RateLimitRule, RateLimiterStore,
        LOOPBACK_CLIENT, UNKNOWN_CLIENT,
    },
    retry::{retry, BuildError, RetryLayer, RetryPolicy, RetryPolicyBuilder},
    sleeper::{Sleeper, TokioSleeper},
};
