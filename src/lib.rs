#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # callguard
//!
//! The two guards every request handler in a small web backend leans on:
//!
//! - **Retry with exponential backoff** around a single unreliable outbound step
//!   (an upstream fetch, a sandboxed extraction command, a job poll), with an optional
//!   success predicate for calls that "work" but return an unusable result.
//! - **Fixed-window rate limiting** keyed by client identity, checked at the door before
//!   any work is done.
//!
//! The two are independent leaves: neither knows about the other.
//!
//! ## Quick Start
//!
//! ```rust
//! use callguard::{RateLimiterStore, RetryPolicy};
//! use std::time::Duration;
//!
//! #[derive(Debug)]
//! struct Upstream;
//! impl std::fmt::Display for Upstream {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { write!(f, "upstream down") }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiterStore::new();
//!     let gate = limiter.check("203.0.113.7", 10, Duration::from_secs(60));
//!     assert!(gate.success);
//!
//!     let policy = RetryPolicy::<&str, Upstream>::builder()
//!         .max_retries(3)
//!         .initial_delay(Duration::from_millis(10))
//!         .name("upstream-fetch")
//!         .build()
//!         .unwrap();
//!
//!     let body = policy.execute(|| async { Ok::<_, Upstream>("payload") }).await;
//!     assert_eq!(body.unwrap(), "payload");
//! }
//! ```

pub mod adaptive;
pub mod backoff;
pub mod clock;
pub mod error;
pub mod jitter;
pub mod prelude;
pub mod presets;
pub mod rate_limit;
pub mod retry;
pub mod sleeper;

// Re-exports
pub use adaptive::DynamicConfig;
pub use backoff::{Backoff, BackoffError, MAX_BACKOFF};
pub use clock::{Clock, ManualClock, MonotonicClock, SystemClock};
pub use error::RetryError;
pub use jitter::Jitter;
pub use rate_limit::{
    client_key, RateLimitError, RateLimitLayer, RateLimitResult, RateLimitRule, RateLimitService,
    RateLimiterStore, RateLimiterStoreBuilder, StoreBuildError, LOOPBACK_CLIENT, UNKNOWN_CLIENT,
};
pub use retry::{retry, BuildError, RetryLayer, RetryPolicy, RetryPolicyBuilder, RetryService};
pub use sleeper::{InstantSleeper, Sleeper, TokioSleeper, TrackingSleeper};
