//! Backoff schedule for retry policies.
//!
//! Attempt semantics: attempt index `0` is the initial call (no delay); retries start at
//! `attempt = 1`, which waits exactly the initial delay. Each further retry multiplies the
//! previous wait by the factor, so retry `k` waits `initial * factor^(k-1)`.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use callguard::Backoff;
//!
//! let backoff = Backoff::exponential(Duration::from_millis(100), 2.0)
//!     .unwrap()
//!     .with_max(Duration::from_secs(1))
//!     .unwrap();
//! assert_eq!(backoff.delay(0), Duration::ZERO); // initial call
//! assert_eq!(backoff.delay(1), Duration::from_millis(100));
//! assert_eq!(backoff.delay(3), Duration::from_millis(400));
//! assert_eq!(backoff.delay(6), Duration::from_secs(1)); // capped
//! ```
//!
//! Overflow behavior: a delay that would not fit saturates to [`MAX_BACKOFF`] (1 day).

use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackoffError {
    /// Factor must be a finite number no smaller than 1.
    #[error("backoff factor must be finite and >= 1 (got {0})")]
    InvalidFactor(f64),
    #[error("max must be greater than zero")]
    MaxMustBePositive,
    #[error("max ({max:?}) must be >= base ({base:?})")]
    MaxLessThanBase { base: Duration, max: Duration },
}

/// Geometric delay schedule with an optional cap.
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    base: Duration,
    factor: f64,
    max: Option<Duration>,
}

impl Backoff {
    /// Exponential schedule starting at `base` and growing by `factor` per retry.
    pub fn exponential(base: Duration, factor: f64) -> Result<Self, BackoffError> {
        if !factor.is_finite() || factor < 1.0 {
            return Err(BackoffError::InvalidFactor(factor));
        }
        Ok(Self { base, factor, max: None })
    }

    /// Same delay before every retry.
    pub fn constant(delay: Duration) -> Self {
        Self { base: delay, factor: 1.0, max: None }
    }

    /// Cap every delay at `max`. `max` must be non-zero and not below the base delay.
    pub fn with_max(mut self, max: Duration) -> Result<Self, BackoffError> {
        if max.is_zero() {
            return Err(BackoffError::MaxMustBePositive);
        }
        if max < self.base {
            return Err(BackoffError::MaxLessThanBase { base: self.base, max });
        }
        self.max = Some(max);
        Ok(self)
    }

    /// Delay before the first retry.
    pub fn base(&self) -> Duration {
        self.base
    }

    /// Growth factor between consecutive retries.
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Configured cap, if any.
    pub fn max(&self) -> Option<Duration> {
        self.max
    }

    /// Calculate the delay for a given attempt number (0 = initial call, no delay).
    pub fn delay(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let scaled = self.base.as_nanos() as f64 * self.factor.powi(exponent);
        let raw = if !scaled.is_finite() || scaled >= MAX_BACKOFF.as_nanos() as f64 {
            MAX_BACKOFF
        } else {
            Duration::from_nanos(scaled.round() as u64)
        };
        let capped = self.max.map(|m| raw.min(m)).unwrap_or(raw);
        capped.min(MAX_BACKOFF)
    }
}

impl Default for Backoff {
    /// One second, doubling.
    fn default() -> Self {
        Self { base: Duration::from_secs(1), factor: 2.0, max: None }
    }
}
