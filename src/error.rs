//! Error types for the retry executor and the rate limit middleware.
//!
//! Both wrap the caller's own error type without changing it: `Inner(e)` is exactly what
//! the operation (or inner service) produced.
use crate::rate_limit::RateLimitResult;
use std::fmt;

/// Failure returned by [`RetryPolicy::execute`](crate::RetryPolicy::execute).
///
/// Only the final attempt's failure is reported; failures of earlier attempts are logged
/// (or handed to `on_retry`) and then dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryError<E> {
    /// The operation failed; this is its error, untouched.
    Inner(E),
    /// The operation resolved but the success predicate rejected its value.
    PredicateRejected {
        /// Policy name the rejection happened under.
        operation: String,
        /// Attempts made when the rejection was recorded (1-based).
        attempts: usize,
    },
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner(e) => write!(f, "{}", e),
            Self::PredicateRejected { operation, attempts } => write!(
                f,
                "{} returned a result rejected by its success predicate (attempt {})",
                operation, attempts
            ),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::PredicateRejected { .. } => None,
        }
    }
}

impl<E> RetryError<E> {
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }

    pub fn is_predicate_rejected(&self) -> bool {
        matches!(self, Self::PredicateRejected { .. })
    }

    /// Get the operation's own error, if that is what ended the run.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::PredicateRejected { .. } => None,
        }
    }

    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::PredicateRejected { .. } => None,
        }
    }
}

/// Failure returned by [`RateLimitService`](crate::RateLimitService).
#[derive(Debug, Clone, PartialEq)]
pub enum RateLimitError<E> {
    /// Quota for the client key is used up; the request never reached the inner service.
    Limited(RateLimitResult),
    /// The inner service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for RateLimitError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limited(result) => write!(
                f,
                "too many requests (limit {}, resets at {})",
                result.limit, result.reset
            ),
            Self::Inner(e) => write!(f, "{}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RateLimitError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Limited(_) => None,
        }
    }
}

impl<E> RateLimitError<E> {
    pub fn is_limited(&self) -> bool {
        matches!(self, Self::Limited(_))
    }

    /// The rejected check, for building a 429 response.
    pub fn limited(&self) -> Option<&RateLimitResult> {
        match self {
            Self::Limited(result) => Some(result),
            Self::Inner(_) => None,
        }
    }

    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Limited(_) => None,
        }
    }
}
