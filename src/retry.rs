//! Retry executor.
//!
//! Runs a fallible async operation up to `max_retries + 1` times with exponential backoff
//! between attempts.
//!
//! Semantics:
//! - Attempt 0 runs immediately. Before attempt `k >= 1` the executor waits
//!   `initial_delay * backoff_factor^(k-1)`; there is never a wait after the last attempt
//!   or after a success.
//! - An optional success predicate turns a resolved-but-unacceptable value into a
//!   retryable failure ([`RetryError::PredicateRejected`]).
//! - Only the final attempt's failure is returned. An operation error comes back as
//!   [`RetryError::Inner`] holding the exact value the operation produced.
//! - Before each wait, `on_retry(attempt, &error, delay)` is called; without a hook a
//!   `tracing` warning is emitted instead.
//!
//! The operation must be safe to run more than once: side effects of failed attempts are
//! neither suppressed nor deduplicated.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use callguard::{RetryError, RetryPolicy};
//!
//! #[derive(Debug)]
//! struct JobStatus { ready: bool }
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let policy = RetryPolicy::<JobStatus, std::io::Error>::builder()
//!     .max_retries(2)
//!     .initial_delay(Duration::from_millis(1))
//!     .name("job-poll")
//!     .predicate(|status| status.ready)
//!     .build()
//!     .unwrap();
//! let result = policy.execute(|| async { Ok(JobStatus { ready: false }) }).await;
//! assert!(matches!(result, Err(RetryError::PredicateRejected { attempts: 3, .. })));
//! # });
//! ```

use crate::{Backoff, BackoffError, Jitter, RetryError, Sleeper, TokioSleeper};
use futures::future::BoxFuture;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tower::ServiceExt;
use tower_layer::Layer;
use tower_service::Service;
use tracing::{debug, warn};

pub const DEFAULT_MAX_RETRIES: usize = 3;
pub const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(1000);
pub const DEFAULT_BACKOFF_FACTOR: f64 = 2.0;
pub const DEFAULT_OPERATION_NAME: &str = "operation";

type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;
type RetryHook<E> = Arc<dyn Fn(usize, &RetryError<E>, Duration) + Send + Sync>;

/// Retry policy: attempt budget, backoff schedule, success predicate and diagnostics hook.
pub struct RetryPolicy<T, E> {
    name: Arc<str>,
    max_retries: usize,
    backoff: Backoff,
    jitter: Jitter,
    predicate: Option<Predicate<T>>,
    on_retry: Option<RetryHook<E>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<T, E> Clone for RetryPolicy<T, E> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            max_retries: self.max_retries,
            backoff: self.backoff.clone(),
            jitter: self.jitter,
            predicate: self.predicate.clone(),
            on_retry: self.on_retry.clone(),
            sleeper: self.sleeper.clone(),
        }
    }
}

impl<T, E> fmt::Debug for RetryPolicy<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("jitter", &self.jitter)
            .field("predicate", &self.predicate.as_ref().map(|_| "<predicate>"))
            .field("on_retry", &self.on_retry.as_ref().map(|_| "<hook>"))
            .field("sleeper", &self.sleeper)
            .finish()
    }
}

impl<T, E> Default for RetryPolicy<T, E> {
    /// 3 retries, 1s initial delay, doubling, no predicate.
    fn default() -> Self {
        Self {
            name: Arc::from(DEFAULT_OPERATION_NAME),
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Backoff::default(),
            jitter: Jitter::None,
            predicate: None,
            on_retry: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }
}

impl<T, E> RetryPolicy<T, E> {
    /// Construct a new builder with defaults.
    pub fn builder() -> RetryPolicyBuilder<T, E> {
        RetryPolicyBuilder::new()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retries after the first attempt; total attempts are one more.
    pub fn max_retries(&self) -> usize {
        self.max_retries
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }
}

impl<T, E> RetryPolicy<T, E>
where
    E: fmt::Display,
{
    /// Execute an async operation with retry semantics.
    pub async fn execute<Fut, Op>(&self, mut operation: Op) -> Result<T, RetryError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        Op: FnMut() -> Fut,
    {
        let mut attempt = 0usize;
        loop {
            let failure = match operation().await {
                Ok(value) => match &self.predicate {
                    Some(accept) if !accept(&value) => {
                        debug!(
                            operation = %self.name,
                            attempt = attempt + 1,
                            "result rejected by success predicate"
                        );
                        RetryError::PredicateRejected {
                            operation: self.name.to_string(),
                            attempts: attempt + 1,
                        }
                    }
                    _ => return Ok(value),
                },
                Err(e) => RetryError::Inner(e),
            };

            if attempt >= self.max_retries {
                warn!(
                    operation = %self.name,
                    attempts = attempt + 1,
                    error = %failure,
                    "retries exhausted"
                );
                return Err(failure);
            }

            // Retry k (1-based) waits initial * factor^(k-1).
            let delay = self.jitter.apply(self.backoff.delay(attempt + 1));
            attempt += 1;

            match &self.on_retry {
                Some(hook) => hook(attempt, &failure, delay),
                None => warn!(
                    operation = %self.name,
                    attempt,
                    max_retries = self.max_retries,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %failure,
                    "attempt failed, retrying"
                ),
            }
            drop(failure);

            self.sleeper.sleep(delay).await;
        }
    }

    /// Wrap a tower service so each request is retried under this policy.
    pub fn into_layer(self) -> RetryLayer<T, E> {
        RetryLayer::new(self)
    }
}

/// Run `operation` under the default policy (3 retries, 1s initial delay, doubling).
pub async fn retry<T, E, Fut, Op>(operation: Op) -> Result<T, RetryError<E>>
where
    E: fmt::Display,
    Fut: Future<Output = Result<T, E>>,
    Op: FnMut() -> Fut,
{
    RetryPolicy::default().execute(operation).await
}

/// Errors produced while building a retry policy.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("backoff_factor must be finite and >= 1 (got {0})")]
    InvalidBackoffFactor(f64),
    #[error("max_delay ({max:?}) must be non-zero and >= initial_delay ({initial:?})")]
    InvalidMaxDelay { initial: Duration, max: Duration },
}

/// Builder for `RetryPolicy`.
pub struct RetryPolicyBuilder<T, E> {
    name: String,
    max_retries: usize,
    initial_delay: Duration,
    backoff_factor: f64,
    max_delay: Option<Duration>,
    jitter: Jitter,
    predicate: Option<Predicate<T>>,
    on_retry: Option<RetryHook<E>>,
    sleeper: Arc<dyn Sleeper>,
}

impl<T, E> RetryPolicyBuilder<T, E> {
    pub fn new() -> Self {
        Self {
            name: DEFAULT_OPERATION_NAME.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            initial_delay: DEFAULT_INITIAL_DELAY,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            max_delay: None,
            jitter: Jitter::None,
            predicate: None,
            on_retry: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Retries after the first attempt. `0` means exactly one attempt.
    pub fn max_retries(mut self, retries: usize) -> Self {
        self.max_retries = retries;
        self
    }

    /// Wait before the first retry.
    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Multiplier applied to the wait after each failed retry. Must be >= 1.
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.backoff_factor = factor;
        self
    }

    /// Upper bound for any single wait.
    pub fn max_delay(mut self, max: Duration) -> Self {
        self.max_delay = Some(max);
        self
    }

    /// Label used in diagnostics only.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Accept a resolved value only if `predicate` returns true; otherwise retry.
    pub fn predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// Called with the 1-based number of the failed attempt, its failure and the upcoming
    /// wait. Replaces the default warning.
    pub fn on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(usize, &RetryError<E>, Duration) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    /// Randomize waits. Off by default.
    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Provide a custom sleeper implementation.
    pub fn with_sleeper<S>(mut self, sleeper: S) -> Self
    where
        S: Sleeper + 'static,
    {
        self.sleeper = Arc::new(sleeper);
        self
    }

    /// Build the retry policy, validating inputs.
    pub fn build(self) -> Result<RetryPolicy<T, E>, BuildError> {
        let mut backoff = Backoff::exponential(self.initial_delay, self.backoff_factor)
            .map_err(|_| BuildError::InvalidBackoffFactor(self.backoff_factor))?;
        if let Some(max) = self.max_delay {
            backoff = backoff.with_max(max).map_err(|e| match e {
                BackoffError::InvalidFactor(f) => BuildError::InvalidBackoffFactor(f),
                _ => BuildError::InvalidMaxDelay { initial: self.initial_delay, max },
            })?;
        }
        Ok(RetryPolicy {
            name: Arc::from(self.name),
            max_retries: self.max_retries,
            backoff,
            jitter: self.jitter,
            predicate: self.predicate,
            on_retry: self.on_retry,
            sleeper: self.sleeper,
        })
    }
}

impl<T, E> Default for RetryPolicyBuilder<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Tower-native retry layer. The predicate sees the inner service's response.
///
/// Backpressure: `RetryService::poll_ready` always reports ready and does not forward
/// the inner service's readiness. Each attempt instead waits for readiness on its own
/// clone of the inner service (via `oneshot`), so a saturated inner service delays the
/// attempt rather than the caller's `ready()`. Put a concurrency limit or load shed
/// layer outside this one if callers need to see backpressure.
pub struct RetryLayer<T, E> {
    policy: RetryPolicy<T, E>,
}

impl<T, E> RetryLayer<T, E> {
    pub fn new(policy: RetryPolicy<T, E>) -> Self {
        Self { policy }
    }
}

impl<T, E> Clone for RetryLayer<T, E> {
    fn clone(&self) -> Self {
        Self { policy: self.policy.clone() }
    }
}

impl<S, T, E> Layer<S> for RetryLayer<T, E> {
    type Service = RetryService<S, T, E>;

    fn layer(&self, service: S) -> Self::Service {
        RetryService { inner: service, policy: self.policy.clone() }
    }
}

/// Retry service produced by `RetryLayer`.
pub struct RetryService<S, T, E> {
    inner: S,
    policy: RetryPolicy<T, E>,
}

impl<S: Clone, T, E> Clone for RetryService<S, T, E> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), policy: self.policy.clone() }
    }
}

impl<S, T, E, Req> Service<Req> for RetryService<S, T, E>
where
    Req: Clone + Send + 'static,
    S: Service<Req, Response = T, Error = E> + Clone + Send + 'static,
    S::Future: Send + 'static,
    T: Send + 'static,
    E: fmt::Display + Send + 'static,
{
    type Response = T;
    type Error = RetryError<E>;
    type Future = BoxFuture<'static, Result<T, RetryError<E>>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        // Every attempt drives readiness on its own clone of the inner service.
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let policy = self.policy.clone();
        let inner = self.inner.clone();
        Box::pin(async move {
            policy
                .execute(move || {
                    let svc = inner.clone();
                    let req = req.clone();
                    async move { svc.oneshot(req).await }
                })
                .await
        })
    }
}
