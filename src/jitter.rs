//! Opt-in jitter for retry delays.
//!
//! Retries wait the exact backoff delay unless a policy opts in here. `Full` and `Equal`
//! spread concurrent retries against the same dependency:
//! - `None`: exact delay (default).
//! - `Full`: uniform in `[0, delay]`.
//! - `Equal`: uniform in `[delay/2, delay]`.
//!
//! RNG: `rand`'s thread-local generator; deterministic generators can be injected via
//! [`Jitter::apply_with_rng`].

use rand::{rng, Rng};
use std::time::Duration;

/// Jitter strategy for randomizing retry delays
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Use the exact backoff delay
    #[default]
    None,
    /// Random between 0 and delay
    Full,
    /// Random between delay/2 and delay
    Equal,
}

impl Jitter {
    /// Apply jitter to a delay duration
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            Jitter::None => delay,
            _ => self.apply_with_rng(delay, &mut rng()),
        }
    }

    /// Apply jitter with a caller-supplied RNG.
    pub fn apply_with_rng<R: Rng>(&self, delay: Duration, rng: &mut R) -> Duration {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(rng.random_range(0..=millis)),
            Jitter::Equal => {
                let half = millis / 2;
                Duration::from_millis(half + rng.random_range(0..=millis - half))
            }
        }
    }
}
