//! Live-updatable configuration cells.
//!
//! Readers take a cheap `Arc` snapshot through `ArcSwap`; writers replace the value
//! wholesale. The rate limit middleware keeps its rule in one of these so limits can be
//! tuned without rebuilding the service stack.

use arc_swap::ArcSwap;
use std::sync::Arc;

/// Shared configuration value. Clones observe the same updates.
#[derive(Debug)]
pub struct DynamicConfig<T> {
    inner: Arc<ArcSwap<T>>,
}

impl<T> Clone for DynamicConfig<T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone() }
    }
}

impl<T> DynamicConfig<T> {
    pub fn new(value: T) -> Self {
        Self { inner: Arc::new(ArcSwap::from_pointee(value)) }
    }

    /// Snapshot the current value.
    pub fn get(&self) -> Arc<T> {
        self.inner.load_full()
    }

    pub fn set(&self, value: T) {
        self.inner.store(Arc::new(value));
    }

    /// Replace the value with `f(current)`.
    pub fn update<F>(&self, f: F)
    where
        F: Fn(&T) -> T,
    {
        self.inner.rcu(|cur| f(cur));
    }
}

#[cfg(test)]
mod tests {
    use super::DynamicConfig;
    use crate::RateLimitRule;

    #[test]
    fn clones_share_updates() {
        let rule = DynamicConfig::new(RateLimitRule::per_minute(10));
        let view = rule.clone();
        rule.set(RateLimitRule::per_minute(3));
        assert_eq!(view.get().limit, 3);
        view.update(|r| RateLimitRule::new(r.limit * 2, r.window));
        assert_eq!(*rule.get(), RateLimitRule::per_minute(6));
    }
}
