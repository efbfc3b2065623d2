//! In-memory fixed-window store.
//!
//! One `Mutex` guards the whole window map, so lookup, rollover, compare and increment
//! for a key happen in a single critical section: concurrent checks on the same key
//! cannot both take the last slot. The lock is never held across an await.
//!
//! Records are created lazily on a key's first check. Without limits configured they live
//! for the store's lifetime; `sweep`, `sweep_interval` and `max_keys` bound the map for
//! long-running processes that see many distinct clients. Both walk an ordered age index
//! from its oldest end, so a new key arriving at the cap costs O(log n) rather than a
//! pass over every tracked client.

use super::{RateLimitResult, RateLimitRule};
use crate::clock::{Clock, SystemClock};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WindowRecord {
    count: u32,
    window_start: u64,
    /// Window length of the most recent check, used to decide expiry when sweeping.
    window_ms: u64,
    /// Tie-breaker for records sharing a timestamp in the age index.
    seq: u64,
}

impl WindowRecord {
    fn fresh(now: u64, window_ms: u64, seq: u64) -> Self {
        Self { count: 0, window_start: now, window_ms, seq }
    }

    fn expires_at(&self) -> u64 {
        self.window_start.saturating_add(self.window_ms)
    }

    fn admit(&mut self, now: u64, limit: u32, window_ms: u64) -> RateLimitResult {
        if now.saturating_sub(self.window_start) >= window_ms {
            self.count = 0;
            self.window_start = now;
        }
        self.window_ms = window_ms;
        let reset = self.window_start.saturating_add(window_ms);

        // Rejections leave the count alone.
        if self.count >= limit {
            return RateLimitResult { success: false, limit, remaining: 0, reset };
        }
        self.count += 1;
        RateLimitResult { success: true, limit, remaining: limit - self.count, reset }
    }
}

/// Records ordered by window start and by expiry, so sweeping and eviction pop from the
/// front instead of scanning the whole map.
///
/// Every record in `Windows::records` has exactly one entry in each map.
#[derive(Debug, Default)]
struct AgeIndex {
    /// `(window_start, seq) -> (expires_at, key)`
    by_start: BTreeMap<(u64, u64), (u64, Arc<str>)>,
    /// `(expires_at, seq) -> (window_start, key)`
    by_expiry: BTreeMap<(u64, u64), (u64, Arc<str>)>,
}

impl AgeIndex {
    fn insert(&mut self, key: Arc<str>, record: &WindowRecord) {
        let expires = record.expires_at();
        self.by_start.insert((record.window_start, record.seq), (expires, key.clone()));
        self.by_expiry.insert((expires, record.seq), (record.window_start, key));
    }

    /// Re-file a record whose window start or length changed.
    fn relocate(&mut self, before: &WindowRecord, after: &WindowRecord) {
        self.by_expiry.remove(&(before.expires_at(), before.seq));
        if let Some((_, key)) = self.by_start.remove(&(before.window_start, before.seq)) {
            self.insert(key, after);
        }
    }

    /// Remove and return the earliest-expiring key if its window has ended by `now`.
    fn pop_expired(&mut self, now: u64) -> Option<Arc<str>> {
        let entry = self.by_expiry.first_entry()?;
        if entry.key().0 > now {
            return None;
        }
        let ((_, seq), (start, key)) = entry.remove_entry();
        self.by_start.remove(&(start, seq));
        Some(key)
    }

    /// Remove and return the key whose window started first.
    fn pop_oldest(&mut self) -> Option<Arc<str>> {
        let ((_, seq), (expires, key)) = self.by_start.pop_first()?;
        self.by_expiry.remove(&(expires, seq));
        Some(key)
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.by_start.len()
    }
}

#[derive(Debug)]
struct Windows {
    records: HashMap<Arc<str>, WindowRecord>,
    ages: AgeIndex,
    next_seq: u64,
    last_sweep: u64,
}

impl Windows {
    fn new(now: u64) -> Self {
        Self { records: HashMap::new(), ages: AgeIndex::default(), next_seq: 0, last_sweep: now }
    }

    fn admit(&mut self, key: &str, now: u64, limit: u32, window_ms: u64) -> RateLimitResult {
        match self.records.get_mut(key) {
            Some(record) => {
                let before = *record;
                let result = record.admit(now, limit, window_ms);
                if before.window_start != record.window_start || before.window_ms != record.window_ms
                {
                    self.ages.relocate(&before, record);
                }
                result
            }
            None => {
                let key: Arc<str> = Arc::from(key);
                let mut record = WindowRecord::fresh(now, window_ms, self.next_seq);
                self.next_seq = self.next_seq.wrapping_add(1);
                let result = record.admit(now, limit, window_ms);
                self.ages.insert(key.clone(), &record);
                self.records.insert(key, record);
                result
            }
        }
    }

    /// Drop every window that has ended by `now`.
    fn sweep(&mut self, now: u64) -> usize {
        let mut swept = 0usize;
        while let Some(key) = self.ages.pop_expired(now) {
            self.records.remove(&key);
            swept += 1;
        }
        self.last_sweep = now;
        swept
    }

    /// Make room for one more key under `max_keys`: drop ended windows first, then the
    /// oldest live ones. Each removal is O(log n).
    fn make_room(&mut self, max_keys: usize, now: u64) {
        let mut expired = 0usize;
        let mut evicted = 0usize;
        while self.records.len() >= max_keys {
            if let Some(key) = self.ages.pop_expired(now) {
                self.records.remove(&key);
                expired += 1;
            } else if let Some(key) = self.ages.pop_oldest() {
                self.records.remove(&key);
                evicted += 1;
            } else {
                break;
            }
        }
        if expired + evicted > 0 {
            debug!(expired, evicted, max_keys, "rate limit key cap reached");
        }
    }
}

/// Errors produced while building a store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreBuildError {
    #[error("max_keys must be > 0")]
    ZeroMaxKeys,
    #[error("sweep_interval must be > 0")]
    ZeroSweepInterval,
}

/// Process-local fixed-window counters keyed by client identity.
///
/// Construct one per process (or per independent limit domain) and share it behind an
/// `Arc`.
#[derive(Debug)]
pub struct RateLimiterStore {
    windows: Mutex<Windows>,
    clock: Arc<dyn Clock>,
    max_keys: Option<usize>,
    sweep_interval_ms: Option<u64>,
}

impl Default for RateLimiterStore {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiterStore {
    /// Store on the system clock with no key cap and no automatic sweeping.
    pub fn new() -> Self {
        Self::from_parts(Arc::new(SystemClock), None, None)
    }

    pub fn builder() -> RateLimiterStoreBuilder {
        RateLimiterStoreBuilder::default()
    }

    fn from_parts(
        clock: Arc<dyn Clock>,
        max_keys: Option<usize>,
        sweep_interval_ms: Option<u64>,
    ) -> Self {
        let now = clock.now_millis();
        Self {
            windows: Mutex::new(Windows::new(now)),
            clock,
            max_keys,
            sweep_interval_ms,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Windows> {
        // Counters stay consistent even if a holder panicked.
        self.windows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Count one request for `key` against `limit` per `window`.
    ///
    /// Resets the key's window once `window` has elapsed since it started. Rejected
    /// requests do not consume quota. Never fails.
    pub fn check(&self, key: &str, limit: u32, window: Duration) -> RateLimitResult {
        let now = self.clock.now_millis();
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);

        let mut guard = self.lock();
        let windows = &mut *guard;

        if let Some(interval) = self.sweep_interval_ms {
            if now.saturating_sub(windows.last_sweep) >= interval {
                let swept = windows.sweep(now);
                if swept > 0 {
                    debug!(swept, remaining_keys = windows.records.len(), "swept expired windows");
                }
            }
        }

        if !windows.records.contains_key(key) {
            if let Some(max_keys) = self.max_keys {
                windows.make_room(max_keys, now);
            }
        }
        let result = windows.admit(key, now, limit, window_ms);
        drop(guard);

        if !result.success {
            debug!(key, limit, reset = result.reset, "rate limit exceeded");
        }
        result
    }

    /// [`check`](Self::check) with the limit and window taken from `rule`.
    pub fn check_rule(&self, key: &str, rule: &RateLimitRule) -> RateLimitResult {
        self.check(key, rule.limit, rule.window)
    }

    /// Drop every window that has expired. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_millis();
        let swept = self.lock().sweep(now);
        if swept > 0 {
            debug!(swept, "swept expired windows");
        }
        swept
    }

    /// Keys currently tracked.
    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Sweep `store` every `every` on the tokio runtime.
    ///
    /// The task holds only a weak reference and exits once the store is dropped.
    pub fn spawn_sweeper(store: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let every = every.max(Duration::from_millis(1));
        let weak: Weak<Self> = Arc::downgrade(store);
        info!(
            every_ms = u64::try_from(every.as_millis()).unwrap_or(u64::MAX),
            "rate limit sweeper started"
        );
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(store) => {
                        store.sweep();
                    }
                    None => break,
                }
            }
        })
    }
}

/// Builder for [`RateLimiterStore`].
#[derive(Debug, Default)]
pub struct RateLimiterStoreBuilder {
    clock: Option<Arc<dyn Clock>>,
    max_keys: Option<usize>,
    sweep_interval: Option<Duration>,
}

impl RateLimiterStoreBuilder {
    /// Time source for window starts and resets. Defaults to [`SystemClock`].
    pub fn clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Some(Arc::new(clock));
        self
    }

    /// Upper bound on tracked keys. A new key arriving at the cap evicts expired windows
    /// first, then the oldest windows.
    pub fn max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = Some(max_keys);
        self
    }

    /// Sweep expired windows during `check` once this much time has passed since the
    /// previous sweep.
    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    pub fn build(self) -> Result<RateLimiterStore, StoreBuildError> {
        if self.max_keys == Some(0) {
            return Err(StoreBuildError::ZeroMaxKeys);
        }
        let sweep_interval_ms = match self.sweep_interval {
            Some(interval) if interval.is_zero() => return Err(StoreBuildError::ZeroSweepInterval),
            Some(interval) => Some(u64::try_from(interval.as_millis()).unwrap_or(u64::MAX).max(1)),
            None => None,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        Ok(RateLimiterStore::from_parts(clock, self.max_keys, sweep_interval_ms))
    }
}
