//! Concurrent counter storage.

use std::fmt;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::{debug, trace};

use super::counter::FixedWindowCounter;
use super::purge::PurgeScheduler;
use super::rules::RuleId;

/// The limit and window a hit is checked against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    pub rule: RuleId,
    pub limit: u64,
    pub window: Duration,
}

/// Counters are namespaced per rule, so two rules extracting the same key
/// never share a count.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    pub rule: RuleId,
    pub key: String,
}

impl CounterKey {
    pub fn new(rule: RuleId, key: &str) -> Self {
        Self {
            rule,
            key: key.to_string(),
        }
    }
}

/// Result of recording a single hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HitOutcome {
    /// Count after this hit
    pub count: u64,
    /// Seconds until the window resets, present only when the limit is exceeded
    pub retry_after_secs: Option<u64>,
}

impl HitOutcome {
    pub fn is_over_limit(&self) -> bool {
        self.retry_after_secs.is_some()
    }
}

/// Sharded map from `(rule, key)` to its fixed-window counter.
///
/// Each update runs under the write lock of the shard owning the key, so
/// concurrent hits on one key are linearized while unrelated keys proceed in
/// parallel. The store also owns the purge schedule and runs purge passes as
/// a side effect of `record_hit`.
pub struct CounterStore {
    counters: DashMap<CounterKey, FixedWindowCounter>,
    purge: PurgeScheduler,
}

impl CounterStore {
    /// Create a store using the given purge schedule.
    pub fn new(purge: PurgeScheduler) -> Self {
        Self {
            counters: DashMap::new(),
            purge,
        }
    }

    /// Record one hit for `key` under `quota` and test it against the limit.
    ///
    /// The hit is counted whether or not it exceeds the limit; recording and
    /// testing happen in the same critical section.
    pub fn record_hit(&self, quota: Quota, key: &str, now: Instant) -> HitOutcome {
        let outcome = {
            let mut created = false;
            let mut counter = self
                .counters
                .entry(CounterKey::new(quota.rule, key))
                .or_insert_with(|| {
                    created = true;
                    FixedWindowCounter::new(now, quota.window)
                });

            let count = if created {
                debug!(
                    rule = %quota.rule,
                    key = %key,
                    limit = quota.limit,
                    window = ?quota.window,
                    "Creating new rate limit counter"
                );
                counter.count()
            } else {
                counter.hit(now)
            };

            let retry_after_secs = (count > quota.limit).then(|| counter.retry_after_secs(now));
            HitOutcome {
                count,
                retry_after_secs,
            }
        };

        trace!(
            rule = %quota.rule,
            key = %key,
            count = outcome.count,
            limit = quota.limit,
            over_limit = outcome.is_over_limit(),
            "Recorded hit"
        );

        // The shard guard is released above; purging takes shard locks itself.
        self.maybe_purge(now);
        outcome
    }

    fn maybe_purge(&self, now: Instant) {
        self.purge.record_hit();
        if !self.purge.is_due(now) {
            return;
        }
        match self.purge.try_begin() {
            Some(guard) => {
                // Another caller may have finished a pass since we checked.
                if self.purge.is_due(now) {
                    let removed = self.evict_expired(now);
                    guard.complete(now);
                    debug!(
                        removed = removed,
                        remaining = self.counters.len(),
                        "Purged expired rate limit counters"
                    );
                }
            }
            None => trace!("Purge already in progress, skipping"),
        }
    }

    /// Run a purge pass immediately and return how many counters it removed.
    ///
    /// Returns 0 without doing anything if a pass is already running.
    pub fn purge(&self, now: Instant) -> usize {
        let Some(guard) = self.purge.try_begin() else {
            return 0;
        };
        let removed = self.evict_expired(now);
        guard.complete(now);
        removed
    }

    /// Remove counters whose window has fully elapsed at `now`.
    ///
    /// Expiry is re-checked under each shard's write lock, so a counter reset
    /// by a concurrent hit is never removed.
    fn evict_expired(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.counters.retain(|_, counter| {
            let keep = !counter.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Count held by a live counter, without recording a hit.
    ///
    /// Returns `None` if the counter does not exist or its window has elapsed.
    pub fn counter_value(&self, rule: RuleId, key: &str, now: Instant) -> Option<u64> {
        self.counters
            .get(&CounterKey::new(rule, key))
            .filter(|counter| !counter.is_expired(now))
            .map(|counter| counter.count())
    }

    /// The purge schedule owned by this store.
    pub fn purge_scheduler(&self) -> &PurgeScheduler {
        &self.purge
    }

    /// Get the number of stored counters, expired or not.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    /// Clear all counters.
    ///
    /// This is primarily useful for testing.
    pub fn clear(&self) {
        self.counters.clear();
    }
}

impl Default for CounterStore {
    fn default() -> Self {
        Self::new(PurgeScheduler::with_defaults(Instant::now()))
    }
}

impl fmt::Debug for CounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CounterStore")
            .field("counters", &self.counters.len())
            .field("purge", &self.purge)
            .finish()
    }
}
