//! Purge scheduling for stale counters.
//!
//! Purging is amortized over `record_hit` calls instead of running on a
//! dedicated task. Every hit bumps a counter; once enough hits or enough time
//! has accumulated, the first caller to win the try-lock runs a pass while
//! everyone else carries on without waiting.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::error::{QuotaGateError, Result};

/// Default number of hits between purge passes.
pub const DEFAULT_PURGE_HIT_COUNT: u64 = 1000;
/// Default maximum time between purge passes.
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// Decides when a purge pass is due and makes sure only one runs at a time.
#[derive(Debug)]
pub struct PurgeScheduler {
    /// Hits after which a pass is due
    hit_threshold: u64,
    /// Time after which a pass is due
    interval: Duration,
    /// Reference point for `last_purge_nanos`
    origin: Instant,
    hits_since_last_purge: AtomicU64,
    /// Nanoseconds from `origin` to the end of the last pass
    last_purge_nanos: AtomicU64,
    running: AtomicBool,
}

impl PurgeScheduler {
    /// Create a scheduler whose first interval starts at `now`.
    ///
    /// Fails if either threshold is zero.
    pub fn new(hit_threshold: u64, interval: Duration, now: Instant) -> Result<Self> {
        if hit_threshold == 0 {
            return Err(QuotaGateError::InvalidPurgeThreshold(
                "hit count must be greater than zero".to_string(),
            ));
        }
        if interval.is_zero() {
            return Err(QuotaGateError::InvalidPurgeThreshold(
                "interval must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            hit_threshold,
            interval,
            origin: now,
            hits_since_last_purge: AtomicU64::new(0),
            last_purge_nanos: AtomicU64::new(0),
            running: AtomicBool::new(false),
        })
    }

    /// Scheduler with the default thresholds.
    pub fn with_defaults(now: Instant) -> Self {
        Self {
            hit_threshold: DEFAULT_PURGE_HIT_COUNT,
            interval: DEFAULT_PURGE_INTERVAL,
            origin: now,
            hits_since_last_purge: AtomicU64::new(0),
            last_purge_nanos: AtomicU64::new(0),
            running: AtomicBool::new(false),
        }
    }

    pub fn hit_threshold(&self) -> u64 {
        self.hit_threshold
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Count one hit towards the next pass and return the running total.
    pub fn record_hit(&self) -> u64 {
        self.hits_since_last_purge.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Hits recorded since the last completed pass.
    pub fn hits_since_last_purge(&self) -> u64 {
        self.hits_since_last_purge.load(Ordering::Relaxed)
    }

    /// Whether either threshold has been reached at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        if self.hits_since_last_purge() >= self.hit_threshold {
            return true;
        }
        let last = self.last_purge_nanos.load(Ordering::Relaxed);
        let since_last = self.offset_nanos(now).saturating_sub(last);
        since_last >= duration_nanos(self.interval)
    }

    /// Claim the right to run a pass.
    ///
    /// Returns `None` without blocking when another pass is in progress.
    pub fn try_begin(&self) -> Option<PurgeGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| PurgeGuard { scheduler: self })
    }

    fn offset_nanos(&self, now: Instant) -> u64 {
        duration_nanos(now.saturating_duration_since(self.origin))
    }
}

fn duration_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}

/// Exclusive right to run a purge pass, released on drop.
#[derive(Debug)]
pub struct PurgeGuard<'a> {
    scheduler: &'a PurgeScheduler,
}

impl PurgeGuard<'_> {
    /// Record a finished pass and start the next interval at `now`.
    pub fn complete(self, now: Instant) {
        let scheduler = self.scheduler;
        scheduler.hits_since_last_purge.store(0, Ordering::Relaxed);
        scheduler
            .last_purge_nanos
            .store(scheduler.offset_nanos(now), Ordering::Relaxed);
    }
}

impl Drop for PurgeGuard<'_> {
    fn drop(&mut self) {
        self.scheduler.running.store(false, Ordering::Release);
    }
}
