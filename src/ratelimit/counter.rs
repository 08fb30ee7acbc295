//! Fixed-window hit counter.

use std::time::{Duration, Instant};

/// A hit counter for one `(rule, key)` pair.
///
/// The counter holds no lock of its own; the store serializes access to it
/// through the owning map shard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedWindowCounter {
    /// Hits recorded since `window_start`
    count: u64,
    /// When the current window started
    window_start: Instant,
    /// Length of the window, copied from the owning rule
    window: Duration,
}

impl FixedWindowCounter {
    /// Start a counter holding the first hit of a fresh window.
    pub fn new(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            window_start: now,
            window,
        }
    }

    /// Time spent in the current window.
    ///
    /// An instant earlier than `window_start` counts as no time at all, so a
    /// clock that steps backwards can only keep a window open longer.
    pub fn elapsed(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.window_start)
    }

    /// Whether the window has fully elapsed at `now`.
    pub fn is_expired(&self, now: Instant) -> bool {
        self.elapsed(now) >= self.window
    }

    /// Record one hit and return the new count.
    ///
    /// An expired window is restarted at `now` with the hit as its first.
    pub fn hit(&mut self, now: Instant) -> u64 {
        if self.is_expired(now) {
            self.count = 1;
            self.window_start = now;
        } else {
            self.count = self.count.saturating_add(1);
        }
        self.count
    }

    /// Get the duration until the current window resets.
    pub fn duration_until_reset(&self, now: Instant) -> Duration {
        self.window.saturating_sub(self.elapsed(now))
    }

    /// Whole seconds until reset, rounded up.
    pub fn retry_after_secs(&self, now: Instant) -> u64 {
        ceil_secs(self.duration_until_reset(now))
    }

    /// Get the current count.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// When the current window started.
    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    /// Get the window length.
    pub fn window(&self) -> Duration {
        self.window
    }
}

fn ceil_secs(duration: Duration) -> u64 {
    if duration.subsec_nanos() > 0 {
        duration.as_secs() + 1
    } else {
        duration.as_secs()
    }
}
