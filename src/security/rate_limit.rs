//! Per-source fixed-window rate limiting.
//!
//! Each source identifier (the textual peer IP) owns a counter and the instant
//! its current window opened. A request landing at or after `window_start +
//! window` restarts the window; otherwise the counter grows and the request is
//! admitted while `count <= threshold`.
//!
//! The table is a [`DashMap`], so `check` and `sweep` both go through the
//! same per-shard locks and a sweep never races an in-progress update.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::watch;

use crate::config::RateLimitConfig;
use crate::lifecycle::shutdown::stopped;
use crate::observability::metrics;

/// Admission state for one source.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: Instant,
}

impl RateLimitEntry {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
        }
    }

    fn window_elapsed(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request may proceed.
    Admitted {
        /// Requests left in the current window.
        remaining: u32,
    },
    /// Source exceeded its quota for this window.
    Denied {
        /// Time until the window resets.
        retry_after: Duration,
    },
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Fixed-window rate limiter keyed by source identifier.
#[derive(Debug)]
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    threshold: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            threshold,
            window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.threshold, config.window())
    }

    /// Record a request from `source` at `now` and decide whether it proceeds.
    pub fn check(&self, source: &str, now: Instant) -> Admission {
        let mut entry = self
            .entries
            .entry(source.to_owned())
            .or_insert_with(|| RateLimitEntry::new(now));

        if entry.window_elapsed(now, self.window) {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count = entry.count.saturating_add(1);

        if entry.count <= self.threshold {
            Admission::Admitted {
                remaining: self.threshold - entry.count,
            }
        } else {
            let elapsed = now.saturating_duration_since(entry.window_start);
            Admission::Denied {
                retry_after: self.window.saturating_sub(elapsed),
            }
        }
    }

    /// Boolean form of [`RateLimiter::check`].
    pub fn admit(&self, source: &str, now: Instant) -> bool {
        self.check(source, now).is_admitted()
    }

    /// Drop every entry whose window has elapsed. Returns how many were removed.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let stale = entry.window_elapsed(now, self.window);
            if stale {
                removed += 1;
            }
            !stale
        });
        removed
    }

    /// Snapshot of one source's entry.
    pub fn entry(&self, source: &str) -> Option<RateLimitEntry> {
        self.entries.get(source).map(|r| *r.value())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Periodically sweep stale entries until shutdown is signalled.
pub async fn run_sweeper(
    limiter: Arc<RateLimiter>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; nothing can be stale yet.
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = limiter.sweep(Instant::now());
                metrics::record_rate_limit_sweep(removed, limiter.len());
                if removed > 0 {
                    tracing::debug!(removed, remaining = limiter.len(), "Swept stale rate limit entries");
                }
            }
            _ = stopped(&mut shutdown) => {
                tracing::debug!("Rate limit sweeper exiting");
                break;
            }
        }
    }
}
