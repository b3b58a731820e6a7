//! Per-credential attempt limiting.
//!
//! Each token hash owns a bucket of attempt timestamps. A check prunes the
//! bucket to the sliding window, rejects if the window is full, and records
//! the attempt otherwise. The prune/count/append sequence runs under the
//! map's entry guard, so two concurrent checks on the same hash can never
//! both take the last slot.
//!
//! Past [`CLEANUP_THRESHOLD`] buckets a check may sweep idle buckets. Sweeps
//! are amortized: one runs when the map has grown by another threshold's
//! worth since the previous sweep, or when that sweep is a full window old.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::Result;
use crate::clock::Clock;
use crate::config::RateLimitConfig;

/// Tracked buckets above which a check triggers [`RateLimiter::cleanup`].
pub const CLEANUP_THRESHOLD: usize = 1000;

/// Attempt history for one token hash
#[derive(Debug)]
struct Bucket {
    /// Attempt timestamps, oldest first
    attempts: VecDeque<DateTime<Utc>>,
    /// Last time `attempts` was pruned
    last_cleanup: DateTime<Utc>,
}

impl Bucket {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            attempts: VecDeque::new(),
            last_cleanup: now,
        }
    }

    /// Drop attempts older than the window start.
    fn prune(&mut self, window_start: DateTime<Utc>, now: DateTime<Utc>) {
        while self.attempts.front().is_some_and(|t| *t < window_start) {
            self.attempts.pop_front();
        }
        self.last_cleanup = now;
    }
}

/// Outcome of the previous sweep
#[derive(Debug)]
struct Sweep {
    remaining: usize,
    at: DateTime<Utc>,
}

/// Sliding-window rate limiter keyed by token hash
pub struct RateLimiter {
    enabled: bool,
    max_attempts: usize,
    window: TimeDelta,
    buckets: DashMap<String, Bucket>,
    last_sweep: Mutex<Sweep>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`](crate::Error::Config) if the limits are out of range.
    pub fn new(config: &RateLimitConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            enabled: config.enabled,
            max_attempts: config.max_attempts as usize,
            window: TimeDelta::seconds(i64::try_from(config.window_seconds).unwrap_or(i64::MAX)),
            buckets: DashMap::new(),
            last_sweep: Mutex::new(Sweep {
                remaining: 0,
                at: clock.now(),
            }),
            clock,
        })
    }

    /// Whether limiting is enabled
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Check and record an attempt for `token_hash`.
    ///
    /// Returns `true` if the attempt is rate limited and must be rejected.
    /// Only admitted attempts are recorded.
    pub fn check_rate_limit(&self, token_hash: &str) -> bool {
        if !self.enabled {
            return false;
        }

        let now = self.clock.now();
        let window_start = now - self.window;

        let limited = {
            let mut bucket = self
                .buckets
                .entry(token_hash.to_string())
                .or_insert_with(|| Bucket::new(now));

            bucket.prune(window_start, now);

            if bucket.attempts.len() >= self.max_attempts {
                true
            } else {
                bucket.attempts.push_back(now);
                false
            }
        };

        if limited {
            warn!(token_hash = %token_hash, max_attempts = self.max_attempts, "Credential rate limited");
            telemetry_metrics::counter!("authguard_rate_limited_total").increment(1);
        }

        if self.buckets.len() > CLEANUP_THRESHOLD {
            self.cleanup_if_due(now);
        }

        limited
    }

    /// Sweep when the map grew past the last sweep by the threshold, or the
    /// last sweep is a window old. Skips if another sweep is running.
    fn cleanup_if_due(&self, now: DateTime<Utc>) {
        let Some(mut last) = self.last_sweep.try_lock() else {
            return;
        };
        let grown = self.buckets.len() > last.remaining.saturating_add(CLEANUP_THRESHOLD);
        let due = now - last.at >= self.window;
        if grown || due {
            self.sweep(now, &mut last);
        }
    }

    /// Evict buckets not pruned within the last window.
    ///
    /// Returns the number of evicted buckets.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now();
        let mut last = self.last_sweep.lock();
        self.sweep(now, &mut last)
    }

    fn sweep(&self, now: DateTime<Utc>, last: &mut Sweep) -> usize {
        let cutoff = now - self.window;
        let before = self.buckets.len();

        self.buckets.retain(|_, bucket| bucket.last_cleanup >= cutoff);

        let remaining = self.buckets.len();
        *last = Sweep { remaining, at: now };

        let removed = before.saturating_sub(remaining);
        if removed > 0 {
            debug!(removed, remaining, "Evicted stale rate limit buckets");
        }
        removed
    }

    /// Number of token hashes currently tracked
    #[must_use]
    pub fn tracked_buckets(&self) -> usize {
        self.buckets.len()
    }
}
