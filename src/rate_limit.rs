use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;

use crate::metrics::TRACKED_CALLERS;

// Rate limit entry - tracks requests per caller in the current window
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_at: Instant,
}

/// Outcome of a single quota check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
}

/// Fixed-window request counter keyed by caller identifier.
///
/// State is local to this process. Several running instances each grant
/// their own quota.
pub struct RateLimiter {
    entries: DashMap<String, RateLimitEntry>,
    limit: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            limit,
            window,
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn check(&self, caller: &str) -> RateLimitDecision {
        self.check_at(caller, Instant::now())
    }

    // Same as `check`, with the clock supplied by the caller
    pub fn check_at(&self, caller: &str, now: Instant) -> RateLimitDecision {
        let mut entry = self
            .entries
            .entry(caller.to_string())
            .or_insert(RateLimitEntry {
                count: 0,
                reset_at: now + self.window,
            });

        // new caller, or window expired..? Start a fresh one
        if entry.count == 0 || now > entry.reset_at {
            entry.count = 1;
            entry.reset_at = now + self.window;
            return RateLimitDecision {
                allowed: true,
                remaining: self.limit.saturating_sub(1),
            };
        }

        // under limit.? Allow
        if entry.count < self.limit {
            entry.count += 1;
            return RateLimitDecision {
                allowed: true,
                remaining: self.limit - entry.count,
            };
        }

        RateLimitDecision {
            allowed: false,
            remaining: 0,
        }
    }

    // Drop every entry whose window has already ended
    pub fn purge_expired(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now <= entry.reset_at);
        before - self.entries.len()
    }

    pub fn tracked_callers(&self) -> usize {
        self.entries.len()
    }
}

// Sweeper - runs once per window and forgets callers whose window ended.
// An expired entry would be reset on its next use anyway, so this only
// bounds memory.
pub async fn purge_expired_entries(limiter: Arc<RateLimiter>) {
    let mut interval = interval(limiter.window());

    tracing::info!(window = ?limiter.window(), "Rate limit sweeper started");

    loop {
        interval.tick().await;

        let removed = limiter.purge_expired(Instant::now());
        TRACKED_CALLERS.set(limiter.tracked_callers() as f64);
        if removed > 0 {
            tracing::debug!(removed, "Purged expired rate limit entries");
        }
    }
}
