//! Request rate limiting.
//!
//! Provides a [`RateLimiter`] trait and a [`SlidingWindowLimiter`]
//! implementation. Each identifier (normally the client address) keeps the
//! timestamps of its admitted requests inside the trailing window; a request
//! is admitted while fewer than `max` of them are live.
//!
//! # Scope
//!
//! Limiter state lives in process memory. When several server instances run
//! behind a load balancer each one enforces its own limit, so the effective
//! global limit is up to `instances * max` per window. Deployments that need
//! a hard global limit must plug a shared implementation in through
//! [`RateLimiter`].

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;
use tracing::debug;
use tracklog_storage::unix_millis;

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    /// The request was admitted and recorded.
    Allowed {
        /// Requests still admissible in the current window.
        remaining: u32,
    },
    /// The request was refused and not recorded.
    Limited {
        /// Unix milliseconds at which the next request will be admitted.
        reset_at: u64,
    },
}

impl RateDecision {
    /// Returns true if the request was admitted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateDecision::Allowed { .. })
    }
}

/// A pluggable admission policy.
pub trait RateLimiter: Send + Sync {
    /// Decides whether `identifier` may make a request at `now_ms`.
    fn check_at(&self, identifier: &str, window: Duration, max: u32, now_ms: u64)
        -> RateDecision;

    /// Decides whether `identifier` may make a request now.
    fn check(&self, identifier: &str, window: Duration, max: u32) -> RateDecision {
        self.check_at(identifier, window, max, unix_millis())
    }

    /// Drops identifiers with no live timestamps. Returns how many were removed.
    fn prune_idle(&self, _window: Duration, _now_ms: u64) -> usize {
        0
    }

    /// Forgets every identifier.
    fn clear(&self) {}
}

/// In-process sliding-window limiter.
#[derive(Default)]
pub struct SlidingWindowLimiter {
    windows: Mutex<HashMap<String, VecDeque<u64>>>,
}

impl fmt::Debug for SlidingWindowLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlidingWindowLimiter")
            .field("tracked", &self.windows.lock().len())
            .finish()
    }
}

impl SlidingWindowLimiter {
    /// Creates an empty limiter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of identifiers with recorded requests.
    pub fn tracked_identifiers(&self) -> usize {
        self.windows.lock().len()
    }
}

/// Removes timestamps that fell out of the window ending at `now_ms`.
///
/// A timestamp exactly `window` old is expired.
fn evict(timestamps: &mut VecDeque<u64>, window_ms: u64, now_ms: u64) {
    while let Some(&oldest) = timestamps.front() {
        if oldest.saturating_add(window_ms) <= now_ms {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}

impl RateLimiter for SlidingWindowLimiter {
    fn check_at(
        &self,
        identifier: &str,
        window: Duration,
        max: u32,
        now_ms: u64,
    ) -> RateDecision {
        let window_ms = window.as_millis() as u64;
        let mut windows = self.windows.lock();
        let timestamps = windows.entry(identifier.to_string()).or_default();
        evict(timestamps, window_ms, now_ms);

        if timestamps.len() >= max as usize {
            let reset_at = timestamps
                .front()
                .map_or(now_ms, |&earliest| earliest)
                .saturating_add(window_ms);
            debug!(identifier, reset_at, "rate limit exceeded");
            return RateDecision::Limited { reset_at };
        }

        // Keep the queue ordered even if the clock steps back.
        let stamp = timestamps.back().map_or(now_ms, |&last| last.max(now_ms));
        timestamps.push_back(stamp);
        RateDecision::Allowed {
            remaining: max.saturating_sub(timestamps.len() as u32),
        }
    }

    fn prune_idle(&self, window: Duration, now_ms: u64) -> usize {
        let window_ms = window.as_millis() as u64;
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, timestamps| {
            evict(timestamps, window_ms, now_ms);
            !timestamps.is_empty()
        });
        before - windows.len()
    }

    fn clear(&self) {
        self.windows.lock().clear();
    }
}
