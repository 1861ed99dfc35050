//! Rate Limiting
//!
//! Fixed-window admission control per submitter.
//!
//! A window opens on the first admission for a key (or the first after the
//! previous window expired) with a count of 1. Further admissions increment
//! the count until the limit is reached; from then on requests are rejected
//! **without** touching the window, so a client hammering a closed window
//! cannot push its reset time out.
//!
//! State is process-local and advisory: a restart simply forgets every
//! window.
//!
//! ## Usage
//!
//! ```
//! use std::time::Duration;
//! use tokio_genjob::rate_limit::RateLimiter;
//!
//! let limiter = RateLimiter::new(10, Duration::from_secs(60)); // 10 per minute
//!
//! if limiter.admit("user-123") {
//!     // accept the submission
//! } else {
//!     // 429
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Per-submitter fixed-window rate limiter.
///
/// Cheap to clone; clones share the same window table.
#[derive(Clone)]
pub struct RateLimiter {
    inner: Arc<Inner>,
}

struct Inner {
    windows: DashMap<String, Window>,
    max_admissions: usize,
    window: Duration,
}

struct Window {
    count: usize,
    reset_at: Instant,
}

impl RateLimiter {
    /// Create a limiter.
    ///
    /// - `max_admissions`: admissions allowed per window (0 rejects everything)
    /// - `window`: window length
    pub fn new(max_admissions: usize, window: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                windows: DashMap::new(),
                max_admissions,
                window,
            }),
        }
    }

    /// Admit or reject one request for `submitter_id`.
    ///
    /// Returns `true` if admitted, `false` if the current window is full.
    pub fn admit(&self, submitter_id: &str) -> bool {
        let inner = &self.inner;
        if inner.max_admissions == 0 {
            warn!(submitter_id, "rate limit is zero, rejecting");
            return false;
        }

        let now = Instant::now();
        match inner.windows.entry(submitter_id.to_string()) {
            Entry::Vacant(vacant) => {
                vacant.insert(Window {
                    count: 1,
                    reset_at: now + inner.window,
                });
                debug!(submitter_id, count = 1, "rate limit window opened");
                true
            }
            Entry::Occupied(mut occupied) => {
                let window = occupied.get_mut();

                if window.reset_at <= now {
                    window.count = 1;
                    window.reset_at = now + inner.window;
                    debug!(submitter_id, count = 1, "rate limit window reset");
                    return true;
                }

                if window.count >= inner.max_admissions {
                    warn!(
                        submitter_id,
                        count = window.count,
                        limit = inner.max_admissions,
                        "rate limit exceeded"
                    );
                    return false;
                }

                window.count += 1;
                debug!(
                    submitter_id,
                    count = window.count,
                    limit = inner.max_admissions,
                    "rate limit check passed"
                );
                true
            }
        }
    }

    /// Forget the window for `submitter_id`.
    pub fn reset(&self, submitter_id: &str) {
        self.inner.windows.remove(submitter_id);
        debug!(submitter_id, "rate limit reset");
    }

    /// Current usage for `submitter_id`, if it has an open window.
    pub fn usage(&self, submitter_id: &str) -> Option<RateLimitInfo> {
        let inner = &self.inner;
        let now = Instant::now();
        inner.windows.get(submitter_id).and_then(|window| {
            if window.reset_at <= now {
                return None;
            }
            Some(RateLimitInfo {
                used: window.count,
                remaining: inner.max_admissions.saturating_sub(window.count),
                reset_in: window.reset_at.saturating_duration_since(now),
            })
        })
    }

    /// Drop windows that have already expired. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.windows.len();
        self.inner.windows.retain(|_, window| window.reset_at > now);
        before.saturating_sub(self.inner.windows.len())
    }

    /// Number of submitters with a window currently held, expired or not.
    pub fn tracked(&self) -> usize {
        self.inner.windows.len()
    }
}

/// Rate limit information for a submitter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitInfo {
    /// Admissions consumed in the current window.
    pub used: usize,
    /// Admissions still available in the current window.
    pub remaining: usize,
    /// Time until the current window resets.
    pub reset_in: Duration,
}
