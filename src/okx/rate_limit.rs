// =============================================================================
// Rate-Limit Tracker — local accounting against OKX's per-2s endpoint limits
// =============================================================================
//
// Unlike Binance, OKX does not return a running "used weight" header; limits
// are fixed per endpoint (typically N requests per 2 seconds) and the client
// is expected to self-police. We keep local atomic counters reset on a 2 s
// cadence by the caller (see `collector`/`agent` main loops) rather than
// parsing response headers.
// =============================================================================

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::warn;

/// Conservative self-imposed ceiling for general REST calls per 2 s window.
const REQUEST_2S_LIMIT: u32 = 20;
/// OKX's published order-management limit for most perpetual-swap endpoints.
const ORDER_2S_LIMIT: u32 = 60;

/// Thread-safe rate-limit tracker backed by atomic counters, reset on a
/// fixed cadence by the caller rather than by header inspection.
pub struct RateLimitTracker {
    request_count_2s: AtomicU32,
    order_count_2s: AtomicU32,
}

/// Immutable snapshot of the current rate-limit state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSnapshot {
    pub request_count_2s: u32,
    pub order_count_2s: u32,
}

impl RateLimitTracker {
    pub fn new() -> Self {
        Self {
            request_count_2s: AtomicU32::new(0),
            order_count_2s: AtomicU32::new(0),
        }
    }

    /// Return `true` if another general REST request fits under the 2 s cap,
    /// and record it.
    pub fn try_record_request(&self) -> bool {
        let prev = self.request_count_2s.fetch_add(1, Ordering::Relaxed);
        if prev >= REQUEST_2S_LIMIT {
            warn!(count = prev + 1, limit = REQUEST_2S_LIMIT, "request rate-limit exceeded");
            return false;
        }
        true
    }

    /// Return `true` if another order-management call fits under the 2 s cap,
    /// and record it.
    pub fn try_record_order(&self) -> bool {
        let prev = self.order_count_2s.fetch_add(1, Ordering::Relaxed);
        if prev >= ORDER_2S_LIMIT {
            warn!(count = prev + 1, limit = ORDER_2S_LIMIT, "order rate-limit exceeded");
            return false;
        }
        true
    }

    /// Reset both windows; call every 2 s from a background timer.
    pub fn reset_window(&self) {
        self.request_count_2s.store(0, Ordering::Relaxed);
        self.order_count_2s.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RateLimitSnapshot {
        RateLimitSnapshot {
            request_count_2s: self.request_count_2s.load(Ordering::Relaxed),
            order_count_2s: self.order_count_2s.load(Ordering::Relaxed),
        }
    }
}

impl Default for RateLimitTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RateLimitTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimitTracker")
            .field("request_count_2s", &self.request_count_2s.load(Ordering::Relaxed))
            .field("order_count_2s", &self.order_count_2s.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_limit_trips_after_threshold() {
        let tracker = RateLimitTracker::new();
        for _ in 0..REQUEST_2S_LIMIT {
            assert!(tracker.try_record_request());
        }
        assert!(!tracker.try_record_request());
    }

    #[test]
    fn reset_window_clears_counters() {
        let tracker = RateLimitTracker::new();
        tracker.try_record_order();
        tracker.reset_window();
        assert_eq!(tracker.snapshot().order_count_2s, 0);
    }
}
