// =============================================================================
// Background caches (C6) — one refresher task per resource, own cadence
// =============================================================================
//
// Generalizes the `original_source` pattern of one Python thread per
// `update_*_cache` function into one tokio task per cache, all sharing the
// same single-writer/many-reader `CacheEntry` primitive. Each refresher logs
// a warning (never blocks readers) when its own snapshot goes stale past 60s,
// per §4.6.
// =============================================================================

pub mod balance;
pub mod funding;
pub mod historical;
pub mod oi_taker;
pub mod positions;
pub mod stop_orders;

use std::sync::atomic::{AtomicI64, Ordering};

use parking_lot::RwLock;

const STALE_WARN_MS: i64 = 60_000;

/// Single-writer/many-reader cache cell for one background resource.
pub struct CacheEntry<T> {
    value: RwLock<Option<T>>,
    last_update_ms: AtomicI64,
}

impl<T: Clone> CacheEntry<T> {
    pub fn new() -> Self {
        Self {
            value: RwLock::new(None),
            last_update_ms: AtomicI64::new(0),
        }
    }

    pub fn set(&self, value: T, now_ms: i64) {
        *self.value.write() = Some(value);
        self.last_update_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn get(&self) -> Option<T> {
        self.value.read().clone()
    }

    pub fn last_update_ms(&self) -> i64 {
        self.last_update_ms.load(Ordering::Relaxed)
    }

    pub fn age_ms(&self, now_ms: i64) -> Option<i64> {
        let last = self.last_update_ms();
        if last == 0 {
            None
        } else {
            Some(now_ms - last)
        }
    }

    pub fn is_stale(&self, now_ms: i64) -> bool {
        self.age_ms(now_ms).map(|a| a > STALE_WARN_MS).unwrap_or(false)
    }
}

impl<T: Clone> Default for CacheEntry<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_cache_has_no_age_before_first_write() {
        let cache: CacheEntry<i32> = CacheEntry::new();
        assert!(cache.age_ms(1000).is_none());
        assert!(!cache.is_stale(1000));
    }

    #[test]
    fn stale_detection_uses_60s_threshold() {
        let cache = CacheEntry::new();
        cache.set(1, 0);
        assert!(!cache.is_stale(60_000));
        assert!(cache.is_stale(60_001));
    }
}
