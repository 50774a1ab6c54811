// =============================================================================
// Clock synchronisation — median-offset correction against exchange time
// =============================================================================
//
// Local wall-clock time frequently drifts a few hundred ms from the exchange
// server. We sample the server's `/time` endpoint a handful of times, adjust
// each sample for estimated one-way network latency, and take the median
// offset (more robust to one slow round trip than a mean). `corrected_now_ms`
// is then used everywhere a timestamp would otherwise be compared against
// exchange-reported timestamps (gap detection, freshness checks).
// =============================================================================

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, info, warn};

use crate::okx::client::OkxClient;

const SAMPLE_COUNT: usize = 3;
const SAMPLE_DELAY_MS: u64 = 500;

/// Holds the current local-minus-server offset in milliseconds, refreshable
/// at any point after construction.
pub struct TimeSync {
    offset_ms: AtomicI64,
}

impl TimeSync {
    pub fn new() -> Self {
        Self {
            offset_ms: AtomicI64::new(0),
        }
    }

    /// Sample the server's current time `SAMPLE_COUNT` times and update the
    /// stored offset to the median. Leaves the previous offset in place if
    /// every sample fails.
    pub async fn sync(&self, client: &OkxClient) {
        info!("synchronising clock against exchange server time");
        let mut samples = Vec::with_capacity(SAMPLE_COUNT);

        for i in 0..SAMPLE_COUNT {
            let local_before = now_local_ms();
            match client.get_system_time().await {
                Ok(server_ms) => {
                    let local_after = now_local_ms();
                    let network_delay = (local_after - local_before) / 2;
                    let local_adjusted = local_before + network_delay;
                    let offset = local_adjusted - server_ms;
                    debug!(sample = i, local = local_adjusted, server = server_ms, offset, "time sample");
                    samples.push(offset);
                }
                Err(e) => {
                    warn!(error = %e, sample = i, "time sync sample failed");
                }
            }

            if i + 1 < SAMPLE_COUNT {
                tokio::time::sleep(std::time::Duration::from_millis(SAMPLE_DELAY_MS)).await;
            }
        }

        if samples.is_empty() {
            warn!("time sync produced no usable samples, keeping previous offset");
            return;
        }

        samples.sort_unstable();
        let median = samples[samples.len() / 2];
        self.offset_ms.store(median, Ordering::Relaxed);
        info!(
            offset_ms = median,
            "clock sync complete, local is {} {}ms vs server",
            if median > 0 { "ahead of" } else { "behind" },
            median.abs()
        );
    }

    /// Current time adjusted by the stored offset.
    pub fn now_ms(&self) -> i64 {
        now_local_ms() - self.offset_ms.load(Ordering::Relaxed)
    }

    pub fn offset_ms(&self) -> i64 {
        self.offset_ms.load(Ordering::Relaxed)
    }
}

impl Default for TimeSync {
    fn default() -> Self {
        Self::new()
    }
}

fn now_local_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_offset_is_zero() {
        let ts = TimeSync::new();
        assert_eq!(ts.offset_ms(), 0);
    }

    #[test]
    fn now_ms_tracks_local_time_when_offset_zero() {
        let ts = TimeSync::new();
        let before = now_local_ms();
        let corrected = ts.now_ms();
        let after = now_local_ms();
        assert!(corrected >= before && corrected <= after);
    }
}
