// Available-balance refresher (§4.6), 30s cadence against REST account balance.

use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::caches::CacheEntry;
use crate::okx::client::OkxClient;
use crate::types::BalanceInfo;

pub type BalanceCache = CacheEntry<BalanceInfo>;

pub const CADENCE: Duration = Duration::from_secs(30);

pub async fn run(client: Arc<OkxClient>, ccy: String, cache: Arc<BalanceCache>) {
    loop {
        let now_ms = chrono::Utc::now().timestamp_millis();
        match client.get_balance(&ccy).await {
            Ok(available_equity) => cache.set(
                BalanceInfo {
                    asset: ccy.clone(),
                    available_equity,
                },
                now_ms,
            ),
            Err(e) => warn!(error = %e, "balance refresh failed"),
        }
        if cache.is_stale(now_ms) {
            warn!(age_ms = cache.age_ms(now_ms), "balance cache stale");
        }
        tokio::time::sleep(CADENCE).await;
    }
}
