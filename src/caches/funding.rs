// Funding-rate refresher (§4.6), 20s cadence against REST public funding.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::caches::CacheEntry;
use crate::okx::client::OkxClient;

pub const CADENCE: Duration = Duration::from_secs(20);

pub type FundingCache = CacheEntry<HashMap<String, f64>>;

pub async fn run(client: Arc<OkxClient>, symbols: Vec<String>, cache: Arc<FundingCache>) {
    loop {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut rates = HashMap::new();
        let mut any_ok = false;

        for symbol in &symbols {
            match client.get_funding_rate(symbol).await {
                Ok(rate) => {
                    rates.insert(symbol.clone(), rate);
                    any_ok = true;
                }
                Err(e) => warn!(symbol, error = %e, "funding rate refresh failed"),
            }
        }

        if any_ok {
            cache.set(rates, now_ms);
        }
        if cache.is_stale(now_ms) {
            warn!(age_ms = cache.age_ms(now_ms), "funding rate cache stale");
        }
        tokio::time::sleep(CADENCE).await;
    }
}
