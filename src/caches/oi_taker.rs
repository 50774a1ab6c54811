// Open-interest / taker-volume refresher (§4.6), 30s cadence against REST
// public stats.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::caches::CacheEntry;
use crate::okx::client::OkxClient;

#[derive(Debug, Clone, Copy)]
pub struct OiTakerSnapshot {
    pub open_interest: f64,
    pub taker_buy_volume: f64,
    pub taker_sell_volume: f64,
}

pub const CADENCE: Duration = Duration::from_secs(30);

pub type OiTakerCache = CacheEntry<HashMap<String, OiTakerSnapshot>>;

pub async fn run(client: Arc<OkxClient>, symbols: Vec<String>, ccy: String, cache: Arc<OiTakerCache>) {
    loop {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut snapshot = HashMap::new();
        let mut any_ok = false;

        for symbol in &symbols {
            let oi = client.get_open_interest(symbol).await;
            let taker = client.get_taker_volume(&ccy).await;
            match (oi, taker) {
                (Ok(open_interest), Ok((taker_buy_volume, taker_sell_volume))) => {
                    snapshot.insert(
                        symbol.clone(),
                        OiTakerSnapshot {
                            open_interest,
                            taker_buy_volume,
                            taker_sell_volume,
                        },
                    );
                    any_ok = true;
                }
                (oi, taker) => {
                    if let Err(e) = oi {
                        warn!(symbol, error = %e, "open interest refresh failed");
                    }
                    if let Err(e) = taker {
                        warn!(symbol, error = %e, "taker volume refresh failed");
                    }
                }
            }
        }

        if any_ok {
            cache.set(snapshot, now_ms);
        }
        if cache.is_stale(now_ms) {
            warn!(age_ms = cache.age_ms(now_ms), "oi/taker-volume cache stale");
        }
        tokio::time::sleep(CADENCE).await;
    }
}
