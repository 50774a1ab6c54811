// Stop-order refresher (§4.6), 20s cadence. Tracks live reduce-only limit
// (take-profit) orders and conditional (stop-loss) algo orders per symbol, so
// the orchestrator can cancel the right set before replacing a layer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::caches::CacheEntry;
use crate::okx::client::OkxClient;
use crate::types::PosSide;

pub const CADENCE: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct StopOrder {
    pub order_id: String,
    pub symbol: String,
    pub pos_side: PosSide,
    pub price: f64,
    pub size: f64,
}

#[derive(Debug, Clone, Default)]
pub struct StopOrdersSnapshot {
    pub take_profit: Vec<StopOrder>,
    pub stop_loss: Vec<StopOrder>,
}

pub type StopOrdersCache = CacheEntry<HashMap<String, StopOrdersSnapshot>>;

fn parse_pos_side(raw: &str) -> Option<PosSide> {
    match raw {
        "long" => Some(PosSide::Long),
        "short" => Some(PosSide::Short),
        _ => None,
    }
}

fn parse_limit_order(v: &Value) -> Option<StopOrder> {
    Some(StopOrder {
        order_id: v["ordId"].as_str()?.to_string(),
        symbol: v["instId"].as_str()?.to_string(),
        pos_side: parse_pos_side(v["posSide"].as_str()?)?,
        price: v["px"].as_str()?.parse().ok()?,
        size: v["sz"].as_str()?.parse().ok()?,
    })
}

fn parse_algo_order(v: &Value) -> Option<StopOrder> {
    Some(StopOrder {
        order_id: v["algoId"].as_str()?.to_string(),
        symbol: v["instId"].as_str()?.to_string(),
        pos_side: parse_pos_side(v["posSide"].as_str()?)?,
        price: v["slTriggerPx"].as_str()?.parse().ok()?,
        size: v["sz"].as_str()?.parse().ok()?,
    })
}

pub async fn run(client: Arc<OkxClient>, symbols: Vec<String>, cache: Arc<StopOrdersCache>) {
    loop {
        let now_ms = chrono::Utc::now().timestamp_millis();
        let mut snapshot: HashMap<String, StopOrdersSnapshot> = HashMap::new();
        let mut any_failed = false;

        for symbol in &symbols {
            let tp = match client.get_pending_orders(symbol).await {
                Ok(raw) => raw.iter().filter_map(parse_limit_order).collect::<Vec<_>>(),
                Err(e) => {
                    warn!(symbol, error = %e, "pending TP order refresh failed");
                    any_failed = true;
                    Vec::new()
                }
            };
            let mut sl = match client.get_algo_orders(symbol).await {
                Ok(raw) => raw.iter().filter_map(parse_algo_order).collect::<Vec<_>>(),
                Err(e) => {
                    warn!(symbol, error = %e, "pending SL order refresh failed");
                    any_failed = true;
                    Vec::new()
                }
            };
            let mut tp = tp;
            tp.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));
            sl.sort_by(|a, b| a.price.partial_cmp(&b.price).unwrap_or(std::cmp::Ordering::Equal));

            snapshot.insert(symbol.clone(), StopOrdersSnapshot { take_profit: tp, stop_loss: sl });
        }

        if !any_failed {
            cache.set(snapshot, now_ms);
        }
        if cache.is_stale(now_ms) {
            warn!(age_ms = cache.age_ms(now_ms), "stop orders cache stale");
        }
        tokio::time::sleep(CADENCE).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_limit_and_algo_orders() {
        let limit = serde_json::json!({"ordId":"1","instId":"BTC-USDT-SWAP","posSide":"long","px":"52000","sz":"5"});
        let algo = serde_json::json!({"algoId":"2","instId":"BTC-USDT-SWAP","posSide":"long","slTriggerPx":"48000","sz":"10"});
        assert_eq!(parse_limit_order(&limit).unwrap().price, 52000.0);
        assert_eq!(parse_algo_order(&algo).unwrap().price, 48000.0);
    }
}
