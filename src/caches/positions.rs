// Open-positions refresher (§4.6), 20s cadence. Diffs against the prior
// snapshot to detect closes: any (symbol, posSide) present before and absent
// now is forwarded as a close notice for the notifier.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::caches::CacheEntry;
use crate::okx::client::OkxClient;
use crate::store::DataStore;
use crate::types::{MarginMode, PosSide, Position};

pub type PositionsCache = CacheEntry<Vec<Position>>;

pub const CADENCE: Duration = Duration::from_secs(20);

#[derive(Debug, Clone)]
pub struct ClosedNotice {
    pub symbol: String,
    pub pos_side: PosSide,
    pub open_time_ms: i64,
}

fn parse_pos_side(raw: &str) -> Option<PosSide> {
    match raw {
        "long" => Some(PosSide::Long),
        "short" => Some(PosSide::Short),
        _ => None,
    }
}

fn parse_margin_mode(raw: &str) -> MarginMode {
    match raw {
        "isolated" => MarginMode::Isolated,
        _ => MarginMode::Cross,
    }
}

pub fn parse_position(v: &Value) -> Option<Position> {
    let symbol = v["instId"].as_str()?.to_string();
    let pos_side = parse_pos_side(v["posSide"].as_str()?)?;
    let size: f64 = v["pos"].as_str()?.parse().ok()?;
    let avg_px: f64 = v["avgPx"].as_str().unwrap_or("0").parse().ok()?;
    let open_time_ms: i64 = v["cTime"].as_str()?.parse().ok()?;
    let leverage: f64 = v["lever"].as_str().unwrap_or("1").parse().unwrap_or(1.0);
    let margin_mode = parse_margin_mode(v["mgnMode"].as_str().unwrap_or("cross"));

    Some(Position {
        symbol,
        pos_side,
        size,
        avg_px,
        open_time_ms,
        leverage,
        margin_mode,
        decisions: Vec::new(),
    })
}

pub async fn run(client: Arc<OkxClient>, store: Arc<dyn DataStore>, cache: Arc<PositionsCache>, closed_tx: mpsc::Sender<ClosedNotice>) {
    let previous: Mutex<HashMap<(String, PosSide), i64>> = Mutex::new(HashMap::new());

    loop {
        let now_ms = chrono::Utc::now().timestamp_millis();
        match client.get_positions(None).await {
            Ok(raw) => {
                let positions: Vec<Position> = raw
                    .iter()
                    .filter_map(parse_position)
                    .filter(|p| p.size != 0.0)
                    .map(|mut p| {
                        p.decisions = store.decisions_for_position(p.pos_id());
                        p
                    })
                    .collect();

                let mut current: HashMap<(String, PosSide), i64> = HashMap::new();
                for p in &positions {
                    current.insert((p.symbol.clone(), p.pos_side), p.open_time_ms);
                }

                let prior = std::mem::replace(&mut *previous.lock(), current.clone());
                for (key, open_time_ms) in prior {
                    if !current.contains_key(&key) {
                        let _ = closed_tx
                            .send(ClosedNotice {
                                symbol: key.0,
                                pos_side: key.1,
                                open_time_ms,
                            })
                            .await;
                    }
                }

                cache.set(positions, now_ms);
            }
            Err(e) => warn!(error = %e, "positions refresh failed"),
        }
        if cache.is_stale(now_ms) {
            warn!(age_ms = cache.age_ms(now_ms), "positions cache stale");
        }
        tokio::time::sleep(CADENCE).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_position_from_okx_json() {
        let raw = serde_json::json!({
            "instId": "BTC-USDT-SWAP",
            "posSide": "long",
            "pos": "2.5",
            "avgPx": "50000.0",
            "cTime": "1700000000000",
            "lever": "10",
            "mgnMode": "cross",
        });
        let pos = parse_position(&raw).unwrap();
        assert_eq!(pos.symbol, "BTC-USDT-SWAP");
        assert_eq!(pos.pos_side, PosSide::Long);
        assert_eq!(pos.size, 2.5);
        assert_eq!(pos.open_time_ms, 1700000000000);
        // `run()` enriches this afterwards via `DataStore::decisions_for_position`
        // (§4.6); the raw parse itself carries none yet.
        assert!(pos.decisions.is_empty());
    }

    #[test]
    fn rejects_missing_fields() {
        let raw = serde_json::json!({ "instId": "BTC-USDT-SWAP" });
        assert!(parse_position(&raw).is_none());
    }
}
