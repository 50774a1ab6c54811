// Historical-positions refresher (§4.6), 30s cadence. Batch-upserts closed
// rows into the store and forwards any row still missing a review summary to
// the review generator (C10) over a bounded channel — a full channel means
// the review backlog is already being worked, so overflow is simply dropped
// for this tick and retried next cycle.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::caches::CacheEntry;
use crate::okx::client::OkxClient;
use crate::store::DataStore;
use crate::types::{ClosedPosition, PosSide};

pub const CADENCE: Duration = Duration::from_secs(30);

pub type HistoricalCache = CacheEntry<Vec<ClosedPosition>>;

fn parse_pos_side(raw: &str) -> Option<PosSide> {
    match raw {
        "long" => Some(PosSide::Long),
        "short" => Some(PosSide::Short),
        _ => None,
    }
}

pub fn parse_closed_position(v: &Value) -> Option<ClosedPosition> {
    Some(ClosedPosition {
        symbol: v["instId"].as_str()?.to_string(),
        pos_side: parse_pos_side(v["posSide"].as_str()?)?,
        size: v["closeTotalPos"].as_str().unwrap_or("0").parse().ok()?,
        avg_px: v["openAvgPx"].as_str().unwrap_or("0").parse().ok()?,
        open_time_ms: v["cTime"].as_str()?.parse().ok()?,
        close_time_ms: v["uTime"].as_str()?.parse().ok()?,
        exit_px: v["closeAvgPx"].as_str().unwrap_or("0").parse().ok()?,
        realized_pnl: v["pnl"].as_str().unwrap_or("0").parse().unwrap_or(0.0),
        fee_total: v["fee"].as_str().unwrap_or("0").parse().unwrap_or(0.0),
        review_summary: None,
    })
}

pub async fn run(
    client: Arc<OkxClient>,
    store: Arc<dyn DataStore>,
    cache: Arc<HistoricalCache>,
    review_tx: mpsc::Sender<ClosedPosition>,
) {
    loop {
        let now_ms = chrono::Utc::now().timestamp_millis();
        match client.get_positions_history(None).await {
            Ok(raw) => {
                let rows: Vec<ClosedPosition> = raw.iter().filter_map(parse_closed_position).collect();
                for row in &rows {
                    store.save_closed_position(row.clone());
                    if row.review_summary.is_none() {
                        let _ = review_tx.try_send(row.clone());
                    }
                }
                cache.set(rows, now_ms);
            }
            Err(e) => warn!(error = %e, "historical positions refresh failed"),
        }
        if cache.is_stale(now_ms) {
            warn!(age_ms = cache.age_ms(now_ms), "historical positions cache stale");
        }
        tokio::time::sleep(CADENCE).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_closed_position_row() {
        let raw = serde_json::json!({
            "instId": "BTC-USDT-SWAP",
            "posSide": "long",
            "closeTotalPos": "1.0",
            "openAvgPx": "50000",
            "cTime": "1000",
            "uTime": "2000",
            "closeAvgPx": "51000",
            "pnl": "100.0",
            "fee": "-5.0",
        });
        let row = parse_closed_position(&raw).unwrap();
        assert_eq!(row.realized_pnl, 100.0);
        assert_eq!(row.close_time_ms, 2000);
    }
}
