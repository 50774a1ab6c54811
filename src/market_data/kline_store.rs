// =============================================================================
// Kline store & backfill — live upsert, startup repair, gap detection/backfill
// =============================================================================
//
// Live path: every inbound kline message upserts by `openTimeMs`. Unconfirmed
// bars are overwritten on every tick; once `confirmed=true` the record is
// frozen (§3 invariant, §8 invariant 3) — `upsert` simply refuses to touch a
// key that is already confirmed.
//
// Gap detection walks the full set of expected bar openings for a timeframe
// over its configured history window and diffs against what's persisted;
// `original_source::_detect_missing_ranges` merges the complement into
// contiguous runs exactly as done here. Backfill then pages the REST history
// endpoint backwards per `original_source::_fetch_and_save_klines`: OKX's
// `after`/`before` convention is inverted from the intuitive direction (see
// SPEC_FULL.md open question 3) — `after` means "older than this timestamp".
// =============================================================================

use std::collections::{BTreeMap, HashMap};

use anyhow::Result;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::okx::client::OkxClient;
use crate::types::{Kline, KlineKey};

const PAGE_SIZE: u32 = 100;

/// Minimal OHLCV bar used by the indicator functions, decoupled from the
/// richer [`Kline`] record (no symbol/timeframe/confirmed bookkeeping).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Millisecond duration of one bar for a timeframe string, e.g. `"5m"`.
pub fn timeframe_ms(timeframe: &str) -> i64 {
    match timeframe {
        "1m" => 60_000,
        "3m" => 3 * 60_000,
        "5m" => 5 * 60_000,
        "15m" => 15 * 60_000,
        "30m" => 30 * 60_000,
        "1H" | "1h" => 3_600_000,
        "4H" | "4h" => 4 * 3_600_000,
        "1D" | "1d" => 86_400_000,
        _ => 60_000,
    }
}

/// Default backfill window (days) per timeframe, per spec §4.3.
pub fn history_days_for(timeframe: &str) -> i64 {
    match timeframe {
        "1m" => 3,
        "5m" => 7,
        "15m" => 15,
        "30m" => 30,
        "1H" | "1h" => 30,
        "4H" | "4h" => 30,
        "1D" | "1d" => 30,
        _ => 7,
    }
}

/// Per-(symbol, timeframe) ordered store of klines plus last-ingest timestamps
/// used by the watchdog for freshness checks.
pub struct KlineStore {
    series: RwLock<HashMap<(String, String), BTreeMap<i64, Kline>>>,
    last_update_ms: RwLock<HashMap<(String, String), i64>>,
}

impl KlineStore {
    pub fn new() -> Self {
        Self {
            series: RwLock::new(HashMap::new()),
            last_update_ms: RwLock::new(HashMap::new()),
        }
    }

    /// Upsert one live kline. Returns `false` (and does nothing) if the key
    /// is already `confirmed=true` — confirmed bars are frozen.
    pub fn upsert(&self, kline: Kline, now_ms: i64) -> bool {
        let key = (kline.symbol.clone(), kline.timeframe.clone());
        let mut series = self.series.write();
        let map = series.entry(key.clone()).or_default();

        if let Some(existing) = map.get(&kline.open_time_ms) {
            if existing.confirmed {
                return false;
            }
        }
        map.insert(kline.open_time_ms, kline);
        self.last_update_ms.write().insert(key, now_ms);
        true
    }

    pub fn last_update_ms(&self, symbol: &str, timeframe: &str) -> Option<i64> {
        self.last_update_ms
            .read()
            .get(&(symbol.to_string(), timeframe.to_string()))
            .copied()
    }

    /// The most recent `n` klines, oldest first.
    pub fn recent(&self, symbol: &str, timeframe: &str, n: usize) -> Vec<Kline> {
        let series = self.series.read();
        match series.get(&(symbol.to_string(), timeframe.to_string())) {
            Some(map) => map.values().rev().take(n).rev().cloned().collect(),
            None => Vec::new(),
        }
    }

    /// Up to the last `n` *confirmed* klines whose open time is `<= at_or_before_ms`.
    /// Used by C10 to gather the 15 confirmed 5m bars ending near a close.
    pub fn confirmed_up_to(&self, symbol: &str, timeframe: &str, at_or_before_ms: i64, n: usize) -> Vec<Kline> {
        let series = self.series.read();
        match series.get(&(symbol.to_string(), timeframe.to_string())) {
            Some(map) => map
                .range(..=at_or_before_ms)
                .rev()
                .filter(|(_, k)| k.confirmed)
                .take(n)
                .map(|(_, k)| k.clone())
                .rev()
                .collect(),
            None => Vec::new(),
        }
    }

    pub fn to_candles(&self, symbol: &str, timeframe: &str, n: usize) -> Vec<Candle> {
        self.recent(symbol, timeframe, n)
            .into_iter()
            .map(|k| Candle {
                open_time_ms: k.open_time_ms,
                open: k.open,
                high: k.high,
                low: k.low,
                close: k.close,
                volume: k.volume,
            })
            .collect()
    }

    /// Keys of all unconfirmed bars whose period has already elapsed as of
    /// `now_ms` — candidates for startup repair.
    pub fn expired_unconfirmed(&self, now_ms: i64) -> Vec<KlineKey> {
        let series = self.series.read();
        let mut out = Vec::new();
        for ((symbol, timeframe), map) in series.iter() {
            let bar_ms = timeframe_ms(timeframe);
            for kline in map.values() {
                if !kline.confirmed && kline.open_time_ms + bar_ms < now_ms {
                    out.push(kline.key());
                }
            }
        }
        out
    }

    /// Overwrite one key with a freshly-fetched, confirmed candle (startup
    /// repair path).
    pub fn repair(&self, kline: Kline, now_ms: i64) {
        let key = (kline.symbol.clone(), kline.timeframe.clone());
        self.series
            .write()
            .entry(key.clone())
            .or_default()
            .insert(kline.open_time_ms, kline);
        self.last_update_ms.write().insert(key, now_ms);
    }

    /// Batch-insert a page of history-fetched candles, skipping any key
    /// already present so repeated backfills over an already-full range
    /// insert zero new rows (§8 idempotence).
    pub fn batch_insert(&self, symbol: &str, timeframe: &str, candles: Vec<Kline>) -> usize {
        let key = (symbol.to_string(), timeframe.to_string());
        let mut series = self.series.write();
        let map = series.entry(key).or_default();
        let mut inserted = 0;
        for c in candles {
            map.entry(c.open_time_ms).or_insert_with(|| {
                inserted += 1;
                c
            });
        }
        inserted
    }

    /// Compute the gaps between `start_ms` and `end_ms` (inclusive, aligned
    /// to `bar_ms` spacing) for a `(symbol, timeframe)` series, merged into
    /// contiguous `[lo, hi]` runs.
    pub fn detect_missing_ranges(
        &self,
        symbol: &str,
        timeframe: &str,
        start_ms: i64,
        end_ms: i64,
    ) -> Vec<(i64, i64)> {
        let bar_ms = timeframe_ms(timeframe);
        let series = self.series.read();
        let existing = series.get(&(symbol.to_string(), timeframe.to_string()));

        let mut missing = Vec::new();
        let mut ts = start_ms;
        while ts <= end_ms {
            let present = existing.map(|m| m.contains_key(&ts)).unwrap_or(false);
            if !present {
                missing.push(ts);
            }
            ts += bar_ms;
        }

        if missing.is_empty() {
            return Vec::new();
        }

        let mut ranges = Vec::new();
        let mut run_start = missing[0];
        let mut run_end = missing[0];
        for &t in &missing[1..] {
            if t == run_end + bar_ms {
                run_end = t;
            } else {
                ranges.push((run_start, run_end));
                run_start = t;
                run_end = t;
            }
        }
        ranges.push((run_start, run_end));
        ranges
    }
}

impl Default for KlineStore {
    fn default() -> Self {
        Self::new()
    }
}

pub fn raw_to_kline(symbol: &str, timeframe: &str, raw: &crate::okx::ws_types::RawCandle, now_ms: i64) -> Option<Kline> {
    let ts: i64 = raw.0.parse().ok()?;
    Some(Kline {
        symbol: symbol.to_string(),
        timeframe: timeframe.to_string(),
        open_time_ms: ts,
        open: raw.1.parse().ok()?,
        high: raw.2.parse().ok()?,
        low: raw.3.parse().ok()?,
        close: raw.4.parse().ok()?,
        volume: raw.5.parse().ok()?,
        confirmed: raw.8 == "1",
        last_update_ms: now_ms,
    })
}

/// Fetch and overwrite every expired-unconfirmed bar with the exchange's
/// confirmed history record (§4.3 "Startup repair").
pub async fn repair_unconfirmed(client: &OkxClient, store: &KlineStore, now_ms: i64) -> Result<usize> {
    let keys = store.expired_unconfirmed(now_ms);
    if keys.is_empty() {
        info!("no unconfirmed expired klines to repair");
        return Ok(0);
    }
    info!(count = keys.len(), "repairing expired unconfirmed klines");

    let mut fixed = 0;
    for key in keys {
        let bar_ms = timeframe_ms(&key.timeframe);
        let after = key.open_time_ms + bar_ms;
        match client
            .get_history_candles(&key.symbol, &key.timeframe, Some(after), None, 1)
            .await
        {
            Ok(candles) => {
                if let Some(raw) = candles.first() {
                    if let Some(kline) = raw_to_kline(&key.symbol, &key.timeframe, raw, now_ms) {
                        if kline.open_time_ms == key.open_time_ms {
                            store.repair(kline, now_ms);
                            fixed += 1;
                        }
                    }
                }
            }
            Err(e) => warn!(symbol = %key.symbol, timeframe = %key.timeframe, error = %e, "repair fetch failed"),
        }
    }
    Ok(fixed)
}

/// Page REST history backwards over `[t_lo, t_hi]` and batch-insert every
/// returned candle. Stops when a page returns fewer than [`PAGE_SIZE`] bars
/// or the oldest timestamp stops advancing (§4.3, §9 open question 3).
pub async fn backfill_gap(
    client: &OkxClient,
    store: &KlineStore,
    symbol: &str,
    timeframe: &str,
    t_lo: i64,
    t_hi: i64,
    now_ms: i64,
) -> Result<usize> {
    let mut current_after = t_hi;
    let before = t_lo - 1;
    let mut total = 0;

    loop {
        let page = client
            .get_history_candles(symbol, timeframe, Some(current_after), Some(before), PAGE_SIZE)
            .await?;
        if page.is_empty() {
            break;
        }

        let klines: Vec<Kline> = page
            .iter()
            .filter_map(|raw| raw_to_kline(symbol, timeframe, raw, now_ms))
            .collect();
        let inserted = store.batch_insert(symbol, timeframe, klines);
        total += inserted;
        debug!(symbol, timeframe, page_len = page.len(), inserted, "backfill page applied");

        let oldest_ts: i64 = page
            .last()
            .and_then(|r| r.0.parse().ok())
            .unwrap_or(current_after);

        if oldest_ts == current_after {
            break;
        }
        current_after = oldest_ts;

        if page.len() < PAGE_SIZE as usize {
            break;
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kline(symbol: &str, tf: &str, ts: i64, confirmed: bool) -> Kline {
        Kline {
            symbol: symbol.to_string(),
            timeframe: tf.to_string(),
            open_time_ms: ts,
            open: 100.0,
            high: 101.0,
            low: 99.0,
            close: 100.5,
            volume: 10.0,
            confirmed,
            last_update_ms: ts,
        }
    }

    #[test]
    fn confirmed_kline_is_frozen() {
        let store = KlineStore::new();
        assert!(store.upsert(kline("BTC-USDT-SWAP", "1m", 1000, true), 1000));
        let mut later = kline("BTC-USDT-SWAP", "1m", 1000, false);
        later.close = 999.0;
        assert!(!store.upsert(later, 2000));
        assert_eq!(store.recent("BTC-USDT-SWAP", "1m", 1)[0].close, 100.5);
    }

    #[test]
    fn unconfirmed_kline_overwritten_each_tick() {
        let store = KlineStore::new();
        store.upsert(kline("BTC-USDT-SWAP", "1m", 1000, false), 1000);
        let mut update = kline("BTC-USDT-SWAP", "1m", 1000, false);
        update.close = 105.0;
        store.upsert(update, 1500);
        assert_eq!(store.recent("BTC-USDT-SWAP", "1m", 1)[0].close, 105.0);
    }

    #[test]
    fn detect_missing_ranges_merges_contiguous_gaps() {
        let store = KlineStore::new();
        let bar_ms = timeframe_ms("5m");
        let t = 1_000_000 * bar_ms;
        // Persist two bars at t-10m and t-5m; everything else in [t-24h, t] is missing.
        store.upsert(kline("BTC-USDT-SWAP", "5m", t - 2 * bar_ms, true), 0);
        store.upsert(kline("BTC-USDT-SWAP", "5m", t - bar_ms, true), 0);

        let start = t - 24 * 3_600_000;
        let ranges = store.detect_missing_ranges("BTC-USDT-SWAP", "5m", start, t);

        // Expect two runs: before the persisted pair, and the current bar itself.
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].0, start);
        assert_eq!(ranges[0].1, t - 3 * bar_ms);
        assert_eq!(ranges[1], (t, t));
    }

    #[test]
    fn batch_insert_is_idempotent() {
        let store = KlineStore::new();
        let candles = vec![kline("BTC-USDT-SWAP", "1m", 1000, true), kline("BTC-USDT-SWAP", "1m", 2000, true)];
        assert_eq!(store.batch_insert("BTC-USDT-SWAP", "1m", candles.clone()), 2);
        assert_eq!(store.batch_insert("BTC-USDT-SWAP", "1m", candles), 0);
    }

    #[test]
    fn expired_unconfirmed_detects_elapsed_bars() {
        let store = KlineStore::new();
        let bar_ms = timeframe_ms("1m");
        store.upsert(kline("BTC-USDT-SWAP", "1m", 1000, false), 1000);
        let expired = store.expired_unconfirmed(1000 + bar_ms + 1);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].open_time_ms, 1000);
    }
}
