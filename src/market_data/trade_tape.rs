// =============================================================================
// Trade & pressure tape — ring buffer of prints plus windowed buy/sell pressure
// =============================================================================
//
// Each symbol keeps its own ordered deque of trades, trimmed to a 1-hour
// retention window on every insert (`original_source::_process_trade` keeps an
// in-memory list and prunes by age the same way, rather than capping by
// count). Pressure is computed on demand over the caller's window rather than
// maintained incrementally — windows are short (60/300/900s) and trade volume
// per symbol is low enough that a linear scan per request is cheap, matching
// `original_source::_aggregate_pressure_loop`'s approach of recomputing from
// the buffered prints each cycle instead of keeping a running tally that could
// drift out of sync with the retention trim.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;

use crate::types::{Trade, TradeSide};

const RETENTION_MS: i64 = 3_600_000;

/// Buy/sell volume and count over one lookback window, plus a pressure ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PressureWindow {
    pub window_secs: u32,
    pub buy_volume: f64,
    pub sell_volume: f64,
    pub buy_count: u32,
    pub sell_count: u32,
    pub ratio: f64,
}

fn compute_window(trades: &VecDeque<Trade>, now_ms: i64, window_secs: u32) -> PressureWindow {
    let cutoff = now_ms - window_secs as i64 * 1000;
    let mut buy_volume = 0.0;
    let mut sell_volume = 0.0;
    let mut buy_count = 0;
    let mut sell_count = 0;

    for t in trades.iter().rev() {
        if t.ts_ms < cutoff {
            break;
        }
        match t.side {
            TradeSide::Buy => {
                buy_volume += t.size;
                buy_count += 1;
            }
            TradeSide::Sell => {
                sell_volume += t.size;
                sell_count += 1;
            }
        }
    }

    let ratio = if sell_volume == 0.0 {
        if buy_volume == 0.0 {
            1.0
        } else {
            f64::INFINITY
        }
    } else {
        buy_volume / sell_volume
    };

    PressureWindow {
        window_secs,
        buy_volume,
        sell_volume,
        buy_count,
        sell_count,
        ratio,
    }
}

/// Per-symbol trade tape with duplicate-trade-id suppression and windowed
/// pressure aggregation.
pub struct TradeTape {
    trades: RwLock<HashMap<String, VecDeque<Trade>>>,
}

impl TradeTape {
    pub fn new() -> Self {
        Self {
            trades: RwLock::new(HashMap::new()),
        }
    }

    /// Append one trade, dropping it if its `trade_id` is already the most
    /// recent entry for the symbol (duplicate delivery), then prune anything
    /// older than the retention window.
    pub fn push(&self, trade: Trade, now_ms: i64) {
        let mut map = self.trades.write();
        let deque = map.entry(trade.symbol.clone()).or_default();

        if let Some(last) = deque.back() {
            if last.trade_id == trade.trade_id {
                return;
            }
        }

        deque.push_back(trade);

        let cutoff = now_ms - RETENTION_MS;
        while deque.front().map(|t| t.ts_ms < cutoff).unwrap_or(false) {
            deque.pop_front();
        }
    }

    /// The most recent `n` trades for a symbol, oldest first.
    pub fn recent(&self, symbol: &str, n: usize) -> Vec<Trade> {
        let map = self.trades.read();
        match map.get(symbol) {
            Some(deque) => deque.iter().rev().take(n).rev().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn last_trade_ms(&self, symbol: &str) -> Option<i64> {
        self.trades.read().get(symbol).and_then(|d| d.back()).map(|t| t.ts_ms)
    }

    /// All trades within the last `window_secs` seconds, oldest first. Used
    /// by the feature aggregator's live tick-feature computation.
    pub fn in_window(&self, symbol: &str, now_ms: i64, window_secs: u32) -> Vec<Trade> {
        let map = self.trades.read();
        let cutoff = now_ms - window_secs as i64 * 1000;
        match map.get(symbol) {
            Some(deque) => deque.iter().rev().take_while(|t| t.ts_ms >= cutoff).cloned().collect::<Vec<_>>().into_iter().rev().collect(),
            None => Vec::new(),
        }
    }

    /// Pressure aggregates for `window_secs` (typically 60, 300, 900), or
    /// `None` if the symbol has no trades at all.
    pub fn pressure(&self, symbol: &str, now_ms: i64, window_secs: u32) -> Option<PressureWindow> {
        let map = self.trades.read();
        let deque = map.get(symbol)?;
        if deque.is_empty() {
            return None;
        }
        Some(compute_window(deque, now_ms, window_secs))
    }

    /// Convenience for C7: the standard 60/300/900s triple in one call.
    pub fn pressure_snapshot(&self, symbol: &str, now_ms: i64) -> Vec<PressureWindow> {
        [60, 300, 900]
            .iter()
            .filter_map(|&w| self.pressure(symbol, now_ms, w))
            .collect()
    }
}

impl Default for TradeTape {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(id: &str, ts_ms: i64, size: f64, side: TradeSide) -> Trade {
        Trade {
            symbol: "BTC-USDT-SWAP".to_string(),
            trade_id: id.to_string(),
            ts_ms,
            price: 50_000.0,
            size,
            side,
        }
    }

    #[test]
    fn duplicate_trade_id_is_dropped() {
        let tape = TradeTape::new();
        tape.push(trade("1", 1000, 1.0, TradeSide::Buy), 1000);
        tape.push(trade("1", 1000, 1.0, TradeSide::Buy), 1000);
        assert_eq!(tape.recent("BTC-USDT-SWAP", 10).len(), 1);
    }

    #[test]
    fn retention_window_prunes_old_trades() {
        let tape = TradeTape::new();
        tape.push(trade("1", 0, 1.0, TradeSide::Buy), 0);
        tape.push(trade("2", RETENTION_MS + 1, 1.0, TradeSide::Sell), RETENTION_MS + 1);
        let recent = tape.recent("BTC-USDT-SWAP", 10);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].trade_id, "2");
    }

    #[test]
    fn pressure_ratio_is_buy_over_sell() {
        let tape = TradeTape::new();
        tape.push(trade("1", 1000, 4.0, TradeSide::Buy), 1000);
        tape.push(trade("2", 2000, 2.0, TradeSide::Sell), 2000);
        let p = tape.pressure("BTC-USDT-SWAP", 3000, 60).unwrap();
        assert_eq!(p.buy_volume, 4.0);
        assert_eq!(p.sell_volume, 2.0);
        assert_eq!(p.ratio, 2.0);
    }

    #[test]
    fn pressure_ratio_is_infinite_with_no_sell_volume() {
        let tape = TradeTape::new();
        tape.push(trade("1", 1000, 4.0, TradeSide::Buy), 1000);
        let p = tape.pressure("BTC-USDT-SWAP", 2000, 60).unwrap();
        assert!(p.ratio.is_infinite());
    }

    #[test]
    fn window_excludes_trades_outside_lookback() {
        let tape = TradeTape::new();
        tape.push(trade("1", 0, 1.0, TradeSide::Buy), 0);
        tape.push(trade("2", 60_000, 1.0, TradeSide::Sell), 60_000);
        let p = tape.pressure("BTC-USDT-SWAP", 61_000, 60).unwrap();
        assert_eq!(p.buy_volume, 0.0);
        assert_eq!(p.sell_volume, 1.0);
    }
}
