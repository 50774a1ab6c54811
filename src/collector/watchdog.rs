// =============================================================================
// Freshness watchdog — per-source staleness check with an early-warning band
// =============================================================================
//
// Runs every 30s against the book/kline/trade stores' own `last_update_ms`
// bookkeeping. A source older than `dataTimeoutSeconds` trips a restart; one
// crossing 70% of that threshold first gets a single warning log so operators
// see degradation before the hard restart fires, per
// `original_source::_monitor_status`'s early-warning behavior.
// =============================================================================

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::warn;

use crate::collector::session::CollectorHandles;

pub struct Watchdog {
    handles: Arc<CollectorHandles>,
    symbols: Vec<String>,
    timeframes: Vec<String>,
    data_timeout_secs: u64,
    warned: RwLock<HashSet<String>>,
}

impl Watchdog {
    pub fn new(handles: Arc<CollectorHandles>, symbols: Vec<String>, timeframes: Vec<String>, data_timeout_secs: u64) -> Self {
        Self {
            handles,
            symbols,
            timeframes,
            data_timeout_secs,
            warned: RwLock::new(HashSet::new()),
        }
    }

    /// Evaluate all sources at `now_ms`, returning `true` if a restart is
    /// required (strictly exceeding the hard threshold).
    pub fn check(&self, now_ms: i64) -> bool {
        let threshold_ms = self.data_timeout_secs as i64 * 1000;
        let warn_ms = (threshold_ms as f64 * 0.7) as i64;
        let mut need_restart = false;

        for symbol in &self.symbols {
            if let Some(last) = self.handles.books.last_update_ms(symbol) {
                self.evaluate(&format!("book:{symbol}"), now_ms - last, threshold_ms, warn_ms, &mut need_restart);
            }
            if let Some(last) = self.handles.trades.last_trade_ms(symbol) {
                self.evaluate(&format!("trade:{symbol}"), now_ms - last, threshold_ms, warn_ms, &mut need_restart);
            }
            for tf in &self.timeframes {
                if let Some(last) = self.handles.klines.last_update_ms(symbol, tf) {
                    self.evaluate(&format!("kline:{symbol}:{tf}"), now_ms - last, threshold_ms, warn_ms, &mut need_restart);
                }
            }
        }

        need_restart
    }

    fn evaluate(&self, source: &str, age_ms: i64, threshold_ms: i64, warn_ms: i64, need_restart: &mut bool) {
        if age_ms > threshold_ms {
            warn!(source, age_ms, threshold_ms, "data source stale, restart required");
            *need_restart = true;
            return;
        }
        if age_ms > warn_ms {
            if self.warned.write().insert(source.to_string()) {
                warn!(source, age_ms, warn_ms, "data source approaching staleness threshold");
            }
        } else {
            self.warned.write().remove(source);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::{KlineStore, OrderBookStore, TradeTape};
    use crate::time_sync::TimeSync;

    fn handles() -> Arc<CollectorHandles> {
        Arc::new(CollectorHandles {
            books: Arc::new(OrderBookStore::new()),
            klines: Arc::new(KlineStore::new()),
            trades: Arc::new(TradeTape::new()),
            time_sync: Arc::new(TimeSync::new()),
        })
    }

    #[test]
    fn boundary_age_exactly_at_threshold_is_fresh() {
        let h = handles();
        h.trades.push(
            crate::types::Trade {
                symbol: "BTC-USDT-SWAP".to_string(),
                trade_id: "1".to_string(),
                ts_ms: 0,
                price: 1.0,
                size: 1.0,
                side: crate::types::TradeSide::Buy,
            },
            0,
        );
        let wd = Watchdog::new(h, vec!["BTC-USDT-SWAP".to_string()], vec![], 120);
        assert!(!wd.check(120_000));
        assert!(wd.check(120_001));
    }

    #[test]
    fn no_data_sources_never_requires_restart() {
        let h = handles();
        let wd = Watchdog::new(h, vec!["BTC-USDT-SWAP".to_string()], vec!["5m".to_string()], 120);
        assert!(!wd.check(1_000_000));
    }
}
