// =============================================================================
// Feature aggregator (C7) — on-demand bundle synthesis + freshness gate
// =============================================================================
//
// Pulls from the market-data stores (C2-C4) and the background caches (C6)
// to build the (system prompt, user prompt) pair the decision engine sends
// to the LLM. Nothing here is cached: every call recomputes from the current
// state of the underlying single-writer stores, matching the "on demand"
// framing of the spec rather than maintaining a separately-stale snapshot.
// =============================================================================

use std::sync::Arc;

use crate::caches::balance::BalanceCache;
use crate::caches::funding::FundingCache;
use crate::caches::oi_taker::OiTakerCache;
use crate::caches::positions::PositionsCache;
use crate::indicators::{atr, ema, macd, rsi};
use crate::journal::Journal;
use crate::market_data::kline_store::Candle;
use crate::market_data::{KlineStore, OrderBookStore, TradeTape};
use crate::types::{BalanceInfo, OrderBookView, Position};

const ORDERBOOK_DEPTH: usize = 10;
const TICK_WINDOW_SECS: u32 = 60;
const INDICATOR_LOOKBACK: usize = 120;
const LARGE_TRADE_MULTIPLE: f64 = 2.0;

#[derive(Debug, Clone, Copy, Default)]
pub struct IndicatorSet {
    pub ema20: Option<f64>,
    pub rsi7: Option<f64>,
    pub rsi14: Option<f64>,
    pub macd_hist: Option<f64>,
    pub atr3: Option<f64>,
}

fn compute_indicators(candles: &[Candle]) -> IndicatorSet {
    let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
    IndicatorSet {
        ema20: ema::calculate_ema(&closes, 20).last().copied(),
        rsi7: rsi::current_rsi(&closes, 7).map(|(v, _)| v),
        rsi14: rsi::current_rsi(&closes, 14).map(|(v, _)| v),
        macd_hist: macd::calculate_macd_histogram(&closes),
        atr3: atr::calculate_atr(candles, 3),
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct TickFeatures {
    pub vwap: f64,
    pub buy_sell_imbalance: f64,
    pub price_range: f64,
    pub tick_count: usize,
    pub large_trade_ratio: f64,
}

fn compute_tick_features(trades: &[crate::types::Trade]) -> TickFeatures {
    if trades.is_empty() {
        return TickFeatures::default();
    }

    let tick_count = trades.len();
    let total_size: f64 = trades.iter().map(|t| t.size).sum();
    let vwap = if total_size > 0.0 {
        trades.iter().map(|t| t.price * t.size).sum::<f64>() / total_size
    } else {
        0.0
    };

    let buy_volume: f64 = trades.iter().filter(|t| t.side == crate::types::TradeSide::Buy).map(|t| t.size).sum();
    let sell_volume: f64 = total_size - buy_volume;
    let buy_sell_imbalance = if total_size > 0.0 { (buy_volume - sell_volume) / total_size } else { 0.0 };

    let max_price = trades.iter().map(|t| t.price).fold(f64::MIN, f64::max);
    let min_price = trades.iter().map(|t| t.price).fold(f64::MAX, f64::min);
    let price_range = max_price - min_price;

    let mean_size = total_size / tick_count as f64;
    let large_count = trades.iter().filter(|t| t.size > mean_size * LARGE_TRADE_MULTIPLE).count();
    let large_trade_ratio = large_count as f64 / tick_count as f64;

    TickFeatures {
        vwap,
        buy_sell_imbalance,
        price_range,
        tick_count,
        large_trade_ratio,
    }
}

/// Everything the prompt template needs for one symbol at one instant.
pub struct FeatureBundle {
    pub symbol: String,
    pub short_timeframe: String,
    pub long_timeframe: String,
    pub short_indicators: IndicatorSet,
    pub long_indicators: IndicatorSet,
    pub long_volume_ratio: f64,
    pub short_klines: Vec<Candle>,
    pub long_klines: Vec<Candle>,
    pub book: OrderBookView,
    pub tick_features: TickFeatures,
    pub pressure_60s: Option<crate::market_data::trade_tape::PressureWindow>,
    pub pressure_300s: Option<crate::market_data::trade_tape::PressureWindow>,
    pub pressure_900s: Option<crate::market_data::trade_tape::PressureWindow>,
    pub balance: Option<BalanceInfo>,
    pub positions: Vec<Position>,
    pub funding_rate: Option<f64>,
    pub open_interest: Option<f64>,
    pub recent_decisions: Vec<String>,
}

pub enum FeatureOutcome {
    Bundle(Box<FeatureBundle>),
    Hold { reason: String },
}

pub struct FeatureAggregator {
    pub klines: Arc<KlineStore>,
    pub books: Arc<OrderBookStore>,
    pub trades: Arc<TradeTape>,
    pub balance_cache: Arc<BalanceCache>,
    pub positions_cache: Arc<PositionsCache>,
    pub funding_cache: Arc<FundingCache>,
    pub oi_taker_cache: Arc<OiTakerCache>,
    pub journal: Arc<Journal>,
    pub freshness_threshold_secs: u64,
}

impl FeatureAggregator {
    /// Build the feature bundle for `symbol`, gating on data freshness first.
    pub fn build(&self, symbol: &str, short_tf: &str, long_tf: &str, now_ms: i64) -> FeatureOutcome {
        let threshold_ms = self.freshness_threshold_secs as i64 * 1000;

        let kline_age = self.klines.last_update_ms(symbol, short_tf);
        let book_age = self.books.last_update_ms(symbol);
        let pressure_age = self.trades.last_trade_ms(symbol);

        for (label, last) in [("kline", kline_age), ("orderbook", book_age), ("pressure", pressure_age)] {
            match last {
                Some(ts) if now_ms - ts <= threshold_ms => {}
                Some(ts) => {
                    return FeatureOutcome::Hold {
                        reason: format!("数据滞后 / data lag: {label} age {}ms exceeds {}ms", now_ms - ts, threshold_ms),
                    }
                }
                None => {
                    return FeatureOutcome::Hold {
                        reason: format!("数据滞后 / data lag: no {label} data available"),
                    }
                }
            }
        }

        let Some(book) = self.books.view(symbol, ORDERBOOK_DEPTH) else {
            return FeatureOutcome::Hold {
                reason: "数据滞后 / data lag: order book not initialized".to_string(),
            };
        };

        let short_klines = self.klines.to_candles(symbol, short_tf, INDICATOR_LOOKBACK);
        let long_klines = self.klines.to_candles(symbol, long_tf, INDICATOR_LOOKBACK);
        let short_indicators = compute_indicators(&short_klines);
        let long_indicators = compute_indicators(&long_klines);

        let long_volume_ratio = {
            let n = long_klines.len();
            if n >= 2 {
                let last = long_klines[n - 1].volume;
                let prior_avg: f64 = long_klines[..n - 1].iter().map(|c| c.volume).sum::<f64>() / (n - 1) as f64;
                if prior_avg > 0.0 {
                    last / prior_avg
                } else {
                    1.0
                }
            } else {
                1.0
            }
        };

        let window_trades = self.trades.in_window(symbol, now_ms, TICK_WINDOW_SECS);
        let tick_features = compute_tick_features(&window_trades);
        let pressure_60s = self.trades.pressure(symbol, now_ms, 60);
        let pressure_300s = self.trades.pressure(symbol, now_ms, 300);
        let pressure_900s = self.trades.pressure(symbol, now_ms, 900);

        let balance = self.balance_cache.get();
        let positions = self
            .positions_cache
            .get()
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.symbol == symbol)
            .collect();
        let funding_rate = self.funding_cache.get().and_then(|m| m.get(symbol).copied());
        let open_interest = self.oi_taker_cache.get().and_then(|m| m.get(symbol).map(|s| s.open_interest));

        let recent_decisions = self.journal.recent_summaries();

        FeatureOutcome::Bundle(Box::new(FeatureBundle {
            symbol: symbol.to_string(),
            short_timeframe: short_tf.to_string(),
            long_timeframe: long_tf.to_string(),
            short_indicators,
            long_indicators,
            long_volume_ratio,
            short_klines,
            long_klines,
            book,
            tick_features,
            pressure_60s,
            pressure_300s,
            pressure_900s,
            balance,
            positions,
            funding_rate,
            open_interest,
            recent_decisions,
        }))
    }
}

/// Render the bundle into the (system prompt, user prompt) pair sent to the LLM.
pub fn render_prompt(bundle: &FeatureBundle) -> (String, String) {
    let system = format!(
        "You are an autonomous perpetual-swap trading analyst for {}. \
         Respond with a single JSON object containing signal, confidence, size, \
         adjust_data, holding_time and reason. Never include prose outside the JSON object.",
        bundle.symbol
    );

    let user = format!(
        "symbol={} short_tf={} long_tf={}\n\
         short_indicators={:?}\n\
         long_indicators={:?} long_volume_ratio={:.3}\n\
         tick_features_60s={:?}\n\
         pressure_60s={:?} pressure_300s={:?} pressure_900s={:?}\n\
         book_bid1={:?} book_ask1={:?}\n\
         balance={:?}\n\
         open_positions={}\n\
         funding_rate={:?} open_interest={:?}\n\
         recent_decisions={:?}",
        bundle.symbol,
        bundle.short_timeframe,
        bundle.long_timeframe,
        bundle.short_indicators,
        bundle.long_indicators,
        bundle.long_volume_ratio,
        bundle.tick_features,
        bundle.pressure_60s,
        bundle.pressure_300s,
        bundle.pressure_900s,
        bundle.book.bids.first().map(|l| l.price),
        bundle.book.asks.first().map(|l| l.price),
        bundle.balance,
        bundle.positions.len(),
        bundle.funding_rate,
        bundle.open_interest,
        bundle.recent_decisions,
    );

    (system, user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Trade, TradeSide};

    fn trade(price: f64, size: f64, side: TradeSide) -> Trade {
        Trade {
            symbol: "BTC-USDT-SWAP".to_string(),
            trade_id: "1".to_string(),
            ts_ms: 0,
            price,
            size,
            side,
        }
    }

    #[test]
    fn tick_features_empty_is_default() {
        let features = compute_tick_features(&[]);
        assert_eq!(features.tick_count, 0);
        assert_eq!(features.vwap, 0.0);
    }

    #[test]
    fn vwap_is_size_weighted() {
        let trades = vec![trade(100.0, 1.0, TradeSide::Buy), trade(200.0, 3.0, TradeSide::Sell)];
        let features = compute_tick_features(&trades);
        assert!((features.vwap - 175.0).abs() < 1e-9);
    }

    #[test]
    fn large_trade_ratio_flags_outliers() {
        let trades = vec![
            trade(100.0, 1.0, TradeSide::Buy),
            trade(100.0, 1.0, TradeSide::Buy),
            trade(100.0, 10.0, TradeSide::Sell),
        ];
        let features = compute_tick_features(&trades);
        assert!(features.large_trade_ratio > 0.0);
    }
}
