// =============================================================================
// Shared data model — klines, trades, order book levels, positions, decisions
// =============================================================================
//
// Every inbound JSON (exchange WS/REST, LLM response) is decoded into one of
// these typed records with explicit optional fields rather than passed around
// as a loose `serde_json::Value`. `AdjustData.size == None` at parse time
// means "fill in from position size at apply time" (§9 design note).
// =============================================================================

use serde::{Deserialize, Serialize};

/// Whether we are running against real funds or the exchange's demo/paper
/// environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountMode {
    Demo,
    Live,
}

impl Default for AccountMode {
    fn default() -> Self {
        Self::Demo
    }
}

impl std::fmt::Display for AccountMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Demo => write!(f, "Demo"),
            Self::Live => write!(f, "Live"),
        }
    }
}

/// Balance snapshot for the account's settlement asset (USDT).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceInfo {
    pub asset: String,
    #[serde(default)]
    pub available_equity: f64,
}

/// Contract side of a perpetual-swap position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PosSide {
    Long,
    Short,
}

impl std::fmt::Display for PosSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "long"),
            Self::Short => write!(f, "short"),
        }
    }
}

impl PosSide {
    /// The order side that closes (reduces) a position on this side.
    pub fn closing_side(self) -> &'static str {
        match self {
            Self::Long => "sell",
            Self::Short => "buy",
        }
    }
}

/// Margin mode reported by the exchange for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarginMode {
    Cross,
    Isolated,
}

/// Trade tape side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

// -----------------------------------------------------------------------
// Kline
// -----------------------------------------------------------------------

/// Key identifying one OHLCV bar series: `(symbol, timeframe, openTimeMs)`.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct KlineKey {
    pub symbol: String,
    pub timeframe: String,
    pub open_time_ms: i64,
}

/// One OHLCV bar. `confirmed` freezes the record once the bar's period has
/// elapsed — further writes for the same key are then ignored (spec §3
/// invariant, tested in §8 invariant 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Kline {
    pub symbol: String,
    pub timeframe: String,
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub confirmed: bool,
    pub last_update_ms: i64,
}

impl Kline {
    pub fn key(&self) -> KlineKey {
        KlineKey {
            symbol: self.symbol.clone(),
            timeframe: self.timeframe.clone(),
            open_time_ms: self.open_time_ms,
        }
    }
}

// -----------------------------------------------------------------------
// Trade
// -----------------------------------------------------------------------

/// A single executed trade from the tape. Never mutated once stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub trade_id: String,
    pub ts_ms: i64,
    pub price: f64,
    pub size: f64,
    pub side: TradeSide,
}

// -----------------------------------------------------------------------
// Order book
// -----------------------------------------------------------------------

/// One `(price, size)` level update. `size == 0` removes the price level.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderBookLevel {
    pub price: f64,
    pub size: f64,
}

/// A top-N immutable snapshot handed to readers (§4.2 "Snapshot-for-readers").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookView {
    pub symbol: String,
    pub bids: Vec<OrderBookLevel>,
    pub asks: Vec<OrderBookLevel>,
    pub last_seq_id: i64,
    pub ts_ms: i64,
}

/// Aggregate metrics computed once a minute from the live book (§4.2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderBookMetrics {
    pub symbol: String,
    pub ts_ms: i64,
    pub bid1: f64,
    pub ask1: f64,
    pub spread_pct: f64,
    pub depth5_bid: f64,
    pub depth5_ask: f64,
}

// -----------------------------------------------------------------------
// Position
// -----------------------------------------------------------------------

/// An open perpetual-swap position. `(symbol, pos_side)` plus `open_time_ms`
/// is the primary key used to attach AI decisions (§3 "Ownership").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub pos_side: PosSide,
    pub size: f64,
    pub avg_px: f64,
    pub open_time_ms: i64,
    pub leverage: f64,
    pub margin_mode: MarginMode,
    /// Decision journal rows joined on `openTimeMs` (§4.6 "enrich with
    /// decision journal rows keyed by openTimeMs"). Empty until the
    /// positions refresher enriches it from the store.
    #[serde(default)]
    pub decisions: Vec<AIDecision>,
}

impl Position {
    /// The decision-journal join key (`posId = openTimeMs`).
    pub fn pos_id(&self) -> i64 {
        self.open_time_ms
    }
}

/// A closed position, mirroring [`Position`] plus close-time fields. `review`
/// is filled exactly once, by C10.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub symbol: String,
    pub pos_side: PosSide,
    pub size: f64,
    pub avg_px: f64,
    pub open_time_ms: i64,
    pub close_time_ms: i64,
    pub exit_px: f64,
    pub realized_pnl: f64,
    pub fee_total: f64,
    pub review_summary: Option<String>,
}

impl ClosedPosition {
    pub fn pos_id(&self) -> i64 {
        self.open_time_ms
    }
}

// -----------------------------------------------------------------------
// AI decision
// -----------------------------------------------------------------------

/// A trading signal extracted from an LLM response. `HOLD` and its variants
/// carry no sizing data; others do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Signal {
    OpenLong,
    OpenShort,
    AdjustStop,
    CloseLong,
    CloseShort,
    Hold,
}

impl Signal {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "OPEN_LONG" => Some(Self::OpenLong),
            "OPEN_SHORT" => Some(Self::OpenShort),
            "ADJUST_STOP" => Some(Self::AdjustStop),
            "CLOSE_LONG" => Some(Self::CloseLong),
            "CLOSE_SHORT" => Some(Self::CloseShort),
            s if s.starts_with("HOLD") => Some(Self::Hold),
            _ => None,
        }
    }

    pub fn requires_size(self) -> bool {
        matches!(self, Self::OpenLong | Self::OpenShort)
    }

    pub fn pos_side(self) -> Option<PosSide> {
        match self {
            Self::OpenLong | Self::CloseLong => Some(PosSide::Long),
            Self::OpenShort | Self::CloseShort => Some(PosSide::Short),
            _ => None,
        }
    }
}

/// One layer of a take-profit or stop-loss ladder. `size=None` means the LLM
/// omitted it; §9 "AdjustData.size=None at parse time means 'fill in from
/// position size at apply time'" — resolved by [`AdjustData::fill_missing_sizes`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AdjustLayer {
    #[serde(default)]
    pub size: Option<f64>,
    pub price: f64,
}

/// The layered TP/SL plan attached to an open or adjust decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AdjustData {
    #[serde(default)]
    pub take_profit: Vec<AdjustLayer>,
    #[serde(default)]
    pub stop_loss: Vec<AdjustLayer>,
}

impl AdjustData {
    /// Fill any layer missing `size` with the whole position size (§4.9
    /// "Fill in missing TP/SL size fields (default to whole position size)").
    /// Called at apply time, just before validation, so every layer carries
    /// a concrete size regardless of what the LLM sent.
    pub fn fill_missing_sizes(&mut self, position_size: f64) {
        for layer in self.take_profit.iter_mut().chain(self.stop_loss.iter_mut()) {
            if layer.size.is_none() {
                layer.size = Some(position_size);
            }
        }
    }
}

/// Decision extracted from the LLM, either early (numeric fields only) or
/// final (includes `reason`). Immutable once `posId` is linked by C9.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AIDecision {
    pub id: String,
    pub timestamp_ms: i64,
    pub symbol: String,
    pub signal: Signal,
    pub pos_id: Option<i64>,
    pub confidence: u8,
    pub size: Option<f64>,
    pub adjust_data: Option<AdjustData>,
    pub holding_time: Option<String>,
    pub reason: Option<String>,
}

// -----------------------------------------------------------------------
// Conversation / review
// -----------------------------------------------------------------------

/// One LLM call record. `executed` may be flipped true later by C9.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub id: String,
    pub session_id: String,
    pub symbol: String,
    pub prompt: String,
    pub response: String,
    pub analysis: String,
    pub executed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_parse_recognizes_hold_variants() {
        assert_eq!(Signal::parse("HOLD"), Some(Signal::Hold));
        assert_eq!(Signal::parse("HOLD_WAIT"), Some(Signal::Hold));
        assert_eq!(Signal::parse("OPEN_LONG"), Some(Signal::OpenLong));
        assert_eq!(Signal::parse("GARBAGE"), None);
    }

    #[test]
    fn pos_side_closing_side_is_opposite() {
        assert_eq!(PosSide::Long.closing_side(), "sell");
        assert_eq!(PosSide::Short.closing_side(), "buy");
    }

    #[test]
    fn requires_size_only_for_opens() {
        assert!(Signal::OpenLong.requires_size());
        assert!(Signal::OpenShort.requires_size());
        assert!(!Signal::AdjustStop.requires_size());
        assert!(!Signal::Hold.requires_size());
    }
}
