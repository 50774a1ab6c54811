// =============================================================================
// Inbound WebSocket envelope types
// =============================================================================
//
// Every OKX push message is either an `event` frame (subscribe ack, error,
// login ack) or a `data` frame carrying one or more channel-specific payloads
// tagged by `arg.channel`/`arg.instId`. We deserialize the outer envelope
// generically and dispatch on `channel` before decoding `data` into the
// channel-specific shape (book levels, kline arrays, trade objects).
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The channel/instrument pair every subscription and push message carries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Arg {
    pub channel: String,
    #[serde(rename = "instId")]
    pub inst_id: String,
}

/// The outer envelope of any message received on a public or private
/// WebSocket connection.
#[derive(Debug, Clone, Deserialize)]
pub struct WsEnvelope {
    pub event: Option<String>,
    pub arg: Option<Arg>,
    pub action: Option<String>,
    pub data: Option<Value>,
    pub code: Option<String>,
    pub msg: Option<String>,
}

impl WsEnvelope {
    /// `true` for subscribe/login/error acks, which carry no market data.
    pub fn is_event(&self) -> bool {
        self.event.is_some()
    }

    /// `true` when the channel is an order-book stream and no bids/asks are
    /// present — OKX's heartbeat-equivalent "empty data" push.
    pub fn is_heartbeat(&self, bids_empty: bool, asks_empty: bool) -> bool {
        bids_empty && asks_empty
    }
}

/// One raw order-book level as OKX sends it: `[price, size, deprecated, numOrders]`.
pub type RawLevel = (String, String, String, String);

/// One `books`/`books5` channel push payload.
#[derive(Debug, Clone, Deserialize)]
pub struct BookData {
    #[serde(default)]
    pub asks: Vec<RawLevel>,
    #[serde(default)]
    pub bids: Vec<RawLevel>,
    pub ts: String,
    #[serde(rename = "seqId")]
    pub seq_id: i64,
    #[serde(rename = "prevSeqId", default)]
    pub prev_seq_id: i64,
    #[serde(default)]
    pub checksum: Option<i64>,
}

/// One `trades` channel push payload.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TradeData {
    #[serde(rename = "instId")]
    pub inst_id: String,
    #[serde(rename = "tradeId")]
    pub trade_id: String,
    pub px: String,
    pub sz: String,
    pub side: String,
    pub ts: String,
}

/// One raw candle array entry: `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`.
pub type RawCandle = (String, String, String, String, String, String, String, String, String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_subscribe_event() {
        let raw = r#"{"event":"subscribe","arg":{"channel":"books","instId":"BTC-USDT-SWAP"}}"#;
        let env: WsEnvelope = serde_json::from_str(raw).unwrap();
        assert!(env.is_event());
        assert_eq!(env.arg.unwrap().channel, "books");
    }

    #[test]
    fn decodes_book_data_payload() {
        let raw = r#"{"asks":[["100.1","2","0","1"]],"bids":[["99.9","3","0","2"]],"ts":"1700000000000","seqId":5,"prevSeqId":4,"checksum":123}"#;
        let book: BookData = serde_json::from_str(raw).unwrap();
        assert_eq!(book.seq_id, 5);
        assert_eq!(book.prev_seq_id, 4);
        assert_eq!(book.asks.len(), 1);
    }
}
