// =============================================================================
// Sequenced order book — snapshot/update/heartbeat semantics per symbol
// =============================================================================
//
// Mirrors the exchange's `books` channel contract: a `snapshot` replaces the
// book wholesale, an `update` is only applied when its `prevSeqId` matches
// our `lastSeqId` (otherwise we drop local state and wait for the next
// snapshot), and a heartbeat (`prevSeqId == seqId`, empty sides) just
// advances the sequence counter. Readers never see a partially-applied book:
// the whole per-symbol book lives behind one `RwLock`, so any reader gets a
// point-in-time copy.
//
// Levels are kept in plain sorted `Vec`s rather than a balanced tree: book
// depth from the exchange is capped (typically a few hundred levels), so
// linear insertion is cheap and avoids pulling in a float-ordering crate.
// =============================================================================

use std::collections::{HashMap, HashSet};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::types::{OrderBookLevel, OrderBookMetrics, OrderBookView};

/// Bids sorted descending by price (best bid first); asks ascending
/// (best ask first).
struct Book {
    bids: Vec<(f64, f64)>,
    asks: Vec<(f64, f64)>,
    last_seq_id: i64,
    initialized: bool,
    ts_ms: i64,
}

impl Book {
    fn empty() -> Self {
        Self {
            bids: Vec::new(),
            asks: Vec::new(),
            last_seq_id: 0,
            initialized: false,
            ts_ms: 0,
        }
    }
}

fn upsert_level(levels: &mut Vec<(f64, f64)>, price: f64, size: f64, descending: bool) {
    if let Some(pos) = levels.iter().position(|(p, _)| *p == price) {
        if size == 0.0 {
            levels.remove(pos);
        } else {
            levels[pos].1 = size;
        }
        return;
    }
    if size == 0.0 {
        return;
    }
    let idx = levels.partition_point(|(p, _)| if descending { *p > price } else { *p < price });
    levels.insert(idx, (price, size));
}

/// One raw `(price, size)` level as parsed from the wire (strings already
/// converted to `f64` by the caller).
#[derive(Debug, Clone, Copy)]
pub struct LevelUpdate {
    pub price: f64,
    pub size: f64,
}

/// A decoded `books` channel push, independent of wire format.
pub struct BookUpdate {
    pub action: BookAction,
    pub bids: Vec<LevelUpdate>,
    pub asks: Vec<LevelUpdate>,
    pub seq_id: i64,
    pub prev_seq_id: i64,
    pub ts_ms: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookAction {
    Snapshot,
    Update,
}

/// Per-symbol sequenced order book store.
pub struct OrderBookStore {
    books: RwLock<HashMap<String, Book>>,
    reset_logged: RwLock<HashSet<String>>,
}

impl OrderBookStore {
    pub fn new() -> Self {
        Self {
            books: RwLock::new(HashMap::new()),
            reset_logged: RwLock::new(HashSet::new()),
        }
    }

    /// Apply one inbound book update for `symbol`.
    pub fn apply(&self, symbol: &str, update: BookUpdate) {
        // Heartbeat: same seq on both sides, no level data.
        if update.prev_seq_id == update.seq_id && update.bids.is_empty() && update.asks.is_empty() {
            let mut books = self.books.write();
            if let Some(book) = books.get_mut(symbol) {
                book.last_seq_id = update.seq_id;
                book.ts_ms = update.ts_ms;
            }
            return;
        }

        if update.seq_id < update.prev_seq_id {
            warn!(symbol, seq_id = update.seq_id, prev_seq_id = update.prev_seq_id, "order book sequence reset detected, clearing local state");
            self.books.write().insert(symbol.to_string(), Book::empty());
            return;
        }

        match update.action {
            BookAction::Snapshot => {
                let mut book = Book::empty();
                for l in &update.bids {
                    upsert_level(&mut book.bids, l.price, l.size, true);
                }
                for l in &update.asks {
                    upsert_level(&mut book.asks, l.price, l.size, false);
                }
                book.last_seq_id = update.seq_id;
                book.initialized = true;
                book.ts_ms = update.ts_ms;

                self.books.write().insert(symbol.to_string(), book);
                self.reset_logged.write().remove(symbol);
                debug!(symbol, seq_id = update.seq_id, "order book snapshot applied");
            }
            BookAction::Update => {
                let mut books = self.books.write();
                match books.get(symbol) {
                    Some(b) if b.initialized => {
                        if update.prev_seq_id != b.last_seq_id {
                            warn!(symbol, expected = b.last_seq_id, got = update.prev_seq_id, "order book sequence gap, clearing local state");
                            books.insert(symbol.to_string(), Book::empty());
                            return;
                        }
                    }
                    _ => {
                        if self.reset_logged.write().insert(symbol.to_string()) {
                            warn!(symbol, "order book update dropped, awaiting snapshot");
                        }
                        return;
                    }
                }

                let book = books.get_mut(symbol).expect("checked above");
                for l in &update.bids {
                    upsert_level(&mut book.bids, l.price, l.size, true);
                }
                for l in &update.asks {
                    upsert_level(&mut book.asks, l.price, l.size, false);
                }
                book.last_seq_id = update.seq_id;
                book.ts_ms = update.ts_ms;
            }
        }
    }

    /// Copy the top `depth` bids/asks into an immutable view for readers.
    pub fn view(&self, symbol: &str, depth: usize) -> Option<OrderBookView> {
        let books = self.books.read();
        let book = books.get(symbol)?;
        if !book.initialized {
            return None;
        }

        let bids = book
            .bids
            .iter()
            .take(depth)
            .map(|(p, s)| OrderBookLevel { price: *p, size: *s })
            .collect();
        let asks = book
            .asks
            .iter()
            .take(depth)
            .map(|(p, s)| OrderBookLevel { price: *p, size: *s })
            .collect();

        Some(OrderBookView {
            symbol: symbol.to_string(),
            bids,
            asks,
            last_seq_id: book.last_seq_id,
            ts_ms: book.ts_ms,
        })
    }

    /// Most recent update timestamp for a symbol, used by the watchdog.
    pub fn last_update_ms(&self, symbol: &str) -> Option<i64> {
        self.books.read().get(symbol).map(|b| b.ts_ms)
    }

    /// Compute bid1/ask1/spread%/depth@5 for a symbol, if the book is live.
    pub fn metrics(&self, symbol: &str) -> Option<OrderBookMetrics> {
        let books = self.books.read();
        let book = books.get(symbol)?;
        if !book.initialized {
            return None;
        }

        let bid1 = book.bids.first()?.0;
        let ask1 = book.asks.first()?.0;
        let spread_pct = if bid1 > 0.0 { (ask1 - bid1) / bid1 * 100.0 } else { 0.0 };
        let depth5_bid: f64 = book.bids.iter().take(5).map(|(_, s)| s).sum();
        let depth5_ask: f64 = book.asks.iter().take(5).map(|(_, s)| s).sum();

        Some(OrderBookMetrics {
            symbol: symbol.to_string(),
            ts_ms: book.ts_ms,
            bid1,
            ask1,
            spread_pct,
            depth5_bid,
            depth5_ask,
        })
    }
}

impl Default for OrderBookStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(seq: i64) -> BookUpdate {
        BookUpdate {
            action: BookAction::Snapshot,
            bids: vec![LevelUpdate { price: 99.0, size: 1.0 }],
            asks: vec![LevelUpdate { price: 101.0, size: 2.0 }],
            seq_id: seq,
            prev_seq_id: 0,
            ts_ms: 1000,
        }
    }

    #[test]
    fn snapshot_initializes_book() {
        let store = OrderBookStore::new();
        store.apply("BTC-USDT-SWAP", snapshot(1));
        let view = store.view("BTC-USDT-SWAP", 10).unwrap();
        assert_eq!(view.bids.len(), 1);
        assert_eq!(view.last_seq_id, 1);
    }

    #[test]
    fn update_without_snapshot_is_dropped() {
        let store = OrderBookStore::new();
        store.apply(
            "BTC-USDT-SWAP",
            BookUpdate {
                action: BookAction::Update,
                bids: vec![LevelUpdate { price: 99.0, size: 1.0 }],
                asks: vec![],
                seq_id: 2,
                prev_seq_id: 1,
                ts_ms: 1001,
            },
        );
        assert!(store.view("BTC-USDT-SWAP", 10).is_none());
    }

    #[test]
    fn update_applies_level_changes_in_sequence() {
        let store = OrderBookStore::new();
        store.apply("BTC-USDT-SWAP", snapshot(1));
        store.apply(
            "BTC-USDT-SWAP",
            BookUpdate {
                action: BookAction::Update,
                bids: vec![LevelUpdate { price: 99.0, size: 0.0 }],
                asks: vec![LevelUpdate { price: 102.0, size: 3.0 }],
                seq_id: 2,
                prev_seq_id: 1,
                ts_ms: 1002,
            },
        );
        let view = store.view("BTC-USDT-SWAP", 10).unwrap();
        assert!(view.bids.is_empty());
        assert_eq!(view.asks.len(), 2);
        assert_eq!(view.last_seq_id, 2);
    }

    #[test]
    fn gap_clears_local_state() {
        let store = OrderBookStore::new();
        store.apply("BTC-USDT-SWAP", snapshot(1));
        store.apply(
            "BTC-USDT-SWAP",
            BookUpdate {
                action: BookAction::Update,
                bids: vec![],
                asks: vec![],
                seq_id: 5,
                prev_seq_id: 3,
                ts_ms: 1003,
            },
        );
        assert!(store.view("BTC-USDT-SWAP", 10).is_none());
    }

    #[test]
    fn heartbeat_advances_seq_without_touching_levels() {
        let store = OrderBookStore::new();
        store.apply("BTC-USDT-SWAP", snapshot(1));
        store.apply(
            "BTC-USDT-SWAP",
            BookUpdate {
                action: BookAction::Update,
                bids: vec![],
                asks: vec![],
                seq_id: 1,
                prev_seq_id: 1,
                ts_ms: 1004,
            },
        );
        let view = store.view("BTC-USDT-SWAP", 10).unwrap();
        assert_eq!(view.last_seq_id, 1);
        assert_eq!(view.bids.len(), 1);
    }
}
