// =============================================================================
// Persisted-state interface — the relational store's boundary, not its schema
// =============================================================================
//
// The relational store and its schema are out of scope beyond the specific
// operations this system performs against it (§6 "Persisted state"): saving
// klines, closed positions, AI decisions keyed by `posId`, LLM conversation
// records, and periodic order book metric snapshots. `DataStore` names that
// boundary as a trait so the rest of the crate depends on an interface rather
// than a concrete database client; `InMemoryStore` is a reference
// implementation used by tests and as a drop-in before a real backing store
// is wired up.
// =============================================================================

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::types::{AIDecision, ClosedPosition, ConversationRecord, Kline, OrderBookMetrics};

pub trait DataStore: Send + Sync {
    fn save_kline(&self, kline: Kline);
    fn save_closed_position(&self, position: ClosedPosition);
    fn closed_positions(&self, symbol: &str, limit: usize) -> Vec<ClosedPosition>;
    /// Closed rows still missing a review, across all symbols (C10's work queue).
    fn closed_positions_without_review(&self) -> Vec<ClosedPosition>;
    /// Idempotent: once a row carries a summary, C10 must not call the LLM for it again.
    fn save_review_summary(&self, symbol: &str, open_time_ms: i64, summary: String);
    fn save_decision(&self, decision: AIDecision);
    fn decisions_for_position(&self, pos_id: i64) -> Vec<AIDecision>;
    fn save_conversation(&self, record: ConversationRecord);
    fn mark_conversation_executed(&self, id: &str);
    fn save_orderbook_metrics(&self, metrics: OrderBookMetrics);
}

/// In-process reference implementation, unbounded aside from what callers
/// choose to prune.
pub struct InMemoryStore {
    klines: RwLock<Vec<Kline>>,
    closed_positions: RwLock<Vec<ClosedPosition>>,
    decisions: RwLock<Vec<AIDecision>>,
    conversations: RwLock<Vec<ConversationRecord>>,
    orderbook_metrics: RwLock<HashMap<String, Vec<OrderBookMetrics>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            klines: RwLock::new(Vec::new()),
            closed_positions: RwLock::new(Vec::new()),
            decisions: RwLock::new(Vec::new()),
            conversations: RwLock::new(Vec::new()),
            orderbook_metrics: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStore for InMemoryStore {
    fn save_kline(&self, kline: Kline) {
        self.klines.write().push(kline);
    }

    fn save_closed_position(&self, position: ClosedPosition) {
        self.closed_positions.write().push(position);
    }

    fn closed_positions(&self, symbol: &str, limit: usize) -> Vec<ClosedPosition> {
        self.closed_positions
            .read()
            .iter()
            .rev()
            .filter(|p| p.symbol == symbol)
            .take(limit)
            .cloned()
            .collect()
    }

    fn closed_positions_without_review(&self) -> Vec<ClosedPosition> {
        self.closed_positions
            .read()
            .iter()
            .filter(|p| p.review_summary.is_none())
            .cloned()
            .collect()
    }

    fn save_review_summary(&self, symbol: &str, open_time_ms: i64, summary: String) {
        let mut rows = self.closed_positions.write();
        if let Some(row) = rows.iter_mut().find(|p| p.symbol == symbol && p.open_time_ms == open_time_ms) {
            row.review_summary = Some(summary);
        }
    }

    fn save_decision(&self, decision: AIDecision) {
        self.decisions.write().push(decision);
    }

    fn decisions_for_position(&self, pos_id: i64) -> Vec<AIDecision> {
        self.decisions
            .read()
            .iter()
            .filter(|d| d.pos_id == Some(pos_id))
            .cloned()
            .collect()
    }

    fn save_conversation(&self, record: ConversationRecord) {
        self.conversations.write().push(record);
    }

    fn mark_conversation_executed(&self, id: &str) {
        if let Some(record) = self.conversations.write().iter_mut().find(|c| c.id == id) {
            record.executed = true;
        }
    }

    fn save_orderbook_metrics(&self, metrics: OrderBookMetrics) {
        self.orderbook_metrics
            .write()
            .entry(metrics.symbol.clone())
            .or_default()
            .push(metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PosSide, Signal};

    fn closed_position(symbol: &str, open_time_ms: i64) -> ClosedPosition {
        ClosedPosition {
            symbol: symbol.to_string(),
            pos_side: PosSide::Long,
            size: 1.0,
            avg_px: 100.0,
            open_time_ms,
            close_time_ms: open_time_ms + 1000,
            exit_px: 101.0,
            realized_pnl: 1.0,
            fee_total: 0.1,
            review_summary: None,
        }
    }

    #[test]
    fn closed_positions_filters_by_symbol_newest_first() {
        let store = InMemoryStore::new();
        store.save_closed_position(closed_position("BTC-USDT-SWAP", 1));
        store.save_closed_position(closed_position("ETH-USDT-SWAP", 2));
        store.save_closed_position(closed_position("BTC-USDT-SWAP", 3));

        let result = store.closed_positions("BTC-USDT-SWAP", 10);
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].open_time_ms, 3);
    }

    #[test]
    fn decisions_join_on_pos_id() {
        let store = InMemoryStore::new();
        store.save_decision(AIDecision {
            id: "d1".to_string(),
            timestamp_ms: 1,
            symbol: "BTC-USDT-SWAP".to_string(),
            signal: Signal::AdjustStop,
            pos_id: Some(42),
            confidence: 80,
            size: None,
            adjust_data: None,
            holding_time: None,
            reason: Some("trend continuation".to_string()),
        });
        store.save_decision(AIDecision {
            id: "d2".to_string(),
            timestamp_ms: 2,
            symbol: "BTC-USDT-SWAP".to_string(),
            signal: Signal::Hold,
            pos_id: None,
            confidence: 50,
            size: None,
            adjust_data: None,
            holding_time: None,
            reason: None,
        });

        assert_eq!(store.decisions_for_position(42).len(), 1);
        assert_eq!(store.decisions_for_position(99).len(), 0);
    }

    #[test]
    fn review_summary_is_idempotent_to_find() {
        let store = InMemoryStore::new();
        store.save_closed_position(closed_position("BTC-USDT-SWAP", 7));
        assert_eq!(store.closed_positions_without_review().len(), 1);

        store.save_review_summary("BTC-USDT-SWAP", 7, "solid scalp".to_string());
        assert_eq!(store.closed_positions_without_review().len(), 0);

        let rows = store.closed_positions("BTC-USDT-SWAP", 10);
        assert_eq!(rows[0].review_summary.as_deref(), Some("solid scalp"));
    }

    #[test]
    fn mark_conversation_executed_flips_flag() {
        let store = InMemoryStore::new();
        store.save_conversation(ConversationRecord {
            id: "conv-1".to_string(),
            session_id: "s1".to_string(),
            symbol: "BTC-USDT-SWAP".to_string(),
            prompt: "p".to_string(),
            response: "r".to_string(),
            analysis: "a".to_string(),
            executed: false,
        });
        store.mark_conversation_executed("conv-1");
        assert!(store.conversations.read()[0].executed);
    }
}
