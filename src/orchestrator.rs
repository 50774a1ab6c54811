// =============================================================================
// Order orchestrator (C9) — dispatch by signal, layered TP/SL apply
// =============================================================================
//
// Accepts an early-or-final `AIDecision` and dispatches on `signal`. The
// "smart" order-open path is modeled as an `OrderExecutor` trait (§9 open
// question 2): its contract is "the exchange accepted the order", not "the
// position now exists" — existence is confirmed separately by polling the
// positions cache (§9 open question 1, a conservative 2s x 10 budget). The
// layered TP/SL apply follows §4.9 exactly: cancel everything on the target
// side first, then place TP and SL layers, which may race each other but
// never the cancel step.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::caches::positions::PositionsCache;
use crate::caches::stop_orders::{StopOrder, StopOrdersCache};
use crate::notifier::Notifier;
use crate::okx::client::OkxClient;
use crate::store::DataStore;
use crate::types::{AIDecision, AdjustData, AdjustLayer, PosSide, Position, Signal};

const POSITION_POLL_INTERVAL: Duration = Duration::from_secs(2);
const POSITION_POLL_ATTEMPTS: usize = 10;
const ADJUST_SUM_TOLERANCE: f64 = 1e-3;

/// Outcome of handing an open request to the executor: acceptance only, not
/// confirmation the position exists yet.
#[derive(Debug, Clone)]
pub struct ExecutorOutcome {
    pub submitted: bool,
    pub client_order_id: Option<String>,
}

/// The "smart" order-open path, external per §9 open question 2. The default
/// implementation places a market order through `OkxClient`; a pricing
/// strategy implementation is out of scope and can be substituted here.
#[async_trait]
pub trait OrderExecutor: Send + Sync {
    async fn open(&self, symbol: &str, pos_side: PosSide, size: f64) -> anyhow::Result<ExecutorOutcome>;
}

pub struct MarketOrderExecutor {
    client: Arc<OkxClient>,
}

impl MarketOrderExecutor {
    pub fn new(client: Arc<OkxClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl OrderExecutor for MarketOrderExecutor {
    async fn open(&self, symbol: &str, pos_side: PosSide, size: f64) -> anyhow::Result<ExecutorOutcome> {
        let side = match pos_side {
            PosSide::Long => "buy",
            PosSide::Short => "sell",
        };
        let ord_id = self.client.place_order(symbol, side, pos_side, "market", size, None, false).await?;
        Ok(ExecutorOutcome { submitted: true, client_order_id: Some(ord_id) })
    }
}

pub struct Orchestrator {
    pub client: Arc<OkxClient>,
    pub executor: Arc<dyn OrderExecutor>,
    pub positions_cache: Arc<PositionsCache>,
    pub stop_orders_cache: Arc<StopOrdersCache>,
    pub store: Arc<dyn DataStore>,
    pub notifier: Arc<Notifier>,
    pub min_size: f64,
}

impl Orchestrator {
    pub async fn dispatch(&self, decision: AIDecision) {
        let mut decision = decision;
        match decision.signal {
            Signal::OpenLong | Signal::OpenShort => {
                if let Some(pos) = self.handle_open(&decision).await {
                    decision.pos_id = Some(pos.pos_id());
                }
            }
            Signal::AdjustStop => self.handle_adjust(&decision).await,
            Signal::CloseLong | Signal::CloseShort => self.handle_close(&decision).await,
            Signal::Hold => {}
        }
        self.store.save_decision(decision);
    }

    async fn handle_open(&self, decision: &AIDecision) -> Option<Position> {
        let Some(size) = decision.size else {
            warn!(symbol = %decision.symbol, "OPEN signal missing required size, skipping");
            return None;
        };
        let Some(pos_side) = decision.signal.pos_side() else {
            return None;
        };
        let size = size.max(self.min_size);

        let adjust_data = decision.adjust_data.clone().and_then(|mut ad| {
            ad.fill_missing_sizes(size);
            match validate_adjust_data(&ad, size) {
                Ok(()) => Some(ad),
                Err(e) => {
                    error!(symbol = %decision.symbol, error = %e, "adjust_data validation failed, opening without TP/SL layers");
                    None
                }
            }
        });

        match self.executor.open(&decision.symbol, pos_side, size).await {
            Ok(outcome) if outcome.submitted => {
                info!(symbol = %decision.symbol, size, client_order_id = ?outcome.client_order_id, "open order accepted");
            }
            Ok(_) => {
                warn!(symbol = %decision.symbol, "executor declined to submit open order");
                return None;
            }
            Err(e) => {
                error!(symbol = %decision.symbol, error = %e, "open order placement failed");
                return None;
            }
        }

        let position = self.poll_for_position(&decision.symbol, pos_side).await?;
        self.notifier.notify_open(&position.symbol, position.pos_side, position.size, position.avg_px).await;
        if let Some(adjust_data) = &adjust_data {
            self.apply_layered_tp_sl(&position, adjust_data).await;
        }
        Some(position)
    }

    async fn poll_for_position(&self, symbol: &str, pos_side: PosSide) -> Option<Position> {
        for attempt in 0..POSITION_POLL_ATTEMPTS {
            if let Some(positions) = self.positions_cache.get() {
                if let Some(pos) = positions.iter().find(|p| p.symbol == symbol && p.pos_side == pos_side) {
                    return Some(pos.clone());
                }
            }
            tokio::time::sleep(POSITION_POLL_INTERVAL).await;
            if attempt + 1 == POSITION_POLL_ATTEMPTS {
                warn!(symbol, ?pos_side, "position did not appear within poll budget, decision left unlinked");
            }
        }
        None
    }

    async fn handle_adjust(&self, decision: &AIDecision) {
        let Some(adjust_data) = &decision.adjust_data else {
            warn!(symbol = %decision.symbol, "ADJUST_STOP with no adjust_data, skipping");
            return;
        };
        let Some(positions) = self.positions_cache.get() else {
            warn!(symbol = %decision.symbol, "no positions snapshot available, skipping adjust");
            return;
        };
        let matching: Vec<Position> = positions
            .into_iter()
            .filter(|p| p.symbol == decision.symbol && decision.signal.pos_side().map(|s| s == p.pos_side).unwrap_or(true))
            .collect();

        for position in matching {
            let mut filled = adjust_data.clone();
            filled.fill_missing_sizes(position.size);
            if let Err(e) = validate_adjust_data(&filled, position.size) {
                error!(symbol = %decision.symbol, error = %e, "adjust_data validation failed, skipping position");
                continue;
            }
            self.apply_layered_tp_sl(&position, &filled).await;
            self.notifier
                .notify_adjust(&position.symbol, position.pos_side, filled.take_profit.len(), filled.stop_loss.len())
                .await;
        }
    }

    async fn handle_close(&self, decision: &AIDecision) {
        let Some(pos_side) = decision.signal.pos_side() else { return };
        let Some(positions) = self.positions_cache.get() else {
            warn!(symbol = %decision.symbol, "no positions snapshot available, skipping close");
            return;
        };
        let Some(position) = positions.into_iter().find(|p| p.symbol == decision.symbol && p.pos_side == pos_side) else {
            warn!(symbol = %decision.symbol, ?pos_side, "no matching open position to close");
            return;
        };

        self.cancel_existing_orders(&decision.symbol, pos_side).await;

        let side = pos_side.closing_side();
        if let Err(e) = self
            .client
            .place_order(&decision.symbol, side, pos_side, "market", position.size, None, true)
            .await
        {
            error!(symbol = %decision.symbol, error = %e, "close order failed");
        } else {
            info!(symbol = %decision.symbol, size = position.size, "position close order placed");
        }
    }

    /// Layered TP/SL apply: cancel existing orders on the target side first,
    /// then place every TP and SL layer (§4.9 steps 1-4).
    async fn apply_layered_tp_sl(&self, position: &Position, adjust_data: &AdjustData) {
        self.cancel_existing_orders(&position.symbol, position.pos_side).await;

        let tp_side = position.pos_side.closing_side();
        let resolved = |layer: &AdjustLayer| layer.size.unwrap_or(position.size);
        let tp_futures = adjust_data.take_profit.iter().map(|layer| {
            self.client
                .place_order(&position.symbol, tp_side, position.pos_side, "limit", resolved(layer), Some(layer.price), true)
        });
        let sl_futures = adjust_data
            .stop_loss
            .iter()
            .map(|layer| self.client.place_algo_order(&position.symbol, tp_side, position.pos_side, resolved(layer), layer.price));

        let (tp_results, sl_results) = tokio::join!(futures_util::future::join_all(tp_futures), futures_util::future::join_all(sl_futures));

        for (layer, result) in adjust_data.take_profit.iter().zip(tp_results) {
            let size = resolved(layer);
            match result {
                Ok(id) => info!(symbol = %position.symbol, price = layer.price, size, ord_id = id, "TP layer placed"),
                Err(e) => error!(symbol = %position.symbol, price = layer.price, size, error = %e, "TP layer failed"),
            }
        }
        for (layer, result) in adjust_data.stop_loss.iter().zip(sl_results) {
            let size = resolved(layer);
            match result {
                Ok(id) => info!(symbol = %position.symbol, price = layer.price, size, algo_id = id, "SL layer placed"),
                Err(e) => error!(symbol = %position.symbol, price = layer.price, size, error = %e, "SL layer failed"),
            }
        }
    }

    async fn cancel_existing_orders(&self, symbol: &str, pos_side: PosSide) {
        let Some(snapshot) = self.stop_orders_cache.get().and_then(|m| m.get(symbol).cloned()) else {
            return;
        };

        let tp_to_cancel: Vec<StopOrder> = snapshot.take_profit.into_iter().filter(|o| o.pos_side == pos_side).collect();
        for order in &tp_to_cancel {
            if let Err(e) = self.client.cancel_order(symbol, &order.order_id).await {
                error!(symbol, ord_id = %order.order_id, error = %e, "TP cancel failed");
            }
        }

        let sl_to_cancel: Vec<(String, String)> = snapshot
            .stop_loss
            .into_iter()
            .filter(|o| o.pos_side == pos_side)
            .map(|o| (o.order_id, symbol.to_string()))
            .collect();
        if let Err(e) = self.client.cancel_algo_orders(&sl_to_cancel).await {
            error!(symbol, error = %e, "SL cancel failed");
        }
    }
}

/// Validate an adjust-data plan against a position size before placing any
/// orders (§3 "AdjustData" invariants): sums within tolerance, every size and
/// price strictly positive.
pub fn validate_adjust_data(adjust_data: &AdjustData, position_size: f64) -> anyhow::Result<()> {
    validate_layers(&adjust_data.take_profit, position_size, "take_profit")?;
    validate_layers(&adjust_data.stop_loss, position_size, "stop_loss")?;
    Ok(())
}

fn validate_layers(layers: &[AdjustLayer], position_size: f64, label: &str) -> anyhow::Result<()> {
    if layers.is_empty() {
        return Ok(());
    }
    for layer in layers {
        let size = layer.size.unwrap_or(position_size);
        if size <= 0.0 || layer.price <= 0.0 {
            anyhow::bail!("{label} layer has non-positive size or price");
        }
    }
    let sum: f64 = layers.iter().map(|l| l.size.unwrap_or(position_size)).sum();
    if (sum - position_size).abs() > ADJUST_SUM_TOLERANCE {
        anyhow::bail!("{label} layer sizes sum to {sum}, expected {position_size}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(size: f64, price: f64) -> AdjustLayer {
        AdjustLayer { size: Some(size), price }
    }

    #[test]
    fn validate_adjust_data_accepts_matching_sums() {
        let data = AdjustData { take_profit: vec![layer(5.0, 110.0), layer(5.0, 120.0)], stop_loss: vec![layer(10.0, 90.0)] };
        assert!(validate_adjust_data(&data, 10.0).is_ok());
    }

    #[test]
    fn validate_adjust_data_rejects_sum_mismatch() {
        let data = AdjustData { take_profit: vec![layer(4.0, 110.0)], stop_loss: vec![] };
        assert!(validate_adjust_data(&data, 10.0).is_err());
    }

    #[test]
    fn validate_adjust_data_rejects_non_positive_layer() {
        let data = AdjustData { take_profit: vec![layer(0.0, 110.0)], stop_loss: vec![] };
        assert!(validate_adjust_data(&data, 0.0).is_err());
    }

    #[test]
    fn validate_adjust_data_allows_empty_side() {
        let data = AdjustData { take_profit: vec![], stop_loss: vec![layer(10.0, 90.0)] };
        assert!(validate_adjust_data(&data, 10.0).is_ok());
    }

    #[test]
    fn fill_missing_sizes_defaults_to_whole_position_size() {
        let mut data = AdjustData {
            take_profit: vec![AdjustLayer { size: None, price: 110.0 }],
            stop_loss: vec![AdjustLayer { size: None, price: 90.0 }],
        };
        data.fill_missing_sizes(10.0);
        assert_eq!(data.take_profit[0].size, Some(10.0));
        assert_eq!(data.stop_loss[0].size, Some(10.0));
        assert!(validate_adjust_data(&data, 10.0).is_ok());
    }

    #[test]
    fn fill_missing_sizes_leaves_explicit_sizes_untouched() {
        let mut data = AdjustData { take_profit: vec![layer(4.0, 110.0), AdjustLayer { size: None, price: 120.0 }], stop_loss: vec![] };
        data.fill_missing_sizes(10.0);
        assert_eq!(data.take_profit[0].size, Some(4.0));
        assert_eq!(data.take_profit[1].size, Some(10.0));
    }
}
