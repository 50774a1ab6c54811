// =============================================================================
// Process-scoped state assembly for the collector and agent binaries
// =============================================================================
//
// Configuration and exchange clients are process-scoped and injected into
// components here; there is no module-level state beyond logging.
// `CollectorState` wires up C1-C5 (time sync, order book, kline store, trade
// tape — everything `collector::supervisor::run` drives). `AgentState` wires
// up C6-C11 on top of its own embedded `CollectorState`, since the feature
// aggregator (C7) needs a live market-data picture and running the collector
// in-process is the simplest way to give the agent binary one without a
// second IPC layer the spec never names.
// =============================================================================

use std::sync::Arc;

use crate::caches::balance::BalanceCache;
use crate::caches::funding::FundingCache;
use crate::caches::historical::HistoricalCache;
use crate::caches::oi_taker::OiTakerCache;
use crate::caches::positions::PositionsCache;
use crate::caches::stop_orders::StopOrdersCache;
use crate::collector::session::CollectorHandles;
use crate::features::FeatureAggregator;
use crate::journal::Journal;
use crate::llm::client::{LlmClient, LlmConfig};
use crate::market_data::{KlineStore, OrderBookStore, TradeTape};
use crate::notifier::{Notifier, NotifierConfig};
use crate::okx::auth::Credentials;
use crate::okx::client::OkxClient;
use crate::orchestrator::{MarketOrderExecutor, Orchestrator};
use crate::runtime_config::{EnvOverlay, RuntimeConfig};
use crate::store::{DataStore, InMemoryStore};
use crate::time_sync::TimeSync;
use crate::types::AccountMode;

/// Everything a collector process needs: the exchange client, the corrected
/// clock, and the three live stores the WebSocket sessions write into.
pub struct CollectorState {
    pub client: Arc<OkxClient>,
    pub handles: Arc<CollectorHandles>,
}

impl CollectorState {
    pub fn new(env: &EnvOverlay) -> Self {
        let mode = if env.exchange.demo { AccountMode::Demo } else { AccountMode::Live };
        let creds = Credentials::new(env.exchange.api_key.clone(), env.exchange.api_secret.clone(), env.exchange.passphrase.clone());
        let client = Arc::new(OkxClient::new(creds, mode));

        let handles = Arc::new(CollectorHandles {
            books: Arc::new(OrderBookStore::new()),
            klines: Arc::new(KlineStore::new()),
            trades: Arc::new(TradeTape::new()),
            time_sync: Arc::new(TimeSync::new()),
        });

        Self { client, handles }
    }

    /// Query the exchange clock three times and commit the median offset.
    /// Must run before any freshness check or REST timestamp is trusted.
    pub async fn sync_clock(&self) {
        self.handles.time_sync.sync(&self.client).await;
    }
}

/// Background caches (C6). Held separately from `AgentState` so the spawn
/// wiring in the binary reads as one function call per cache, matching
/// `original_source`'s one-thread-per-cache shape.
pub struct BackgroundCaches {
    pub balance: Arc<BalanceCache>,
    pub positions: Arc<PositionsCache>,
    pub stop_orders: Arc<StopOrdersCache>,
    pub historical: Arc<HistoricalCache>,
    pub funding: Arc<FundingCache>,
    pub oi_taker: Arc<OiTakerCache>,
}

impl BackgroundCaches {
    pub fn new() -> Self {
        Self {
            balance: Arc::new(BalanceCache::new()),
            positions: Arc::new(PositionsCache::new()),
            stop_orders: Arc::new(StopOrdersCache::new()),
            historical: Arc::new(HistoricalCache::new()),
            funding: Arc::new(FundingCache::new()),
            oi_taker: Arc::new(OiTakerCache::new()),
        }
    }
}

impl Default for BackgroundCaches {
    fn default() -> Self {
        Self::new()
    }
}

/// Full state for the trading-agent binary: its own embedded collector
/// (market data), the background caches, and the decision/execution
/// pipeline (C7-C11). The bounded channels feeding close-notices (C6) and
/// review triggers (C10) are owned by the binary, not this struct, since
/// both ends are spawned tasks rather than long-lived state.
pub struct AgentState {
    pub collector: CollectorState,
    pub caches: BackgroundCaches,
    pub store: Arc<dyn DataStore>,
    pub journal: Arc<Journal>,
    pub notifier: Arc<Notifier>,
    pub llm: Arc<LlmClient>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AgentState {
    pub fn new(config: &RuntimeConfig, env: &EnvOverlay, journal_path: impl Into<std::path::PathBuf>) -> Self {
        let collector = CollectorState::new(env);
        let caches = BackgroundCaches::new();
        let store: Arc<dyn DataStore> = Arc::new(InMemoryStore::new());
        let journal = Journal::load(journal_path);

        let notifier = Arc::new(Notifier::new(NotifierConfig {
            enabled: env.notifier.enabled,
            webhook_url: env.notifier.webhook_url.clone(),
        }));

        let llm = Arc::new(LlmClient::new(LlmConfig {
            api_base: config.llm_api_base.clone(),
            api_key: env.llm.api_key.clone(),
            model: config.llm_model.clone(),
            timeout_secs: config.llm_timeout_secs,
        }));

        let executor = Arc::new(MarketOrderExecutor::new(collector.client.clone()));
        let orchestrator = Arc::new(Orchestrator {
            client: collector.client.clone(),
            executor,
            positions_cache: caches.positions.clone(),
            stop_orders_cache: caches.stop_orders.clone(),
            store: store.clone(),
            notifier: notifier.clone(),
            min_size: 1.0,
        });

        Self { collector, caches, store, journal, notifier, llm, orchestrator }
    }

    /// Build a feature aggregator over this process's market data and
    /// background caches (C7).
    pub fn feature_aggregator(&self, freshness_threshold_secs: u64) -> FeatureAggregator {
        FeatureAggregator {
            klines: self.collector.handles.klines.clone(),
            books: self.collector.handles.books.clone(),
            trades: self.collector.handles.trades.clone(),
            balance_cache: self.caches.balance.clone(),
            positions_cache: self.caches.positions.clone(),
            funding_cache: self.caches.funding.clone(),
            oi_taker_cache: self.caches.oi_taker.clone(),
            journal: self.journal.clone(),
            freshness_threshold_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_state_builds_demo_client() {
        let env = EnvOverlay { exchange: crate::runtime_config::ExchangeCredentials { demo: true, ..Default::default() }, ..Default::default() };
        let state = CollectorState::new(&env);
        assert!(Arc::strong_count(&state.client) >= 1);
    }

    #[test]
    fn agent_state_wires_orchestrator_to_shared_caches() {
        let config = RuntimeConfig::default();
        let env = EnvOverlay::default();
        let state = AgentState::new(&config, &env, "/tmp/okx-swap-agent-test-app-state-journal.json");
        assert!(Arc::ptr_eq(&state.orchestrator.positions_cache, &state.caches.positions));
        assert!(Arc::ptr_eq(&state.orchestrator.client, &state.collector.client));
    }
}
