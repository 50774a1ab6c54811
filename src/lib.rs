// =============================================================================
// okx-swap-agent — library root
// =============================================================================
//
// Split into a standalone collector binary (C1-C5: time sync, order book,
// kline store, trade tape, supervisor) and a trading agent binary (C6-C11:
// background caches, feature aggregation, streaming decisions, order
// orchestration, review generation, decision journaling). Both binaries link
// this crate and assemble their own process-scoped state from these modules.
// =============================================================================

pub mod app_state;
pub mod caches;
pub mod collector;
pub mod error;
pub mod features;
pub mod indicators;
pub mod journal;
pub mod llm;
pub mod logging;
pub mod market_data;
pub mod notifier;
pub mod okx;
pub mod orchestrator;
pub mod runtime_config;
pub mod store;
pub mod time_sync;
pub mod types;
