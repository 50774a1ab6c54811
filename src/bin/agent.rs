// =============================================================================
// Trading agent binary — C6-C11 on top of an embedded collector
// =============================================================================
//
// Spawns the six background cache refreshers (C6), then runs the analysis
// loop: build a feature bundle (C7), stream a decision from the LLM (C8),
// dispatch it through the orchestrator when `--auto-execute` is set (C9),
// and run the review generator (C10) whenever the historical cache reports a
// newly closed position still missing a summary. `--once` runs a single pass
// over every configured symbol and exits; `--continuous` loops every
// `--interval` seconds until Ctrl+C.
// =============================================================================

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{info, warn};

use okx_swap_agent::app_state::AgentState;
use okx_swap_agent::caches::positions::ClosedNotice;
use okx_swap_agent::caches::{balance, funding, historical, oi_taker, positions, stop_orders};
use okx_swap_agent::features::{render_prompt, FeatureOutcome};
use okx_swap_agent::llm::decision::run_decision_cycle;
use okx_swap_agent::llm::review;
use okx_swap_agent::logging;
use okx_swap_agent::runtime_config::{AgentArgs, EnvOverlay, RuntimeConfig};
use okx_swap_agent::types::ClosedPosition;

const CONFIG_PATH: &str = "data/config.json";
const JOURNAL_PATH: &str = "data/ai_decision_history.json";
const SETTLEMENT_CCY: &str = "USDT";
const CLOSED_NOTICE_CAPACITY: usize = 64;
const REVIEW_CHANNEL_CAPACITY: usize = 64;

fn short_long_timeframes(config: &RuntimeConfig) -> (String, String) {
    let short = config.timeframes.first().cloned().unwrap_or_else(|| "5m".to_string());
    let long = config.timeframes.last().cloned().unwrap_or_else(|| "15m".to_string());
    (short, long)
}

fn spawn_background_caches(state: &AgentState, symbols: Vec<String>, closed_tx: mpsc::Sender<ClosedNotice>, review_tx: mpsc::Sender<ClosedPosition>) {
    let client = state.collector.client.clone();

    tokio::spawn(balance::run(client.clone(), SETTLEMENT_CCY.to_string(), state.caches.balance.clone()));
    tokio::spawn(positions::run(client.clone(), state.store.clone(), state.caches.positions.clone(), closed_tx));
    tokio::spawn(stop_orders::run(client.clone(), symbols.clone(), state.caches.stop_orders.clone()));
    tokio::spawn(historical::run(client.clone(), state.store.clone(), state.caches.historical.clone(), review_tx));
    tokio::spawn(funding::run(client.clone(), symbols.clone(), state.caches.funding.clone()));
    tokio::spawn(oi_taker::run(client, symbols, SETTLEMENT_CCY.to_string(), state.caches.oi_taker.clone()));
}

/// Drain whatever close-notices and review triggers have arrived since the
/// last tick: notify on closes, and run the review generator at most once
/// per tick even if several closed rows queued up.
async fn drain_background_events(
    state: &AgentState,
    closed_rx: &mut mpsc::Receiver<ClosedNotice>,
    review_rx: &mut mpsc::Receiver<ClosedPosition>,
) {
    let mut saw_review_trigger = false;
    loop {
        match closed_rx.try_recv() {
            Ok(notice) => info!(symbol = %notice.symbol, pos_side = ?notice.pos_side, "position closed"),
            Err(mpsc::error::TryRecvError::Empty) => break,
            Err(mpsc::error::TryRecvError::Disconnected) => break,
        }
    }
    loop {
        match review_rx.try_recv() {
            Ok(_) => saw_review_trigger = true,
            Err(mpsc::error::TryRecvError::Empty) => break,
            Err(mpsc::error::TryRecvError::Disconnected) => break,
        }
    }
    if saw_review_trigger {
        let written = review::run_once(&state.llm, &state.store, &state.collector.handles.klines).await;
        if written > 0 {
            info!(written, "review summaries generated");
        }
    }
}

async fn analyze_symbol(state: &AgentState, symbol: &str, short_tf: &str, long_tf: &str, freshness_threshold_secs: u64, auto_execute: bool) {
    let now_ms = state.collector.handles.time_sync.now_ms();
    let aggregator = state.feature_aggregator(freshness_threshold_secs);

    let bundle = match aggregator.build(symbol, short_tf, long_tf, now_ms) {
        FeatureOutcome::Bundle(bundle) => bundle,
        FeatureOutcome::Hold { reason } => {
            warn!(symbol, reason = %reason, "skipping analysis tick");
            return;
        }
    };

    let (system_prompt, user_prompt) = render_prompt(&bundle);
    let session_id = format!("{symbol}-{now_ms}");

    let (early_tx, mut early_rx) = mpsc::channel(1);
    let llm = state.llm.clone();
    let store = state.store.clone();
    let journal = state.journal.clone();
    let symbol_owned = symbol.to_string();

    let cycle = tokio::spawn(async move {
        run_decision_cycle(&llm, store.as_ref(), &journal, &symbol_owned, system_prompt, user_prompt, session_id, now_ms, early_tx).await
    });

    if let Some(decision) = early_rx.recv().await {
        info!(symbol, signal = ?decision.signal, confidence = decision.confidence, "decision received");
        if auto_execute {
            state.orchestrator.dispatch(decision).await;
        } else {
            info!(symbol, "auto-execute disabled, decision logged only");
        }
    }

    if let Err(e) = cycle.await {
        warn!(symbol, error = %e, "decision cycle task panicked");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = logging::init("data/logs", "agent");

    let cli_args: Vec<String> = std::env::args().skip(1).collect();
    let overrides = AgentArgs::parse(&cli_args);

    let env = EnvOverlay::load();
    let mut config = RuntimeConfig::load_or_default(CONFIG_PATH);
    overrides.apply(&mut config);

    if env.exchange.api_key.is_empty() || env.exchange.api_secret.is_empty() || env.exchange.passphrase.is_empty() {
        tracing::error!("missing exchange credentials (OKX_API_KEY/OKX_API_SECRET/OKX_PASSPHRASE); aborting before starting loops");
        std::process::exit(1);
    }

    info!(symbols = ?config.symbols, auto_execute = config.auto_execute, once = overrides.once, continuous = overrides.continuous, "trading agent starting");

    let state = AgentState::new(&config, &env, JOURNAL_PATH);
    state.collector.sync_clock().await;

    let (closed_tx, mut closed_rx) = mpsc::channel(CLOSED_NOTICE_CAPACITY);
    let (review_tx, mut review_rx) = mpsc::channel(REVIEW_CHANNEL_CAPACITY);
    spawn_background_caches(&state, config.symbols.clone(), closed_tx, review_tx);

    // Give the caches one cadence cycle to populate before the first tick.
    tokio::time::sleep(std::time::Duration::from_secs(5)).await;

    let (short_tf, long_tf) = short_long_timeframes(&config);
    let state = Arc::new(state);

    if !overrides.continuous {
        for symbol in &config.symbols {
            analyze_symbol(&state, symbol, &short_tf, &long_tf, config.data_freshness_threshold_secs, config.auto_execute).await;
        }
        drain_background_events(&state, &mut closed_rx, &mut review_rx).await;
        return Ok(());
    }

    info!(interval_secs = config.interval_secs, "entering continuous analysis loop");
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(config.interval_secs));
    loop {
        interval.tick().await;
        for symbol in &config.symbols {
            analyze_symbol(&state, symbol, &short_tf, &long_tf, config.data_freshness_threshold_secs, config.auto_execute).await;
        }
        drain_background_events(&state, &mut closed_rx, &mut review_rx).await;
    }
}
