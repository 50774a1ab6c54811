// =============================================================================
// Collector binary — standalone C1-C5 live-data service
// =============================================================================
//
// Connects to the exchange, syncs the clock, repairs any unconfirmed klines
// left over from a previous run, backfills gaps in the requested history
// window, then hands off to the restart supervisor for the life of the
// process. Exit code mirrors the supervisor's own contract: 0 on a clean
// shutdown signal, 1 if the restart cap was exceeded.
// =============================================================================

use std::sync::Arc;

use tracing::{error, info, warn};

use okx_swap_agent::app_state::CollectorState;
use okx_swap_agent::collector::supervisor::{run as run_supervisor, SupervisorConfig};
use okx_swap_agent::logging;
use okx_swap_agent::market_data::kline_store::{self, history_days_for};
use okx_swap_agent::runtime_config::{CollectorArgs, EnvOverlay, RuntimeConfig};

const CONFIG_PATH: &str = "data/config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = logging::init("data/logs", "collector");

    let cli_args: Vec<String> = std::env::args().skip(1).collect();
    let overrides = CollectorArgs::parse(&cli_args);

    let env = EnvOverlay::load();
    let mut config = RuntimeConfig::load_or_default(CONFIG_PATH);
    overrides.apply(&mut config);

    if env.exchange.api_key.is_empty() || env.exchange.api_secret.is_empty() || env.exchange.passphrase.is_empty() {
        error!("missing exchange credentials (OKX_API_KEY/OKX_API_SECRET/OKX_PASSPHRASE); aborting before starting loops");
        std::process::exit(1);
    }

    info!(symbols = ?config.symbols, timeframes = ?config.timeframes, "collector starting");

    let collector = CollectorState::new(&env);
    collector.sync_clock().await;
    let now_ms = collector.handles.time_sync.now_ms();

    if let Err(e) = kline_store::repair_unconfirmed(&collector.client, &collector.handles.klines, now_ms).await {
        warn!(error = %e, "startup kline repair failed, continuing with gaps");
    }

    for symbol in &config.symbols {
        for timeframe in &config.timeframes {
            let window_days = history_days_for(timeframe).min(config.history_days as i64);
            let bar_ms = kline_store::timeframe_ms(timeframe);
            let start_ms = now_ms - window_days * 86_400_000;
            let end_ms = now_ms - now_ms % bar_ms;

            let gaps = collector.handles.klines.detect_missing_ranges(symbol, timeframe, start_ms, end_ms);
            if gaps.is_empty() {
                continue;
            }
            info!(symbol = %symbol, timeframe = %timeframe, gap_count = gaps.len(), "backfilling kline gaps");
            for (t_lo, t_hi) in gaps {
                match kline_store::backfill_gap(&collector.client, &collector.handles.klines, symbol, timeframe, t_lo, t_hi, now_ms).await {
                    Ok(inserted) => info!(symbol = %symbol, timeframe = %timeframe, t_lo, t_hi, inserted, "backfill gap complete"),
                    Err(e) => warn!(symbol = %symbol, timeframe = %timeframe, t_lo, t_hi, error = %e, "backfill gap failed"),
                }
            }
        }
    }

    let supervisor_config = SupervisorConfig {
        symbols: config.symbols.clone(),
        timeframes: config.timeframes.clone(),
        data_timeout_secs: config.data_timeout_secs,
        max_restarts: config.max_restarts,
    };

    match run_supervisor(supervisor_config, Arc::clone(&collector.handles)).await {
        Ok(()) => {
            info!("collector shut down cleanly");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "collector exceeded max restarts, exiting with failure");
            std::process::exit(1);
        }
    }
}
