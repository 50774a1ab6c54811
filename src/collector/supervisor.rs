// =============================================================================
// Collector supervisor — restart loop wrapping the two WebSocket sessions
// =============================================================================
//
// Owns both sessions plus the watchdog, per §4.5. On a clean shutdown signal
// the loop exits; on a watchdog-triggered timeout it cancels both sessions,
// waits up to 5s for them to unwind, sleeps 5s, and starts a fresh instance —
// up to `max_restarts` times, matching scenario S6.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::collector::session::{run_business_session, run_public_session, CollectorHandles};
use crate::collector::watchdog::Watchdog;

const WATCHDOG_INTERVAL: Duration = Duration::from_secs(30);
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
const RESTART_DELAY: Duration = Duration::from_secs(5);

pub struct SupervisorConfig {
    pub symbols: Vec<String>,
    pub timeframes: Vec<String>,
    pub data_timeout_secs: u64,
    pub max_restarts: u32,
}

/// Run the collector until a clean shutdown signal, or until `max_restarts`
/// is exceeded (in which case an error is returned so `main` can exit 1).
pub async fn run(config: SupervisorConfig, handles: Arc<CollectorHandles>) -> Result<()> {
    let mut restarts: u32 = 0;

    loop {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let watchdog = Arc::new(Watchdog::new(
            handles.clone(),
            config.symbols.clone(),
            config.timeframes.clone(),
            config.data_timeout_secs,
        ));

        let public = tokio::spawn(run_public_session(config.symbols.clone(), handles.clone(), cancel_rx.clone()));
        let business = tokio::spawn(run_business_session(
            config.symbols.clone(),
            config.timeframes.clone(),
            handles.clone(),
            cancel_rx.clone(),
        ));

        let need_restart = watch_until_restart_or_shutdown(&watchdog).await;

        let _ = cancel_tx.send(true);
        let unwound = tokio::time::timeout(SHUTDOWN_GRACE, async {
            let _ = public.await;
            let _ = business.await;
        })
        .await;
        if unwound.is_err() {
            warn!("collector tasks did not exit within the shutdown grace period");
        }

        if !need_restart {
            info!("collector shut down cleanly");
            return Ok(());
        }

        restarts += 1;
        if restarts > config.max_restarts {
            error!(restarts, max_restarts = config.max_restarts, "restart cap exceeded");
            anyhow::bail!("collector restart cap exceeded after {restarts} restarts");
        }
        warn!(restarts, "restarting collector in {}s", RESTART_DELAY.as_secs());
        tokio::time::sleep(RESTART_DELAY).await;
    }
}

/// Wait for either a watchdog-triggered staleness restart or an OS shutdown
/// signal. Returns `true` if a restart is needed, `false` on clean shutdown.
async fn watch_until_restart_or_shutdown(watchdog: &Arc<Watchdog>) -> bool {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(WATCHDOG_INTERVAL) => {
                let now_ms = chrono::Utc::now().timestamp_millis();
                if watchdog.check(now_ms) {
                    return true;
                }
            }
            _ = shutdown_signal() => {
                info!("shutdown signal received");
                return false;
            }
        }
    }
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut int = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    tokio::select! {
        _ = int.recv() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
