// =============================================================================
// Structured logging setup — console + daily-rotating file, shared by both
// binaries
// =============================================================================
//
// Generalizes the teacher's `tracing_subscriber::fmt()...with_env_filter(...)`
// one-liner into two layers so every log record lands in both places, per
// the ambient-stack requirement that nothing here use bare `println!`. The
// returned `WorkerGuard` must be held for the life of the process — dropping
// it early silently stops the file writer mid-run.
// =============================================================================

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

pub fn init(log_dir: &str, file_prefix: &str) -> WorkerGuard {
    let _ = std::fs::create_dir_all(log_dir);
    let file_appender = tracing_appender::rolling::daily(log_dir, file_prefix);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer().with_target(true).with_filter(env_filter());
    let file_layer = fmt::layer().with_target(true).with_ansi(false).with_writer(non_blocking).with_filter(env_filter());

    tracing_subscriber::registry().with(console_layer).with(file_layer).init();

    guard
}
