//! Tracing setup

use std::path::PathBuf;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use garn_core::config::LogLevel;

/// Set up tracing with two layers:
/// - Console: controlled by RUST_LOG, else by `--log-level`
/// - File: debug-level JSON to ~/.garn/logs/ (skipped when `file_log` is off)
pub fn init_tracing(
    level: LogLevel,
    file_log: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console_filter = console_filter(level);

    if let Some(log_dir) = log_directory().filter(|_| file_log) {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "garn.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        tracing_subscriber::registry()
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_filter(console_filter),
            )
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .with_filter(EnvFilter::new("debug")),
            )
            .init();

        return Some(guard);
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_filter(console_filter),
        )
        .init();

    None
}

fn console_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_filter()))
}

/// Returns the log directory path, creating it if needed.
fn log_directory() -> Option<PathBuf> {
    let log_dir = dirs::home_dir()?.join(".garn").join("logs");
    std::fs::create_dir_all(&log_dir).ok()?;
    Some(log_dir)
}
