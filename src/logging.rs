//! Tracing setup: a non-blocking rolling daily file appender under
//! `DAYMON_DATA_DIR/logs`, plus stderr, both filtered by `RUST_LOG`
//! (default `info`).

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Guard must be kept alive for the lifetime of the process; the non-blocking
/// writer stops flushing once it is dropped.
pub fn init(data_dir: &Path) -> anyhow::Result<WorkerGuard> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "daymon.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_ansi(true))
        .with(fmt::layer().with_target(true).with_ansi(false).with_writer(non_blocking))
        .init();

    Ok(guard)
}
