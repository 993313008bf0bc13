//! Tracing subscriber setup

use anyhow::{Context, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

const DEFAULT_FILTER: &str = "warn";
const DAEMON_FILTER: &str = "info";

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Terminal output only, quiet unless `RUST_LOG` says otherwise
pub fn init_terminal() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(env_filter(DEFAULT_FILTER))
        .init();
}

/// Terminal plus a daily-rolling file under `logs_dir`
///
/// Keep the returned guard alive; dropping it flushes and stops the writer.
pub fn init_daemon(logs_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir).context("Failed to create logs directory")?;

    let appender = tracing_appender::rolling::daily(logs_dir, "quicksave.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .with(fmt::layer().with_writer(writer).with_ansi(false))
        .with(env_filter(DAEMON_FILTER))
        .init();

    Ok(guard)
}
