//! Tracing setup: stdout in the foreground, a daily rolling file when
//! running detached.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Pick the filter: explicit `--log-level`, then `RUST_LOG`, then config.
fn filter(cli_level: Option<&str>, config_level: &str) -> EnvFilter {
    if let Some(level) = cli_level {
        return EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    }
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber.
///
/// With `log_dir` set, output goes to `<log_dir>/sidelock-daemon.log.<date>`
/// through a non-blocking writer; the returned guard must be held until exit
/// so buffered lines are flushed.
pub fn init(
    cli_level: Option<&str>,
    config_level: &str,
    log_dir: Option<&Path>,
) -> Result<Option<WorkerGuard>> {
    let filter = filter(cli_level, config_level);

    match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory: {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "sidelock-daemon.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(true)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .init();
            Ok(None)
        }
    }
}
