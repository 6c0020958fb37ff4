//! Sidelock daemon entry point.
//!
//! Loads configuration, recovers anything a previous run left behind, then
//! runs the tick scheduler until a shutdown signal arrives.

mod daemon;
mod logging;
mod reloader;
mod scheduler;
mod signals;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use sidelock_core::config::{expand_tilde, AppConfig};
use sidelock_core::events::{FanoutSink, JsonlSink, TracingSink};
use sidelock_core::watch_list::{effective_roots, WatchList};
use sidelock_core::{Coordinator, StatusSnapshot};

use crate::scheduler::Scheduler;

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// Sidelock coordination daemon.
#[derive(Parser, Debug)]
#[command(
    name = "sidelock-daemon",
    version,
    about = "Advisory claims and reconciliation for documents in a synced folder"
)]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(short, long, default_value = "~/.config/sidelock/config.toml")]
    config: PathBuf,

    /// Override the log level from the config file (trace, debug, info, warn, error).
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start the daemon.
    Start {
        /// Run in the foreground (default is to detach).
        #[arg(long)]
        foreground: bool,

        /// Log to the rolling file in the data directory instead of stdout.
        #[arg(long, hide = true)]
        log_to_file: bool,
    },

    /// Stop the running daemon, releasing its claims.
    Stop,

    /// Show whether the daemon is running and what it holds.
    Status,

    /// Run one tick and exit. Claims stay on disk and are taken over by the
    /// next run.
    Tick,

    /// Resume interrupted reconciliations and exit.
    Recover,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config_path = expand_tilde(&args.config);
    let config = AppConfig::load_and_resolve(&config_path).with_context(|| {
        format!(
            "failed to load configuration (create one with `sidelock init --output {}`)",
            config_path.display()
        )
    })?;

    let log_dir = match &args.command {
        Commands::Start {
            log_to_file: true, ..
        } => Some(config.daemon.log_dir()),
        _ => None,
    };
    let _guard = logging::init(
        args.log_level.as_deref(),
        &config.daemon.log_level,
        log_dir.as_deref(),
    )?;

    match args.command {
        Commands::Start { foreground, .. } => {
            if foreground {
                cmd_start(&config_path, config).await
            } else {
                cmd_spawn(&config_path, &config, args.log_level.as_deref())
            }
        }
        Commands::Stop => cmd_stop(&config),
        Commands::Status => cmd_status(&config),
        Commands::Tick => cmd_tick(&config),
        Commands::Recover => cmd_recover(&config),
    }
}

/// Configured roots plus the persisted watch list.
fn load_roots(config: &AppConfig) -> Result<Vec<PathBuf>> {
    let persisted = WatchList::load(&config.daemon.watch_list_file())
        .context("failed to load watch list")?;
    Ok(effective_roots(&config.watch.roots, &persisted))
}

fn build_coordinator(config: &AppConfig) -> Result<Coordinator> {
    std::fs::create_dir_all(&config.daemon.data_dir).with_context(|| {
        format!(
            "failed to create data directory: {}",
            config.daemon.data_dir.display()
        )
    })?;

    let roots = load_roots(config)?;
    if roots.is_empty() {
        warn!("no watched roots configured; add one with `sidelock roots add <dir>`");
    }
    let sink = FanoutSink::new()
        .with(TracingSink)
        .with(JsonlSink::new(config.daemon.events_file()));
    Coordinator::from_config(config, roots, Box::new(sink)).context("failed to set up coordinator")
}

// ---------------------------------------------------------------------------
// Subcommands
// ---------------------------------------------------------------------------

fn cmd_spawn(config_path: &Path, config: &AppConfig, log_level: Option<&str>) -> Result<()> {
    if let Some(pid) = daemon::is_running(&config.daemon.pid_file())? {
        anyhow::bail!("daemon is already running (PID {})", pid);
    }
    let pid = daemon::spawn_background(config_path, log_level)?;
    println!("Daemon started in the background (PID {})", pid);
    println!("Logs: {}", config.daemon.log_dir().display());
    Ok(())
}

async fn cmd_start(config_path: &Path, config: AppConfig) -> Result<()> {
    let pid_file = config.daemon.pid_file();
    if let Some(pid) = daemon::is_running(&pid_file)? {
        if pid != std::process::id() {
            anyhow::bail!("daemon is already running (PID {})", pid);
        }
    }

    let mut coordinator = build_coordinator(&config)?;
    let poll_interval = config.monitor.poll_interval();

    info!("========================================");
    info!("  Sidelock Daemon v{}", env!("CARGO_PKG_VERSION"));
    info!("========================================");
    info!("Config file   : {}", config_path.display());
    info!("Identity      : {}", config.participant.identity);
    info!("Roots         : {}", coordinator.roots().len());
    info!("Poll interval : {}ms", config.monitor.poll_interval_ms);
    info!("Hash          : {}", config.monitor.hash_algorithm);
    info!("Data dir      : {}", config.daemon.data_dir.display());
    info!("========================================");

    daemon::write_pid_file(&pid_file)?;

    let recovery = coordinator.recover();
    if !recovery.resumed.is_empty() || !recovery.readopted.is_empty() {
        info!(
            resumed = recovery.resumed.len(),
            readopted = recovery.readopted.len(),
            "recovered state from previous run"
        );
    }

    // The reloader diffs un-normalized lists, so seed it with one.
    let initial_roots = load_roots(&config)?;
    let (scheduler, handle) =
        Scheduler::new(coordinator, poll_interval, Some(config.daemon.status_file()));
    let scheduler_handle = tokio::spawn(scheduler.run());

    let reloader_handle = tokio::spawn(reloader::run(
        handle.clone(),
        config.daemon.watch_list_file(),
        config.watch.roots.clone(),
        initial_roots,
        Duration::from_secs(2),
    ));

    signals::wait_for_shutdown().await;
    info!("Shutdown signal received, stopping...");

    reloader_handle.abort();
    if let Err(e) = handle.shutdown().await {
        warn!(error = %e, "scheduler already stopped");
    }

    match tokio::time::timeout(Duration::from_secs(30), scheduler_handle).await {
        Ok(Ok((_, stats))) => info!(ticks = stats.ticks, "scheduler stopped gracefully"),
        Ok(Err(e)) => warn!("scheduler task error: {}", e),
        Err(_) => warn!("scheduler did not stop within 30s, forcing shutdown"),
    }

    daemon::remove_pid_file(&pid_file)?;
    info!("Sidelock daemon stopped.");
    Ok(())
}

fn cmd_stop(config: &AppConfig) -> Result<()> {
    match daemon::stop_daemon(&config.daemon.pid_file())? {
        true => {
            info!("daemon stopped successfully");
            println!("✓ Daemon stopped, claims released");
        }
        false => println!("Daemon is not running"),
    }
    Ok(())
}

fn cmd_status(config: &AppConfig) -> Result<()> {
    match daemon::is_running(&config.daemon.pid_file())? {
        Some(pid) => println!("● Running (PID {})", pid),
        None => println!("○ Not running"),
    }

    let status_file = config.daemon.status_file();
    if status_file.exists() {
        let status = StatusSnapshot::read_from(&status_file)
            .with_context(|| format!("failed to read {}", status_file.display()))?;
        println!(
            "Last update: {}",
            status.generated_at.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
        );
        println!("{}", status.summary());
    }
    Ok(())
}

fn cmd_tick(config: &AppConfig) -> Result<()> {
    if let Some(pid) = daemon::is_running(&config.daemon.pid_file())? {
        anyhow::bail!("daemon is running (PID {}); it already ticks", pid);
    }

    let mut coordinator = build_coordinator(config)?;
    coordinator.recover();
    let report = coordinator.tick();
    coordinator
        .status()
        .write_to(&config.daemon.status_file())
        .context("failed to write status file")?;

    println!(
        "acquired {}, released {}, drifted {}, reconciled {} ({} ms)",
        report.acquired.len(),
        report.released.len(),
        report.drifted.len(),
        report.reconciled.len(),
        report.elapsed.as_millis()
    );
    for reconciled in &report.reconciled {
        println!(
            "  {} [{}]: {}",
            reconciled.document.display(),
            reconciled.outcome.status,
            reconciled.outcome.message.replace('\n', " ")
        );
    }
    println!("{}", coordinator.status().summary());
    Ok(())
}

fn cmd_recover(config: &AppConfig) -> Result<()> {
    if let Some(pid) = daemon::is_running(&config.daemon.pid_file())? {
        anyhow::bail!("daemon is running (PID {}); it recovers at startup", pid);
    }

    let mut coordinator = build_coordinator(config)?;
    let report = coordinator.recover();
    if report.resumed.is_empty() && report.readopted.is_empty() {
        println!("Nothing to recover");
        return Ok(());
    }
    for resumed in &report.resumed {
        println!(
            "resumed {} [{}]: {}",
            resumed.document.display(),
            resumed.outcome.status,
            resumed.outcome.message.replace('\n', " ")
        );
    }
    for document in &report.readopted {
        println!("took back claim on {}", document.display());
    }
    Ok(())
}
