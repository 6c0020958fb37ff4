//! sidelock command-line management tool.
//!
//! Generates and validates configuration, shows what the daemon last
//! reported, lists claims and conflicts, manages watched folders and prints
//! the event log. None of these commands take or release claims.

mod conflicts;
mod history;
mod roots;
mod status;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use dialoguer::Confirm;
use tracing_subscriber::EnvFilter;

use sidelock_core::config::{expand_tilde, AppConfig, DetectorKind};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// sidelock command-line management tool.
#[derive(Parser, Debug)]
#[command(
    name = "sidelock",
    version,
    about = "Inspect and manage sidelock claims, conflicts and watched folders"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "~/.config/sidelock/config.toml"
    )]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate a default configuration file.
    Init {
        /// Output path (defaults to the --config path).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Overwrite an existing file without asking.
        #[arg(long)]
        force: bool,
    },

    /// Validate a configuration file.
    Validate,

    /// Show the daemon's last reported status.
    Status {
        /// Print the raw status snapshot as JSON.
        #[arg(long)]
        json: bool,
    },

    /// List every claim marker under the watched folders.
    Claims,

    /// Manage documents left with conflict backups.
    Conflicts {
        #[command(subcommand)]
        action: ConflictsAction,
    },

    /// Manage watched folders.
    Roots {
        #[command(subcommand)]
        action: RootsAction,
    },

    /// Show recent coordination events.
    Events {
        /// Maximum number of events to show.
        #[arg(short, long, default_value = "20")]
        limit: usize,

        /// Print events as JSON lines.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConflictsAction {
    /// List conflicted documents.
    List,
    /// Show the difference between the local and remote sides.
    Show {
        /// The conflicted document.
        document: PathBuf,
    },
    /// Keep one side and delete both backups.
    Resolve {
        /// The conflicted document.
        document: PathBuf,

        /// Side to keep: local or remote.
        #[arg(long)]
        accept: String,

        /// Do not ask for confirmation.
        #[arg(short, long)]
        yes: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RootsAction {
    /// List configured and added folders.
    List,
    /// Start watching a folder.
    Add { dir: PathBuf },
    /// Stop watching a folder added with `roots add`.
    Remove { dir: PathBuf },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> ExitCode {
    // Minimal logging for CLI
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .without_time()
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config_path = expand_tilde(&cli.config);
    match cli.command {
        Commands::Init { output, force } => {
            let output = output.map(|p| expand_tilde(&p)).unwrap_or(config_path);
            cmd_init(&output, force)
        }
        Commands::Validate => cmd_validate(&config_path),
        command => {
            let config = load_config(&config_path)?;
            match command {
                Commands::Status { json } => status::run_status(&config, json),
                Commands::Claims => status::run_claims(&config, &roots::effective(&config)?),
                Commands::Conflicts { action } => match action {
                    ConflictsAction::List => conflicts::run_list(&roots::effective(&config)?),
                    ConflictsAction::Show { document } => conflicts::run_show(&document),
                    ConflictsAction::Resolve {
                        document,
                        accept,
                        yes,
                    } => conflicts::run_resolve(&document, &accept, yes),
                },
                Commands::Roots { action } => match action {
                    RootsAction::List => roots::run_list(&config),
                    RootsAction::Add { dir } => roots::run_add(&config, &dir),
                    RootsAction::Remove { dir } => roots::run_remove(&config, &dir),
                },
                Commands::Events { limit, json } => history::run_events(&config, limit, json),
                Commands::Init { .. } | Commands::Validate => unreachable!(),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Config helpers
// ---------------------------------------------------------------------------

/// Load the config, falling back to defaults when the file does not exist so
/// read-only commands work before `sidelock init`.
fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        let mut config = AppConfig::default();
        config.resolve_paths();
        return Ok(config);
    }
    AppConfig::load_and_resolve(path).context("failed to load configuration file")
}

// ---------------------------------------------------------------------------
// Subcommand implementations
// ---------------------------------------------------------------------------

fn cmd_init(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        let overwrite = Confirm::new()
            .with_prompt(format!("{} already exists. Overwrite?", output.display()))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !overwrite {
            println!(
                "{}",
                style::warn("Init cancelled. Existing file was not modified.")
            );
            return Ok(());
        }
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(output, AppConfig::default_template())
        .context("failed to write config file")?;

    println!(
        "{}",
        style::success(&format!("Default configuration written to {}", output.display()))
    );
    println!();
    println!("Next steps:");
    println!("  1. Edit [watch] roots to point at your shared folder");
    println!(
        "  2. Validate with: sidelock validate --config {}",
        output.display()
    );
    println!(
        "  3. Start the daemon: sidelock-daemon --config {} start",
        output.display()
    );

    Ok(())
}

fn cmd_validate(config_path: &Path) -> Result<()> {
    println!("Validating configuration: {}", config_path.display());
    println!();

    let mut config =
        AppConfig::load_from_file(config_path).context("failed to parse configuration")?;
    println!("  [OK] TOML structure is valid");

    config.resolve_paths();
    match config.validate() {
        Ok(()) => println!("  [OK] All required fields are valid"),
        Err(e) => {
            println!("  [FAIL] Validation error: {}", e);
            anyhow::bail!("configuration validation failed");
        }
    }

    for root in &config.watch.roots {
        if !root.is_dir() {
            println!(
                "  {}",
                style::warn(&format!("watched folder does not exist: {}", root.display()))
            );
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Identity      : {}", config.participant.identity);
    println!("  Roots         : {}", config.watch.roots.len());
    println!("  Poll interval : {}ms", config.monitor.poll_interval_ms);
    println!("  Hash          : {}", config.monitor.hash_algorithm);
    let detector = match config.detector.kind {
        DetectorKind::Process => format!("process ({})", config.detector.extensions.join(", ")),
        DetectorKind::ListFile => format!(
            "list file ({})",
            config
                .detector
                .list_file
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        ),
    };
    println!("  Detector      : {}", detector);
    println!("  Data directory: {}", config.daemon.data_dir.display());
    println!();
    println!("Configuration is valid.");

    Ok(())
}
