//! Status dashboard and claim listing.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};

use sidelock_core::artifacts::display_name;
use sidelock_core::claims::scan_claims;
use sidelock_core::{AppConfig, StatusSnapshot};

use super::style;

/// PID of a live daemon, if the PID file points at one.
pub fn daemon_pid(pid_file: &Path) -> Option<u32> {
    let pid: u32 = std::fs::read_to_string(pid_file).ok()?.trim().parse().ok()?;
    if cfg!(target_os = "linux") && !Path::new("/proc").join(pid.to_string()).exists() {
        return None;
    }
    Some(pid)
}

/// Show what the daemon last reported.
pub fn run_status(config: &AppConfig, json: bool) -> Result<()> {
    let status_file = config.daemon.status_file();
    let snapshot = if status_file.exists() {
        Some(
            StatusSnapshot::read_from(&status_file)
                .with_context(|| format!("failed to read {}", status_file.display()))?,
        )
    } else {
        None
    };

    if json {
        let value = serde_json::to_string_pretty(&snapshot)?;
        println!("{}", value);
        return Ok(());
    }

    println!();
    println!("{}", style::header("sidelock"));
    println!("{}", "═".repeat(8));
    println!();

    let daemon = match daemon_pid(&config.daemon.pid_file()) {
        Some(pid) => style::status_running(pid),
        None => style::status_stopped(),
    };
    println!("  Daemon     {}", daemon);
    println!("  Identity   {}", config.participant.identity);

    let Some(snapshot) = snapshot else {
        println!();
        println!(
            "  {}",
            style::dim("No status yet. Start the daemon with 'sidelock-daemon start'.")
        );
        println!();
        return Ok(());
    };

    let updated = snapshot
        .generated_at
        .with_timezone(&chrono::Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string();
    println!("  State      {}", style::indicator(snapshot.indicator));
    println!("  Updated    {}", style::dim(&updated));
    println!();

    for line in snapshot.summary().lines() {
        println!("  {}", line);
    }

    if !snapshot.pending_merges.is_empty() {
        println!();
        println!("  {}", style::header("Pending merges"));
        for doc in &snapshot.pending_merges {
            println!(
                "  {}",
                style::warn(&format!("{} changed remotely while open", display_name(doc)))
            );
        }
    }
    println!();
    Ok(())
}

/// Scan the roots for claim markers and print them as a table.
pub fn run_claims(config: &AppConfig, roots: &[std::path::PathBuf]) -> Result<()> {
    let claims = scan_claims(roots);
    if claims.is_empty() {
        println!();
        println!("{}", style::success("No documents are claimed"));
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Document", "Owner", "Path"]);

    for (doc, owner) in &claims {
        let owner_cell = if *owner == config.participant.identity {
            format!("{} (you)", owner)
        } else {
            style::owner(owner)
        };
        table.add_row(vec![
            Cell::new(display_name(doc)),
            Cell::new(owner_cell),
            Cell::new(doc.display().to_string()),
        ]);
    }

    println!();
    println!(
        "{}",
        style::header(&format!("Claimed Documents ({})", claims.len()))
    );
    println!();
    println!("{}", table);
    println!();
    Ok(())
}
