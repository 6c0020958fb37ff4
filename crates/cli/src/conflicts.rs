//! Manual conflict management.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use comfy_table::{presets::UTF8_FULL, Cell, ContentArrangement, Table};
use dialoguer::Confirm;

use sidelock_core::artifacts::display_name;
use sidelock_core::reconcile::{find_conflicts, resolve_conflict, ConflictRecord, Side};

use super::style;

/// List conflicted documents under `roots`.
pub fn run_list(roots: &[PathBuf]) -> Result<()> {
    let conflicts = find_conflicts(roots);

    if conflicts.is_empty() {
        println!();
        println!("{}", style::success("No active conflicts"));
        println!();
        return Ok(());
    }

    println!();
    println!(
        "{}",
        style::header(&format!("Active Conflicts ({})", conflicts.len()))
    );
    println!();

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Document", "Detected", "Path"]);

    for c in &conflicts {
        let detected = c
            .detected_at
            .map(|t| {
                t.with_timezone(&chrono::Local)
                    .format("%Y-%m-%d %H:%M")
                    .to_string()
            })
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(display_name(&c.document)),
            Cell::new(detected),
            Cell::new(c.document.display().to_string()),
        ]);
    }

    println!("{}", table);
    println!();
    println!(
        "{}",
        style::dim("Resolve with: sidelock conflicts resolve <document> --accept local|remote")
    );
    println!();
    Ok(())
}

/// Print both backups' locations and the local → remote diff.
pub fn run_show(document: &Path) -> Result<()> {
    let record = lookup(document)?;
    let diff = record.diff().context("failed to diff conflict backups")?;

    println!("Conflict: {}", display_name(&record.document));
    println!("==========={}", "=".repeat(display_name(&record.document).len()));
    println!();
    println!("  Document      : {}", record.document.display());
    println!("  Local backup  : {}", record.local_backup.display());
    println!("  Remote backup : {}", record.remote_backup.display());
    println!();
    if diff.lines().count() <= 2 {
        println!("{}", style::dim("Backups are identical."));
    } else {
        print!("{}", diff);
    }
    Ok(())
}

/// Keep one side of a conflict.
pub fn run_resolve(document: &Path, accept: &str, yes: bool) -> Result<()> {
    let side: Side = accept.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    let record = lookup(document)?;

    if !yes {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Overwrite {} with the {} version and delete both backups?",
                display_name(&record.document),
                side
            ))
            .default(false)
            .interact()
            .context("failed to read confirmation")?;
        if !confirmed {
            println!("{}", style::warn("Resolution cancelled. Nothing was changed."));
            return Ok(());
        }
    }

    match resolve_conflict(&record, side) {
        Ok(()) => {
            println!(
                "{}",
                style::success(&format!(
                    "{} resolved (accepted {})",
                    display_name(&record.document),
                    side
                ))
            );
            Ok(())
        }
        Err(e) => {
            println!("{}", style::error(&e.to_string()));
            anyhow::bail!("conflict resolution failed")
        }
    }
}

fn lookup(document: &Path) -> Result<ConflictRecord> {
    let document = document
        .canonicalize()
        .unwrap_or_else(|_| document.to_path_buf());
    ConflictRecord::for_document(&document).ok_or_else(|| {
        anyhow::anyhow!(
            "no conflict recorded for '{}' (expected .remote_backup and .local_backup beside it)",
            document.display()
        )
    })
}
