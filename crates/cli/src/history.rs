//! Recent coordination events from the daemon's event log.

use anyhow::{Context, Result};

use sidelock_core::events::read_events;
use sidelock_core::{AppConfig, EventKind};

use super::style;

pub fn run_events(config: &AppConfig, limit: usize, json: bool) -> Result<()> {
    let path = config.daemon.events_file();
    let events = read_events(&path, limit)
        .with_context(|| format!("failed to read {}", path.display()))?;

    if json {
        for event in &events {
            println!("{}", serde_json::to_string(event)?);
        }
        return Ok(());
    }

    if events.is_empty() {
        println!("No events recorded.");
        return Ok(());
    }

    println!();
    println!(
        "{}",
        style::header(&format!("Recent Events (last {})", events.len()))
    );
    println!();

    for event in &events {
        let timestamp = event
            .at
            .with_timezone(&chrono::Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string();
        let title = match &event.kind {
            EventKind::MergeSucceeded => style::success(event.kind.title()),
            EventKind::MergeFailed => style::error(event.kind.title()),
            EventKind::MergeConflicted | EventKind::DriftDetected => {
                style::warn(event.kind.title())
            }
            EventKind::ClaimedByOther { .. } | EventKind::ReleasedByOther => {
                event.kind.title().to_string()
            }
        };
        let message = event.message.replace('\n', " ");
        println!("  {}  {}  {}", style::dim(&timestamp), title, message);
    }

    println!();
    Ok(())
}
