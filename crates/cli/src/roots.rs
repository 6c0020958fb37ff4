//! Watched-root management through the persisted watch list.
//!
//! A running daemon polls the watch list and applies changes on its own.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use sidelock_core::watch_list::{effective_roots, WatchList};
use sidelock_core::AppConfig;

use super::style;

/// Configured plus persisted roots.
pub fn effective(config: &AppConfig) -> Result<Vec<PathBuf>> {
    let persisted = WatchList::load(&config.daemon.watch_list_file())
        .context("failed to load watch list")?;
    Ok(effective_roots(&config.watch.roots, &persisted))
}

pub fn run_list(config: &AppConfig) -> Result<()> {
    let persisted = WatchList::load(&config.daemon.watch_list_file())
        .context("failed to load watch list")?;
    let roots = effective_roots(&config.watch.roots, &persisted);

    if roots.is_empty() {
        println!("No watched folders. Add one with: sidelock roots add <dir>");
        return Ok(());
    }

    println!("{}", style::header("Watched folders"));
    for root in &roots {
        let origin = if config.watch.roots.contains(root) {
            "config"
        } else {
            "added"
        };
        let missing = if root.is_dir() { "" } else { "  (missing)" };
        println!(
            "  {}  {}{}",
            root.display(),
            style::dim(origin),
            style::dim(missing)
        );
    }
    Ok(())
}

pub fn run_add(config: &AppConfig, dir: &Path) -> Result<()> {
    let root = dir
        .canonicalize()
        .with_context(|| format!("cannot watch '{}'", dir.display()))?;
    if !root.is_dir() {
        anyhow::bail!("'{}' is not a directory", root.display());
    }

    let path = config.daemon.watch_list_file();
    let mut list = WatchList::load(&path).context("failed to load watch list")?;
    if config.watch.roots.contains(&root) || !list.add(root.clone()) {
        println!("{}", style::warn(&format!("{} is already watched", root.display())));
        return Ok(());
    }
    list.save(&path).context("failed to save watch list")?;
    println!("{}", style::success(&format!("Watching {}", root.display())));
    Ok(())
}

pub fn run_remove(config: &AppConfig, dir: &Path) -> Result<()> {
    let root = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());

    let path = config.daemon.watch_list_file();
    let mut list = WatchList::load(&path).context("failed to load watch list")?;
    if !list.remove(&root) {
        if config.watch.roots.contains(&root) {
            anyhow::bail!(
                "'{}' comes from the config file; remove it from [watch] roots instead",
                root.display()
            );
        }
        println!("{}", style::warn(&format!("{} was not watched", root.display())));
        return Ok(());
    }
    list.save(&path).context("failed to save watch list")?;
    println!(
        "{}",
        style::success(&format!("Stopped watching {}", root.display()))
    );
    Ok(())
}
