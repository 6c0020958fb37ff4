//! Picks up edits to the persisted watch list while the daemon runs.
//!
//! `sidelock roots add|remove` rewrites `watch_list.json`; this task notices
//! the change and forwards the difference to the scheduler as root commands.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use tokio::time;
use tracing::{debug, info, warn};

use sidelock_core::watch_list::{effective_roots, WatchList};

use crate::scheduler::CoordinatorHandle;

/// Roots to add and remove to go from `old` to `new`.
pub fn diff_roots(old: &[PathBuf], new: &[PathBuf]) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let added = new.iter().filter(|r| !old.contains(r)).cloned().collect();
    let removed = old.iter().filter(|r| !new.contains(r)).cloned().collect();
    (added, removed)
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Poll `watch_list` every `period` until the scheduler goes away.
pub async fn run(
    handle: CoordinatorHandle,
    watch_list: PathBuf,
    configured: Vec<PathBuf>,
    mut current: Vec<PathBuf>,
    period: Duration,
) {
    let mut last_modified = modified(&watch_list);
    let mut interval = time::interval(period);
    interval.tick().await;

    loop {
        interval.tick().await;

        let stamp = modified(&watch_list);
        if stamp == last_modified {
            continue;
        }
        last_modified = stamp;

        let persisted = match WatchList::load(&watch_list) {
            Ok(list) => list,
            Err(e) => {
                warn!(path = %watch_list.display(), error = %e, "ignoring unreadable watch list");
                continue;
            }
        };
        let wanted = effective_roots(&configured, &persisted);
        let (added, removed) = diff_roots(&current, &wanted);
        if added.is_empty() && removed.is_empty() {
            debug!("watch list touched without root changes");
            continue;
        }

        info!(added = added.len(), removed = removed.len(), "watch list changed");
        for root in added {
            if handle.add_root(root).await.is_err() {
                return;
            }
        }
        for root in removed {
            if handle.remove_root(root).await.is_err() {
                return;
            }
        }
        current = wanted;
    }
}
