//! Tick scheduler that owns the coordinator.
//!
//! The scheduler task is the only place the [`Coordinator`] lives. Everything
//! else (signal handling, the watch-list reloader, tests) talks to it through
//! a cloneable [`CoordinatorHandle`], so ticks and root changes are applied
//! one at a time in the order they arrive.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

use sidelock_core::{Coordinator, StatusSnapshot};

/// Requests accepted by the scheduler.
#[derive(Debug)]
pub enum Command {
    AddRoot(PathBuf),
    RemoveRoot(PathBuf),
    Status(oneshot::Sender<StatusSnapshot>),
    /// Run a tick now and restart the interval.
    TickNow,
    /// Release all claims and stop.
    Shutdown,
}

/// Cloneable sender side of the scheduler.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Command>,
}

impl CoordinatorHandle {
    async fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| anyhow!("scheduler has stopped"))
    }

    pub async fn add_root(&self, root: PathBuf) -> Result<()> {
        self.send(Command::AddRoot(root)).await
    }

    pub async fn remove_root(&self, root: PathBuf) -> Result<()> {
        self.send(Command::RemoveRoot(root)).await
    }

    pub async fn tick_now(&self) -> Result<()> {
        self.send(Command::TickNow).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown).await
    }

    /// Current status, as of the last processed command or tick.
    pub async fn status(&self) -> Result<StatusSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Status(reply)).await?;
        rx.await.map_err(|_| anyhow!("scheduler dropped the status request"))
    }
}

/// Running totals, logged at shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub reconciliations: u64,
    pub detector_failures: u64,
}

pub struct Scheduler {
    coordinator: Coordinator,
    poll_interval: Duration,
    rx: mpsc::Receiver<Command>,
    status_file: Option<PathBuf>,
    stats: SchedulerStats,
}

impl Scheduler {
    /// Wrap `coordinator`; the returned handle is the only way to reach it.
    pub fn new(
        coordinator: Coordinator,
        poll_interval: Duration,
        status_file: Option<PathBuf>,
    ) -> (Self, CoordinatorHandle) {
        let (tx, rx) = mpsc::channel(64);
        let scheduler = Self {
            coordinator,
            poll_interval,
            rx,
            status_file,
            stats: SchedulerStats::default(),
        };
        (scheduler, CoordinatorHandle { tx })
    }

    /// Main loop. Runs until a `Shutdown` command arrives or every handle is
    /// dropped, then releases all claims and hands the coordinator back.
    pub async fn run(mut self) -> (Coordinator, SchedulerStats) {
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            roots = self.coordinator.roots().len(),
            "scheduler started"
        );

        let mut interval = time::interval(self.poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_tick("scheduled");
                }
                command = self.rx.recv() => match command {
                    Some(Command::AddRoot(root)) => {
                        if self.coordinator.add_root(&root) {
                            self.write_status();
                        }
                    }
                    Some(Command::RemoveRoot(root)) => {
                        let reports = self.coordinator.remove_root(&root);
                        self.stats.reconciliations += reports.len() as u64;
                        self.write_status();
                    }
                    Some(Command::Status(reply)) => {
                        if reply.send(self.coordinator.status().clone()).is_err() {
                            debug!("status requester went away");
                        }
                    }
                    Some(Command::TickNow) => {
                        self.run_tick("requested");
                        interval.reset();
                    }
                    Some(Command::Shutdown) | None => break,
                },
            }
        }

        info!("scheduler stopping, releasing claims");
        let reports = self.coordinator.release_all();
        self.stats.reconciliations += reports.len() as u64;
        self.write_status();
        info!(
            ticks = self.stats.ticks,
            reconciliations = self.stats.reconciliations,
            detector_failures = self.stats.detector_failures,
            "scheduler stopped"
        );
        (self.coordinator, self.stats)
    }

    fn run_tick(&mut self, trigger: &str) {
        let report = self.coordinator.tick();
        self.stats.ticks += 1;
        self.stats.reconciliations += report.reconciled.len() as u64;
        if !report.detector_ok {
            self.stats.detector_failures += 1;
        }

        if !report.acquired.is_empty() || !report.released.is_empty() || !report.drifted.is_empty()
        {
            info!(
                trigger,
                acquired = report.acquired.len(),
                released = report.released.len(),
                drifted = report.drifted.len(),
                reconciled = report.reconciled.len(),
                "tick changed claims"
            );
        }
        self.write_status();
    }

    fn write_status(&self) {
        let Some(path) = &self.status_file else {
            return;
        };
        if let Err(e) = self.coordinator.status().write_to(path) {
            warn!(path = %path.display(), error = %e, "failed to write status file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sidelock_core::activity::ListFileDetector;
    use sidelock_core::artifacts::Sidecar;
    use sidelock_core::events::ChannelSink;
    use sidelock_core::hashing::HashAlgorithm;
    use sidelock_core::status::Indicator;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        list: PathBuf,
        status_file: PathBuf,
    }

    fn fixture() -> (Fixture, Coordinator) {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().canonicalize().unwrap();
        let root = base.join("shared");
        std::fs::create_dir(&root).unwrap();
        let list = base.join("open.txt");
        let status_file = base.join("state").join("status.json");

        let (sink, _rx) = ChannelSink::channel();
        let coordinator = Coordinator::new(
            "alice",
            HashAlgorithm::Sha256,
            vec![root.clone()],
            Box::new(ListFileDetector::new(&list)),
            Box::new(sink),
        );
        (
            Fixture {
                _dir: dir,
                root,
                list,
                status_file,
            },
            coordinator,
        )
    }

    #[tokio::test]
    async fn test_tick_now_and_status() {
        let (f, coordinator) = fixture();
        let doc = f.root.join("paper.lyx");
        std::fs::write(&doc, "A\n").unwrap();
        std::fs::write(&f.list, format!("{}\n", doc.display())).unwrap();

        let (scheduler, handle) = Scheduler::new(
            coordinator,
            Duration::from_secs(3600),
            Some(f.status_file.clone()),
        );
        let task = tokio::spawn(scheduler.run());

        handle.tick_now().await.unwrap();
        let status = handle.status().await.unwrap();
        assert_eq!(status.my_claims, vec![doc.clone()]);
        assert_eq!(status.indicator, Indicator::Editing);
        assert!(Sidecar::Lock.path_for(&doc).exists());

        let on_disk = StatusSnapshot::read_from(&f.status_file).unwrap();
        assert_eq!(on_disk.my_claims, vec![doc.clone()]);

        handle.shutdown().await.unwrap();
        let (coordinator, stats) = task.await.unwrap();
        assert!(coordinator.self_claimed().is_empty());
        assert!(stats.ticks >= 1);
        assert!(!Sidecar::Lock.path_for(&doc).exists());
        assert!(!Sidecar::Baseline.path_for(&doc).exists());
    }

    #[tokio::test]
    async fn test_root_commands_are_applied_in_order() {
        let (f, coordinator) = fixture();
        let extra = f.root.parent().unwrap().join("extra");
        std::fs::create_dir(&extra).unwrap();

        let (scheduler, handle) = Scheduler::new(coordinator, Duration::from_secs(3600), None);
        let task = tokio::spawn(scheduler.run());

        handle.add_root(extra.clone()).await.unwrap();
        assert_eq!(handle.status().await.unwrap().roots.len(), 2);
        handle.remove_root(f.root.clone()).await.unwrap();
        assert_eq!(handle.status().await.unwrap().roots, vec![extra]);

        drop(handle);
        let (coordinator, _) = task.await.unwrap();
        assert_eq!(coordinator.roots().len(), 1);
    }

    #[tokio::test]
    async fn test_handle_errors_after_stop() {
        let (_f, coordinator) = fixture();
        let (scheduler, handle) = Scheduler::new(coordinator, Duration::from_secs(3600), None);
        let task = tokio::spawn(scheduler.run());
        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(handle.status().await.is_err());
    }
}
