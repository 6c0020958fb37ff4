//! The per-participant coordinator: one tick of detect, claim, scan, drift.
//!
//! A [`Coordinator`] owns every piece of mutable coordination state (claims,
//! baselines, drift records, pending merges, watched roots). It is not
//! shared: whoever owns it runs the ticks, and other contexts reach it by
//! message passing (see the daemon's scheduler).
//!
//! Tick order:
//!
//! 1. Ask the activity detector which documents are open.
//! 2. Acquire newly opened documents, release ones no longer open.
//! 3. Rescan all markers and report other participants' claim changes.
//! 4. Check self-claimed documents for drift.
//! 5. Refresh the status snapshot.
//!
//! A failure for one document is logged or turned into an event and never
//! stops the rest of the tick.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::activity::{self, within_roots, ActivityDetector};
use crate::artifacts::Sidecar;
use crate::baseline::BaselineTracker;
use crate::claims::{diff_scans, scan_claims, Acquisition, ClaimChange, LockManager};
use crate::config::AppConfig;
use crate::errors::{ClaimError, ConfigError};
use crate::events::{Event, EventSink};
use crate::hashing::HashAlgorithm;
use crate::monitor::ChangeMonitor;
use crate::reconcile::{self, find_journals, ReconcileReport, WorkflowState};
use crate::status::StatusSnapshot;

/// What one tick did.
#[derive(Debug, Default)]
pub struct TickReport {
    pub acquired: Vec<PathBuf>,
    pub released: Vec<PathBuf>,
    pub drifted: Vec<PathBuf>,
    pub reconciled: Vec<ReconcileReport>,
    pub claim_changes: usize,
    /// `false` if the detector failed and claims were left as they were.
    pub detector_ok: bool,
    pub elapsed: Duration,
}

/// What a startup recovery pass did.
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Interrupted reconciliations that were resumed or aborted.
    pub resumed: Vec<ReconcileReport>,
    /// Documents whose marker from a previous run was taken over again.
    pub readopted: Vec<PathBuf>,
}

pub struct Coordinator {
    locks: LockManager,
    baselines: BaselineTracker,
    monitor: ChangeMonitor,
    roots: Vec<PathBuf>,
    detector: Box<dyn ActivityDetector>,
    sink: Box<dyn EventSink>,
    last_scan: BTreeMap<PathBuf, String>,
    status: StatusSnapshot,
}

impl Coordinator {
    pub fn new(
        identity: impl Into<String>,
        algorithm: HashAlgorithm,
        roots: Vec<PathBuf>,
        detector: Box<dyn ActivityDetector>,
        sink: Box<dyn EventSink>,
    ) -> Self {
        let identity = identity.into();
        let mut roots_out: Vec<PathBuf> = Vec::new();
        for root in roots {
            let root = normalize_root(&root);
            if !roots_out.contains(&root) {
                roots_out.push(root);
            }
        }

        let status = StatusSnapshot::build(
            &identity,
            &roots_out,
            Vec::new(),
            &BTreeMap::new(),
            Vec::new(),
        );

        Self {
            locks: LockManager::new(identity),
            baselines: BaselineTracker::new(algorithm),
            monitor: ChangeMonitor::new(algorithm),
            roots: roots_out,
            detector,
            sink,
            last_scan: BTreeMap::new(),
            status,
        }
    }

    /// Build a coordinator using the configured identity, hash and detector.
    pub fn from_config(
        config: &AppConfig,
        roots: Vec<PathBuf>,
        sink: Box<dyn EventSink>,
    ) -> Result<Self, ConfigError> {
        let detector = activity::from_config(&config.detector)?;
        info!(
            identity = %config.participant.identity,
            detector = detector.name(),
            roots = roots.len(),
            "coordinator configured"
        );
        Ok(Self::new(
            config.participant.identity.clone(),
            config.monitor.hash_algorithm,
            roots,
            detector,
            sink,
        ))
    }

    pub fn identity(&self) -> &str {
        self.locks.identity()
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn self_claimed(&self) -> &BTreeSet<PathBuf> {
        self.locks.self_claimed()
    }

    pub fn status(&self) -> &StatusSnapshot {
        &self.status
    }

    /// Replace the activity detector (tests swap in a scripted one).
    pub fn set_detector(&mut self, detector: Box<dyn ActivityDetector>) {
        self.detector = detector;
    }

    /// Where `document` is in its lifecycle, as far as this participant knows.
    pub fn workflow_state(&self, document: &Path) -> WorkflowState {
        if self.locks.is_self_claimed(document) {
            WorkflowState::claimed(self.monitor.pending_merge(document).is_some())
        } else {
            WorkflowState::Idle
        }
    }

    /// Start watching `root`. Returns `false` if it was already watched.
    pub fn add_root(&mut self, root: &Path) -> bool {
        let root = normalize_root(root);
        if self.roots.contains(&root) {
            return false;
        }
        info!(root = %root.display(), "watching root");
        self.roots.push(root);
        self.refresh_status();
        true
    }

    /// Stop watching `root`, releasing every claim we hold under it.
    pub fn remove_root(&mut self, root: &Path) -> Vec<ReconcileReport> {
        let root = normalize_root(root);
        let before = self.roots.len();
        self.roots.retain(|r| r != &root);
        if self.roots.len() == before {
            return Vec::new();
        }
        info!(root = %root.display(), "no longer watching root");

        let under: Vec<PathBuf> = self
            .locks
            .self_claimed()
            .iter()
            .filter(|doc| doc.starts_with(&root))
            .cloned()
            .collect();
        let reports: Vec<ReconcileReport> = under
            .iter()
            .filter_map(|doc| self.release(doc))
            .collect();

        self.last_scan.retain(|doc, _| !doc.starts_with(&root));
        self.refresh_status();
        reports
    }

    /// Claim `document` and snapshot its baseline.
    ///
    /// A failed baseline does not undo the claim; a later merge for the
    /// document then reports that no baseline was found.
    pub fn acquire(&mut self, document: &Path) -> Result<Acquisition, ClaimError> {
        let acquisition = self.locks.acquire(document)?;
        if acquisition == Acquisition::Claimed {
            // Snapshots from an earlier claim would be merged against the
            // new baseline; an in-flight journal keeps its own.
            if !Sidecar::Journal.path_for(document).exists() {
                discard_reconcile_snapshots(document);
            }
            match self.baselines.create(document) {
                Ok(baseline) => {
                    let hash = baseline.hash.clone();
                    self.monitor.track(document, hash);
                }
                Err(e) => warn!(path = %document.display(), error = %e, "claimed without a baseline"),
            }
        }
        Ok(acquisition)
    }

    /// Release our claim on `document`, reconciling a pending merge first.
    ///
    /// Idempotent. Returns the reconciliation report if one ran.
    pub fn release(&mut self, document: &Path) -> Option<ReconcileReport> {
        if let Err(e) = self.locks.release(document) {
            warn!(path = %document.display(), error = %e, "failed to remove marker");
        }

        let report = self.monitor.take_pending(document).map(|snapshot| {
            let report = reconcile::reconcile(document, &snapshot, self.locks.identity());
            self.sink.emit(&Event::reconciled(&report));
            report
        });

        self.baselines.remove(document);
        self.monitor.forget(document);
        report
    }

    /// Release every claim we hold. Used on shutdown.
    pub fn release_all(&mut self) -> Vec<ReconcileReport> {
        let held: Vec<PathBuf> = self.locks.self_claimed().iter().cloned().collect();
        if !held.is_empty() {
            info!(count = held.len(), "releasing all claims");
        }
        let reports: Vec<ReconcileReport> =
            held.iter().filter_map(|doc| self.release(doc)).collect();
        self.refresh_status();
        reports
    }

    /// Finish work a previous run left behind.
    ///
    /// Resumes our interrupted reconciliations, then takes back markers that
    /// still carry our identity together with their baseline and any pending
    /// external snapshot. Documents that are no longer open get released,
    /// and merged, on the next tick.
    pub fn recover(&mut self) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        for journal in find_journals(&self.roots) {
            let Some(resumed) = reconcile::resume(&journal, self.locks.identity()) else {
                continue;
            };
            self.sink.emit(&Event::reconciled(&resumed));
            self.baselines.remove(&resumed.document);
            self.monitor.forget(&resumed.document);
            report.resumed.push(resumed);
        }

        let own: Vec<PathBuf> = scan_claims(&self.roots)
            .into_iter()
            .filter(|(doc, owner)| owner == self.locks.identity() && !self.locks.is_self_claimed(doc))
            .map(|(doc, _)| doc)
            .collect();
        for document in own {
            if self.readopt(&document) {
                report.readopted.push(document);
            }
        }

        if !report.resumed.is_empty() || !report.readopted.is_empty() {
            info!(
                resumed = report.resumed.len(),
                readopted = report.readopted.len(),
                "recovery complete"
            );
        }
        self.refresh_status();
        report
    }

    fn readopt(&mut self, document: &Path) -> bool {
        match self.locks.acquire(document) {
            Ok(Acquisition::Claimed) => {}
            Ok(Acquisition::HeldByOther { owner }) => {
                debug!(path = %document.display(), %owner, "marker changed hands before readoption");
                return false;
            }
            Err(e) => {
                warn!(path = %document.display(), error = %e, "cannot readopt claim");
                return false;
            }
        }

        let adopted = match self.baselines.adopt(document) {
            Ok(Some(_)) => true,
            Ok(None) => self.baselines.create(document).is_ok(),
            Err(e) => {
                warn!(path = %document.display(), error = %e, "cannot adopt baseline");
                false
            }
        };
        if !adopted {
            return true;
        }

        // Track from the bytes on disk now so the restart itself is not
        // reported as drift.
        match self.baselines.algorithm().digest_file(document) {
            Ok(hash) => self.monitor.track(document, hash),
            Err(e) => warn!(path = %document.display(), error = %e, "cannot hash readopted document"),
        }

        // Only a snapshot captured during this claim, i.e. after the
        // baseline was taken, is still a pending merge.
        let snapshot = Sidecar::RemoteVersion.path_for(document);
        if snapshot.exists() {
            let taken_at = self.baselines.get(document).map(|b| b.taken_at);
            match (modified_at(&snapshot), taken_at) {
                (Some(captured), Some(taken)) if captured >= taken => {
                    info!(path = %document.display(), "restoring pending merge");
                    self.monitor.restore_pending(document, snapshot);
                }
                _ => discard_reconcile_snapshots(document),
            }
        }
        true
    }

    /// Run one full tick.
    pub fn tick(&mut self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        let open = match self.detector.open_documents() {
            Ok(raw) => {
                report.detector_ok = true;
                Some(within_roots(&raw, &self.roots))
            }
            Err(e) => {
                warn!(detector = self.detector.name(), error = %e, "activity detection failed, keeping claims as they are");
                None
            }
        };
        let detect_elapsed = started.elapsed();

        if let Some(open) = open {
            self.reconcile_claims(&open, &mut report);
        }
        let claims_elapsed = started.elapsed();

        let scan = scan_claims(&self.roots);
        let identity = self.locks.identity();
        for change in diff_scans(&self.last_scan, &scan, self.locks.self_claimed()) {
            // Markers carrying our own identity (just released, or left by
            // a previous run) are not another participant's doing.
            let event = match &change {
                ClaimChange::ClaimedByOther { document, owner } if owner != identity => {
                    Event::claimed_by_other(document, owner)
                }
                ClaimChange::ReleasedByOther { document }
                    if self.last_scan.get(document).map(String::as_str) != Some(identity) =>
                {
                    Event::released_by_other(document)
                }
                _ => continue,
            };
            report.claim_changes += 1;
            self.sink.emit(&event);
        }
        self.last_scan = scan;

        self.check_drift(&mut report);
        self.refresh_status();

        report.elapsed = started.elapsed();
        debug!(
            detect_ms = detect_elapsed.as_millis() as u64,
            claims_ms = (claims_elapsed - detect_elapsed).as_millis() as u64,
            total_ms = report.elapsed.as_millis() as u64,
            "tick complete"
        );
        report
    }

    fn reconcile_claims(&mut self, open: &BTreeSet<PathBuf>, report: &mut TickReport) {
        let newly_open: Vec<PathBuf> = open
            .iter()
            .filter(|doc| !self.locks.is_self_claimed(doc))
            .cloned()
            .collect();
        for document in newly_open {
            match self.acquire(&document) {
                Ok(Acquisition::Claimed) => report.acquired.push(document),
                Ok(Acquisition::HeldByOther { owner }) => {
                    debug!(path = %document.display(), %owner, "open document is claimed by another participant");
                }
                Err(e) => warn!(path = %document.display(), error = %e, "acquire failed"),
            }
        }

        let closed: Vec<PathBuf> = self
            .locks
            .self_claimed()
            .iter()
            .filter(|doc| !open.contains(*doc))
            .cloned()
            .collect();
        for document in closed {
            if let Some(reconciled) = self.release(&document) {
                report.reconciled.push(reconciled);
            }
            report.released.push(document);
        }
    }

    fn check_drift(&mut self, report: &mut TickReport) {
        let held: Vec<PathBuf> = self
            .locks
            .self_claimed()
            .iter()
            .filter(|doc| self.baselines.has_snapshot(doc))
            .cloned()
            .collect();
        for document in held {
            match self.monitor.check(&document) {
                Ok(Some(drift)) => {
                    self.sink.emit(&Event::drift(&drift));
                    report.drifted.push(document);
                }
                Ok(None) => {}
                Err(e) => warn!(path = %document.display(), error = %e, "drift check failed"),
            }
        }
    }

    /// Rebuild the status snapshot from current state.
    pub fn refresh_status(&mut self) {
        self.status = StatusSnapshot::build(
            self.locks.identity(),
            &self.roots,
            self.locks.self_claimed().iter().cloned(),
            &self.last_scan,
            self.monitor.pending_documents(),
        );
    }
}

/// Remove `.remote_version` / `.local_version` left by an earlier claim.
fn discard_reconcile_snapshots(document: &Path) {
    for kind in [Sidecar::RemoteVersion, Sidecar::LocalVersion] {
        let path = kind.path_for(document);
        match std::fs::remove_file(&path) {
            Ok(()) => warn!(path = %path.display(), "discarded snapshot from an earlier claim"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to discard stale snapshot"),
        }
    }
}

fn modified_at(path: &Path) -> Option<DateTime<Utc>> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .map(DateTime::<Utc>::from)
}

/// Canonical form of a root when it exists, the path as given otherwise.
fn normalize_root(root: &Path) -> PathBuf {
    root.canonicalize().unwrap_or_else(|_| root.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::StaticDetector;
    use crate::events::{ChannelSink, EventKind};
    use crate::merge::MergeStatus;
    use tokio::sync::mpsc::UnboundedReceiver;

    struct Harness {
        _dir: tempfile::TempDir,
        root: PathBuf,
        coordinator: Coordinator,
        events: UnboundedReceiver<Event>,
    }

    impl Harness {
        fn new(identity: &str) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().canonicalize().unwrap();
            let (sink, events) = ChannelSink::channel();
            let coordinator = Coordinator::new(
                identity,
                HashAlgorithm::Sha256,
                vec![root.clone()],
                Box::new(StaticDetector::default()),
                Box::new(sink),
            );
            Self {
                _dir: dir,
                root,
                coordinator,
                events,
            }
        }

        fn doc(&self, name: &str, content: &str) -> PathBuf {
            let path = self.root.join(name);
            std::fs::write(&path, content).unwrap();
            path
        }

        fn open<P: AsRef<Path>>(&mut self, docs: &[P]) {
            let open: Vec<PathBuf> = docs.iter().map(|d| d.as_ref().to_path_buf()).collect();
            self.coordinator
                .set_detector(Box::new(StaticDetector::new(open)));
        }

        fn close_all(&mut self) {
            self.open::<PathBuf>(&[]);
        }

        fn drain(&mut self) -> Vec<EventKind> {
            let mut kinds = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                kinds.push(event.kind);
            }
            kinds
        }
    }

    #[test]
    fn test_open_then_close_leaves_no_sidecars() {
        let mut h = Harness::new("alice");
        let doc = h.doc("paper.lyx", "A\n");

        h.open(&[&doc]);
        let report = h.coordinator.tick();
        assert_eq!(report.acquired, vec![doc.clone()]);
        assert!(Sidecar::Lock.path_for(&doc).exists());
        assert!(Sidecar::Baseline.path_for(&doc).exists());
        assert_eq!(h.coordinator.workflow_state(&doc), WorkflowState::Editing);

        h.close_all();
        let report = h.coordinator.tick();
        assert_eq!(report.released, vec![doc.clone()]);
        assert!(report.reconciled.is_empty());
        assert!(crate::artifacts::existing_sidecars(&doc).is_empty());
        assert_eq!(h.coordinator.workflow_state(&doc), WorkflowState::Idle);
    }

    #[test]
    fn test_drift_then_release_merges() {
        let mut h = Harness::new("alice");
        let doc = h.doc("paper.lyx", "A\nB\nC\n");
        h.open(&[&doc]);
        h.coordinator.tick();

        // A remote edit syncs in while we hold the claim.
        std::fs::write(&doc, "A\nB\nY\n").unwrap();
        let report = h.coordinator.tick();
        assert_eq!(report.drifted, vec![doc.clone()]);
        assert_eq!(h.coordinator.workflow_state(&doc), WorkflowState::DriftDetected);
        assert_eq!(h.coordinator.status().pending_merges, vec![doc.clone()]);

        // The editor, unaware of it, saves its own change and closes.
        std::fs::write(&doc, "A\nX\nC\n").unwrap();
        h.close_all();
        let report = h.coordinator.tick();
        assert_eq!(report.reconciled.len(), 1);
        assert_eq!(report.reconciled[0].outcome.status, MergeStatus::Success);
        assert_eq!(std::fs::read_to_string(&doc).unwrap(), "A\nX\nY\n");
        assert!(!Sidecar::Baseline.path_for(&doc).exists());
        assert!(!Sidecar::RemoteVersion.path_for(&doc).exists());
        assert!(h.drain().contains(&EventKind::MergeSucceeded));
    }

    #[test]
    fn test_foreign_claim_reported_and_not_acquired() {
        let mut h = Harness::new("alice");
        let doc = h.doc("paper.lyx", "A\n");
        std::fs::write(Sidecar::Lock.path_for(&doc), "bob").unwrap();

        h.open(&[&doc]);
        let report = h.coordinator.tick();
        assert!(report.acquired.is_empty());
        assert_eq!(report.claim_changes, 1);
        assert_eq!(
            h.drain(),
            vec![EventKind::ClaimedByOther {
                owner: "bob".into()
            }]
        );
        assert_eq!(
            h.coordinator.status().indicator,
            crate::status::Indicator::LockedByOthers
        );

        std::fs::remove_file(Sidecar::Lock.path_for(&doc)).unwrap();
        h.close_all();
        h.coordinator.tick();
        assert_eq!(h.drain(), vec![EventKind::ReleasedByOther]);
    }

    #[test]
    fn test_detector_failure_keeps_claims() {
        let mut h = Harness::new("alice");
        let doc = h.doc("paper.lyx", "A\n");
        h.open(&[&doc]);
        h.coordinator.tick();

        let mut failing = StaticDetector::default();
        failing.set_failing(true);
        h.coordinator.set_detector(Box::new(failing));
        let report = h.coordinator.tick();
        assert!(!report.detector_ok);
        assert!(report.released.is_empty());
        assert!(h.coordinator.self_claimed().contains(&doc));
    }

    #[test]
    fn test_release_all_and_double_release() {
        let mut h = Harness::new("alice");
        let a = h.doc("a.lyx", "A\n");
        let b = h.doc("b.lyx", "B\n");
        h.open(&[&a, &b]);
        h.coordinator.tick();

        h.coordinator.release_all();
        assert!(h.coordinator.self_claimed().is_empty());
        assert!(!Sidecar::Lock.path_for(&a).exists());
        assert!(!Sidecar::Lock.path_for(&b).exists());
        assert!(h.coordinator.release(&a).is_none());
    }

    #[test]
    fn test_remove_root_releases_claims_under_it() {
        let mut h = Harness::new("alice");
        let doc = h.doc("paper.lyx", "A\n");
        h.open(&[&doc]);
        h.coordinator.tick();

        let root = h.root.clone();
        assert!(!h.coordinator.add_root(&root));
        h.coordinator.remove_root(&root);
        assert!(h.coordinator.roots().is_empty());
        assert!(h.coordinator.self_claimed().is_empty());
        assert!(!Sidecar::Lock.path_for(&doc).exists());
    }

    #[test]
    fn test_recover_readopts_interrupted_claim() {
        let mut h = Harness::new("alice");
        let doc = h.doc("paper.lyx", "A\nB\nC\n");
        // A previous run held the claim and had captured a remote change.
        std::fs::write(Sidecar::Lock.path_for(&doc), "alice").unwrap();
        std::fs::write(Sidecar::Baseline.path_for(&doc), "A\nB\nC\n").unwrap();
        std::fs::write(Sidecar::RemoteVersion.path_for(&doc), "A\nB\nY\n").unwrap();
        std::fs::write(&doc, "A\nX\nC\n").unwrap();

        let report = h.coordinator.recover();
        assert_eq!(report.readopted, vec![doc.clone()]);
        assert_eq!(h.coordinator.workflow_state(&doc), WorkflowState::DriftDetected);

        h.close_all();
        let tick = h.coordinator.tick();
        assert_eq!(tick.reconciled.len(), 1);
        assert_eq!(std::fs::read_to_string(&doc).unwrap(), "A\nX\nY\n");
        assert!(!Sidecar::Lock.path_for(&doc).exists());
    }

    fn backdate(path: &Path, by: Duration) {
        let file = std::fs::File::options().write(true).open(path).unwrap();
        file.set_modified(std::time::SystemTime::now() - by).unwrap();
    }

    #[test]
    fn test_recover_discards_snapshot_older_than_baseline() {
        let mut h = Harness::new("alice");
        let doc = h.doc("paper.lyx", "C\n");
        std::fs::write(Sidecar::Lock.path_for(&doc), "alice").unwrap();
        std::fs::write(Sidecar::Baseline.path_for(&doc), "C\n").unwrap();
        // Left behind by a reconciliation that ran before this claim.
        let stale = Sidecar::RemoteVersion.path_for(&doc);
        std::fs::write(&stale, "B\n").unwrap();
        backdate(&stale, Duration::from_secs(3600));

        let report = h.coordinator.recover();
        assert_eq!(report.readopted, vec![doc.clone()]);
        assert_eq!(h.coordinator.workflow_state(&doc), WorkflowState::Editing);
        assert!(!stale.exists());

        h.close_all();
        let tick = h.coordinator.tick();
        assert!(tick.reconciled.is_empty());
        assert_eq!(std::fs::read_to_string(&doc).unwrap(), "C\n");
    }

    #[test]
    fn test_claim_clears_leftover_snapshots() {
        let mut h = Harness::new("alice");
        let doc = h.doc("paper.lyx", "C\n");
        std::fs::write(Sidecar::RemoteVersion.path_for(&doc), "B\n").unwrap();
        std::fs::write(Sidecar::LocalVersion.path_for(&doc), "C\n").unwrap();

        h.open(&[&doc]);
        let report = h.coordinator.tick();
        assert_eq!(report.acquired, vec![doc.clone()]);
        assert!(!Sidecar::RemoteVersion.path_for(&doc).exists());
        assert!(!Sidecar::LocalVersion.path_for(&doc).exists());
        assert_eq!(h.coordinator.workflow_state(&doc), WorkflowState::Editing);
    }
}
