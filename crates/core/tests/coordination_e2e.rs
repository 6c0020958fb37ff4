//! End-to-end tests for two participants coordinating through one folder.
//!
//! The sync layer is modelled as a directory both coordinators watch, so
//! every write is "propagated" instantly. Claim races are modelled with two
//! replica directories and an explicit copy standing in for a late sync.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

use sidelock_core::activity::StaticDetector;
use sidelock_core::artifacts::{existing_sidecars, Sidecar};
use sidelock_core::claims::{scan_claims, Acquisition, LockManager};
use sidelock_core::config::{AppConfig, DetectorKind};
use sidelock_core::events::ChannelSink;
use sidelock_core::hashing::HashAlgorithm;
use sidelock_core::reconcile::{
    resolve_conflict, ConflictRecord, Journal, JournalPhase, Side, WorkflowState,
};
use sidelock_core::{Coordinator, Event, EventKind, MergeStatus};

// ===========================================================================
// Helpers
// ===========================================================================

struct Participant {
    coordinator: Coordinator,
    events: UnboundedReceiver<Event>,
}

impl Participant {
    fn new(identity: &str, root: &Path) -> Self {
        let (sink, events) = ChannelSink::channel();
        let coordinator = Coordinator::new(
            identity,
            HashAlgorithm::Sha256,
            vec![root.to_path_buf()],
            Box::new(StaticDetector::default()),
            Box::new(sink),
        );
        Self {
            coordinator,
            events,
        }
    }

    fn editing(&mut self, docs: &[&PathBuf]) {
        let open: Vec<PathBuf> = docs.iter().map(|d| (*d).clone()).collect();
        self.coordinator
            .set_detector(Box::new(StaticDetector::new(open)));
    }

    fn idle(&mut self) {
        self.editing(&[]);
    }

    fn events(&mut self) -> Vec<EventKind> {
        let mut kinds = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            kinds.push(event.kind);
        }
        kinds
    }
}

fn shared_folder() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    (dir, root)
}

fn write(path: &Path, content: &str) {
    std::fs::write(path, content).unwrap();
}

fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

// ===========================================================================
// Claims between participants
// ===========================================================================

#[test]
fn test_second_participant_sees_claim_and_waits() {
    let (_dir, root) = shared_folder();
    let doc = root.join("thesis.lyx");
    write(&doc, "intro\n");

    let mut alice = Participant::new("alice", &root);
    let mut bob = Participant::new("bob", &root);

    alice.editing(&[&doc]);
    alice.coordinator.tick();
    assert_eq!(read(&Sidecar::Lock.path_for(&doc)), "alice");

    bob.editing(&[&doc]);
    let report = bob.coordinator.tick();
    assert!(report.acquired.is_empty());
    assert_eq!(
        bob.events(),
        vec![EventKind::ClaimedByOther {
            owner: "alice".into()
        }]
    );
    assert_eq!(bob.coordinator.status().other_claims.len(), 1);
    assert!(alice.coordinator.status().other_claims.is_empty());

    alice.idle();
    alice.coordinator.tick();

    // Bob still has it open: his next tick claims it. The marker now names
    // a document he holds, so no foreign-claim event is raised for it.
    let report = bob.coordinator.tick();
    assert_eq!(report.acquired, vec![doc.clone()]);
    assert!(bob.events().is_empty());
    assert_eq!(read(&Sidecar::Lock.path_for(&doc)), "bob");
}

#[test]
fn test_claim_race_both_succeed() {
    // Two replicas of the same folder before the sync layer has caught up.
    let alice_dir = TempDir::new().unwrap();
    let bob_dir = TempDir::new().unwrap();
    let alice_doc = alice_dir.path().join("thesis.lyx");
    let bob_doc = bob_dir.path().join("thesis.lyx");
    write(&alice_doc, "v1\n");
    write(&bob_doc, "v1\n");

    let mut alice = LockManager::new("alice");
    let mut bob = LockManager::new("bob");
    assert_eq!(alice.acquire(&alice_doc).unwrap(), Acquisition::Claimed);
    assert_eq!(bob.acquire(&bob_doc).unwrap(), Acquisition::Claimed);
    assert!(alice.is_self_claimed(&alice_doc));
    assert!(bob.is_self_claimed(&bob_doc));

    // The sync layer lands bob's marker on alice's replica; alice's release
    // leaves it alone.
    std::fs::copy(
        Sidecar::Lock.path_for(&bob_doc),
        Sidecar::Lock.path_for(&alice_doc),
    )
    .unwrap();
    assert!(!alice.release(&alice_doc).unwrap());
    let claims = scan_claims(&[alice_dir.path().to_path_buf()]);
    assert_eq!(claims.get(&alice_doc).map(String::as_str), Some("bob"));
}

#[test]
fn test_stale_marker_excluded_from_scan() {
    let (_dir, root) = shared_folder();
    let doc = root.join("gone.lyx");
    write(&doc, "x\n");
    write(&Sidecar::Lock.path_for(&doc), "carol");
    assert_eq!(scan_claims(&[root.clone()]).len(), 1);

    std::fs::remove_file(&doc).unwrap();
    assert!(scan_claims(&[root]).is_empty());
}

// ===========================================================================
// Drift and reconciliation
// ===========================================================================

#[test]
fn test_acquire_release_without_drift_leaves_nothing() {
    let (_dir, root) = shared_folder();
    let doc = root.join("notes.lyx");
    write(&doc, "a\nb\n");

    let mut alice = Participant::new("alice", &root);
    alice.coordinator.acquire(&doc).unwrap();
    assert!(alice.coordinator.release(&doc).is_none());
    assert!(alice.coordinator.release(&doc).is_none());

    assert!(existing_sidecars(&doc).is_empty());
    assert_eq!(read(&doc), "a\nb\n");
}

#[test]
fn test_concurrent_edit_on_different_lines_merges() {
    let (_dir, root) = shared_folder();
    let doc = root.join("thesis.lyx");
    write(&doc, "title\nbody\nend\n");

    let mut alice = Participant::new("alice", &root);
    alice.editing(&[&doc]);
    alice.coordinator.tick();

    // Bob ignored the claim; his save syncs in.
    write(&doc, "title\nbody\nend, revised\n");
    alice.coordinator.tick();
    assert_eq!(alice.events(), vec![EventKind::DriftDetected]);

    // Alice's editor still has the old text plus her own change.
    write(&doc, "better title\nbody\nend\n");
    alice.idle();
    let report = alice.coordinator.tick();

    assert_eq!(report.reconciled.len(), 1);
    assert_eq!(report.reconciled[0].state, WorkflowState::Merged);
    assert_eq!(read(&doc), "better title\nbody\nend, revised\n");
    assert_eq!(
        read(&Sidecar::PreMergeBackup.path_for(&doc)),
        "title\nbody\nend, revised\n"
    );
    let left: Vec<Sidecar> = existing_sidecars(&doc).into_iter().map(|(k, _)| k).collect();
    assert_eq!(left, vec![Sidecar::PreMergeBackup]);
    assert_eq!(alice.events(), vec![EventKind::MergeSucceeded]);
}

#[test]
fn test_concurrent_edit_on_same_line_conflicts() {
    let (_dir, root) = shared_folder();
    let doc = root.join("thesis.lyx");
    write(&doc, "title\n");

    let mut alice = Participant::new("alice", &root);
    alice.editing(&[&doc]);
    alice.coordinator.tick();

    write(&doc, "bob's title\n");
    alice.coordinator.tick();
    write(&doc, "alice's title\n");
    alice.idle();
    let report = alice.coordinator.tick();

    let outcome = &report.reconciled[0].outcome;
    assert_eq!(outcome.status, MergeStatus::Conflict);
    assert_eq!(outcome.conflicts, 1);
    assert_eq!(read(&doc), "bob's title\n");
    assert_eq!(read(&Sidecar::LocalBackup.path_for(&doc)), "alice's title\n");
    assert_eq!(read(&Sidecar::RemoteBackup.path_for(&doc)), "bob's title\n");
    assert!(!Sidecar::Baseline.path_for(&doc).exists());
    assert!(!Sidecar::Lock.path_for(&doc).exists());
    assert_eq!(alice.events(), vec![EventKind::DriftDetected, EventKind::MergeConflicted]);
}

// ===========================================================================
// Recovery
// ===========================================================================

#[test]
fn test_recover_resumes_staged_reconciliation() {
    let (_dir, root) = shared_folder();
    let doc = root.join("thesis.lyx");

    // Crash after the remote snapshot replaced the live document.
    write(&Sidecar::Baseline.path_for(&doc), "one\ntwo\n");
    write(&Sidecar::LocalVersion.path_for(&doc), "ONE\ntwo\n");
    write(&Sidecar::RemoteVersion.path_for(&doc), "one\nTWO\n");
    write(&doc, "one\nTWO\n");
    let mut journal = Journal::begin(&doc, "alice", &Sidecar::RemoteVersion.path_for(&doc));
    journal.advance(JournalPhase::Staged).unwrap();

    let mut alice = Participant::new("alice", &root);
    let report = alice.coordinator.recover();

    assert_eq!(report.resumed.len(), 1);
    assert!(report.resumed[0].recovered);
    assert_eq!(report.resumed[0].state, WorkflowState::Merged);
    assert_eq!(read(&doc), "ONE\nTWO\n");
    assert!(!Sidecar::Journal.path_for(&doc).exists());
    assert!(!Sidecar::Baseline.path_for(&doc).exists());
    assert_eq!(alice.events(), vec![EventKind::MergeSucceeded]);
}

#[test]
fn test_recover_ignores_other_participants_journal() {
    let (_dir, root) = shared_folder();
    let doc = root.join("thesis.lyx");
    write(&doc, "x\n");
    let journal = Journal::begin(&doc, "bob", &Sidecar::RemoteVersion.path_for(&doc));
    journal.save().unwrap();

    let mut alice = Participant::new("alice", &root);
    let report = alice.coordinator.recover();
    assert!(report.resumed.is_empty());
    assert!(journal.path().exists());
}

#[test]
fn test_resolved_conflict_is_not_replayed_after_restart() {
    let (_dir, root) = shared_folder();
    let doc = root.join("thesis.lyx");
    write(&doc, "title\n");

    let mut alice = Participant::new("alice", &root);
    alice.editing(&[&doc]);
    alice.coordinator.tick();
    write(&doc, "bob's title\n");
    alice.coordinator.tick();
    write(&doc, "alice's title\n");
    alice.idle();
    let report = alice.coordinator.tick();
    assert_eq!(report.reconciled[0].outcome.status, MergeStatus::Conflict);

    let record = ConflictRecord::for_document(&doc).unwrap();
    resolve_conflict(&record, Side::Local).unwrap();
    assert_eq!(read(&doc), "alice's title\n");

    // Claim again, then crash without releasing.
    let mut restarted = Participant::new("alice", &root);
    restarted.editing(&[&doc]);
    assert_eq!(restarted.coordinator.tick().acquired, vec![doc.clone()]);
    drop(restarted);

    let mut recovered = Participant::new("alice", &root);
    let recovery = recovered.coordinator.recover();
    assert_eq!(recovery.readopted, vec![doc.clone()]);
    assert_eq!(recovered.coordinator.workflow_state(&doc), WorkflowState::Editing);

    recovered.idle();
    let report = recovered.coordinator.tick();
    assert_eq!(report.released, vec![doc.clone()]);
    assert!(report.reconciled.is_empty());
    assert_eq!(read(&doc), "alice's title\n");
    assert!(!Sidecar::RemoteVersion.path_for(&doc).exists());
    assert!(!Sidecar::Lock.path_for(&doc).exists());
}

// ===========================================================================
// Configuration-driven setup
// ===========================================================================

#[test]
fn test_list_file_detector_from_config() {
    let (_dir, root) = shared_folder();
    let doc = root.join("paper.lyx");
    write(&doc, "x\n");
    let list = root.join("open-documents.txt");

    let mut config = AppConfig::default();
    config.participant.identity = "alice".into();
    config.detector.kind = DetectorKind::ListFile;
    config.detector.list_file = Some(list.clone());
    config.validate().unwrap();

    let (sink, _events) = ChannelSink::channel();
    let mut coordinator =
        Coordinator::from_config(&config, vec![root.clone()], Box::new(sink)).unwrap();

    assert!(coordinator.tick().acquired.is_empty());
    write(&list, &format!("{}\n", doc.display()));
    assert_eq!(coordinator.tick().acquired, vec![doc.clone()]);
    write(&list, "");
    assert_eq!(coordinator.tick().released, vec![doc.clone()]);
}
