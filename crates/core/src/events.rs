//! User-facing events and the sinks that deliver them.
//!
//! Sinks never fail the caller: a sink that cannot deliver logs and moves on,
//! so one broken channel does not stall the tick.

use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::artifacts::display_name;
use crate::merge::MergeStatus;
use crate::monitor::DriftEvent;
use crate::reconcile::ReconcileReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    DriftDetected,
    ClaimedByOther { owner: String },
    ReleasedByOther,
    MergeSucceeded,
    MergeConflicted,
    MergeFailed,
}

impl EventKind {
    /// Short title, as shown in a notification header.
    pub fn title(&self) -> &'static str {
        match self {
            Self::DriftDetected => "External change detected",
            Self::ClaimedByOther { .. } => "File locked",
            Self::ReleasedByOther => "File unlocked",
            Self::MergeSucceeded => "Merge successful",
            Self::MergeConflicted => "Conflict detected",
            Self::MergeFailed => "Merge error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub at: DateTime<Utc>,
    pub document: PathBuf,
    #[serde(flatten)]
    pub kind: EventKind,
    pub message: String,
}

impl Event {
    pub fn new(document: &Path, kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            document: document.to_path_buf(),
            kind,
            message: message.into(),
        }
    }

    pub fn drift(drift: &DriftEvent) -> Self {
        Self::new(
            &drift.document,
            EventKind::DriftDetected,
            format!(
                "{} was modified by another user.\nChanges will be merged when you close the file.",
                display_name(&drift.document)
            ),
        )
    }

    pub fn claimed_by_other(document: &Path, owner: &str) -> Self {
        Self::new(
            document,
            EventKind::ClaimedByOther {
                owner: owner.to_string(),
            },
            format!("{} locked by {owner}", display_name(document)),
        )
    }

    pub fn released_by_other(document: &Path) -> Self {
        Self::new(
            document,
            EventKind::ReleasedByOther,
            format!("{} unlocked", display_name(document)),
        )
    }

    pub fn reconciled(report: &ReconcileReport) -> Self {
        let kind = match report.outcome.status {
            MergeStatus::Success => EventKind::MergeSucceeded,
            MergeStatus::Conflict => EventKind::MergeConflicted,
            MergeStatus::Error => EventKind::MergeFailed,
        };
        Self::new(
            &report.document,
            kind,
            format!("{}: {}", display_name(&report.document), report.outcome.message),
        )
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.title(), self.message)
    }
}

/// Receives events as they happen.
pub trait EventSink: Send {
    fn emit(&self, event: &Event);
}

/// Logs every event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &Event) {
        match event.kind {
            EventKind::MergeConflicted | EventKind::MergeFailed => warn!(
                path = %event.document.display(),
                title = event.kind.title(),
                "{}",
                event.message
            ),
            _ => info!(
                path = %event.document.display(),
                title = event.kind.title(),
                "{}",
                event.message
            ),
        }
    }
}

/// Appends events as JSON lines to a file.
#[derive(Debug, Clone)]
pub struct JsonlSink {
    path: PathBuf,
}

impl JsonlSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append(&self, event: &Event) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)
    }
}

impl EventSink for JsonlSink {
    fn emit(&self, event: &Event) {
        if let Err(e) = self.append(event) {
            warn!(path = %self.path.display(), error = %e, "failed to append event");
        }
    }
}

/// Forwards events into a tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// A sink plus the receiver for its events.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: &Event) {
        if self.tx.send(event.clone()).is_err() {
            debug!("event receiver dropped");
        }
    }
}

/// Dispatches to every inner sink.
#[derive(Default)]
pub struct FanoutSink {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanoutSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl EventSink for FanoutSink {
    fn emit(&self, event: &Event) {
        for sink in &self.sinks {
            sink.emit(event);
        }
    }
}

/// Read the last `limit` events from a JSON-lines file.
///
/// A missing file yields no events; malformed lines are skipped.
pub fn read_events(path: &Path, limit: usize) -> std::io::Result<Vec<Event>> {
    let file = match std::fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut events = Vec::new();
    for line in std::io::BufReader::new(file).lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => events.push(event),
            Err(e) => debug!(error = %e, "skipping malformed event line"),
        }
    }

    let skip = events.len().saturating_sub(limit);
    Ok(events.split_off(skip))
}
