//! Sidelock core library.
//!
//! Coordinates editing of documents in a folder shared through a passive
//! sync service: advisory claims via sidecar lock markers, claim-time
//! baselines, polling drift detection, a three-way line merge and the
//! reconciliation that runs when a drifted document's claim is released.

pub mod activity;
pub mod artifacts;
pub mod baseline;
pub mod claims;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod hashing;
pub mod merge;
pub mod monitor;
pub mod reconcile;
pub mod status;
pub mod watch_list;

// Re-exports for convenience.
pub use config::AppConfig;
pub use coordinator::{Coordinator, RecoveryReport, TickReport};
pub use errors::CoreError;
pub use events::{Event, EventKind, EventSink};
pub use merge::{MergeOutcome, MergeStatus};
pub use status::StatusSnapshot;
pub use watch_list::WatchList;
