//! Three-way merge of a document against its claim-time baseline.
//!
//! [`engine`] is the pure line merge; [`document`] applies it to files.

pub mod document;
pub mod engine;

pub use document::{merge_document, try_merge_document, MergeOutcome, MergeStatus};
pub use engine::{split_lines, LineMerge, LineMerger, Resolution};
