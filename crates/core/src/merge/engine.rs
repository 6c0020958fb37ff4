//! Index-aligned three-way line merge.
//!
//! Lines are compared exactly, terminators included, position by position.
//! The baseline decides which side changed a given position; a position
//! that both sides changed, to different values, is a conflict and blocks
//! the whole merge. There is no alignment step, so an insertion on one side
//! shifts every later position; that is the intended, predictable behaviour
//! for documents edited in place.

use tracing::debug;

/// Split text into lines, each keeping its `\n` terminator.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n').collect()
}

/// Why a clean merge produced the lines it did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Remote equals baseline: the local version is kept as-is.
    RemoteUnchanged,
    /// Local equals baseline: the remote version is adopted as-is.
    LocalUnchanged,
    /// Both sides changed disjoint positions and were combined.
    Combined,
}

/// Result of merging three line sequences.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineMerge<'a> {
    Clean {
        lines: Vec<&'a str>,
        resolution: Resolution,
    },
    /// Positions (0-based) changed differently on both sides.
    Conflict { indices: Vec<usize> },
}

impl<'a> LineMerge<'a> {
    pub fn is_clean(&self) -> bool {
        matches!(self, Self::Clean { .. })
    }
}

/// Stateless three-way line merger.
pub struct LineMerger;

impl LineMerger {
    /// Merge `local` and `remote` against their common `base`.
    pub fn merge<'a>(base: &[&'a str], local: &[&'a str], remote: &[&'a str]) -> LineMerge<'a> {
        if remote == base {
            debug!("remote == base, keeping local");
            return LineMerge::Clean {
                lines: local.to_vec(),
                resolution: Resolution::RemoteUnchanged,
            };
        }
        if local == base {
            debug!("local == base, adopting remote");
            return LineMerge::Clean {
                lines: remote.to_vec(),
                resolution: Resolution::LocalUnchanged,
            };
        }

        let indices = Self::conflicts(base, local, remote);
        if !indices.is_empty() {
            debug!(count = indices.len(), "conflicting positions found");
            return LineMerge::Conflict { indices };
        }

        LineMerge::Clean {
            lines: Self::combine(base, local, remote),
            resolution: Resolution::Combined,
        }
    }

    /// Positions where both sides left the baseline and disagree.
    ///
    /// Missing trailing lines compare as the empty string.
    pub fn conflicts(base: &[&str], local: &[&str], remote: &[&str]) -> Vec<usize> {
        let len = base.len().max(local.len()).max(remote.len());
        (0..len)
            .filter(|&i| {
                let b = base.get(i).copied().unwrap_or("");
                let l = local.get(i).copied().unwrap_or("");
                let r = remote.get(i).copied().unwrap_or("");
                b != l && b != r && l != r
            })
            .collect()
    }

    /// Pick one line per position; absent choices drop the position.
    fn combine<'a>(base: &[&'a str], local: &[&'a str], remote: &[&'a str]) -> Vec<&'a str> {
        let len = base.len().max(local.len()).max(remote.len());
        let mut merged = Vec::with_capacity(len);

        for i in 0..len {
            let b = base.get(i).copied();
            let l = local.get(i).copied();
            let r = remote.get(i).copied();

            let chosen = if l == r {
                l
            } else if l == b {
                r
            } else if r == b {
                l
            } else {
                // Screened out above; kept so the function is total.
                l.or(r)
            };

            if let Some(line) = chosen {
                merged.push(line);
            }
        }

        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clean_lines<'a>(merge: LineMerge<'a>) -> Vec<&'a str> {
        match merge {
            LineMerge::Clean { lines, .. } => lines,
            LineMerge::Conflict { indices } => panic!("unexpected conflict at {indices:?}"),
        }
    }

    #[test]
    fn test_remote_unchanged_keeps_local() {
        let base = ["A", "B"];
        let local = ["A", "X", "Z"];
        let merge = LineMerger::merge(&base, &local, &base);
        assert_eq!(
            merge,
            LineMerge::Clean {
                lines: vec!["A", "X", "Z"],
                resolution: Resolution::RemoteUnchanged
            }
        );
    }

    #[test]
    fn test_local_unchanged_adopts_remote() {
        let base = ["A", "B", "C"];
        let remote = ["Q"];
        let merge = LineMerger::merge(&base, &base, &remote);
        assert_eq!(
            merge,
            LineMerge::Clean {
                lines: vec!["Q"],
                resolution: Resolution::LocalUnchanged
            }
        );
    }

    #[test]
    fn test_disjoint_changes_combine() {
        let merged = clean_lines(LineMerger::merge(
            &["A", "B", "C"],
            &["A", "X", "C"],
            &["A", "B", "Y"],
        ));
        assert_eq!(merged, vec!["A", "X", "Y"]);
    }

    #[test]
    fn test_single_line_conflict() {
        let merge = LineMerger::merge(&["A"], &["X"], &["Y"]);
        assert_eq!(merge, LineMerge::Conflict { indices: vec![0] });
    }

    #[test]
    fn test_identical_change_is_not_a_conflict() {
        let merged = clean_lines(LineMerger::merge(
            &["A", "B", "C"],
            &["A", "N", "C", "L"],
            &["R", "N", "C"],
        ));
        assert_eq!(merged, vec!["R", "N", "C", "L"]);
    }

    #[test]
    fn test_remote_truncation_shortens_result() {
        // Remote dropped the last line, local edited the first.
        let merged = clean_lines(LineMerger::merge(
            &["A", "B", "C"],
            &["X", "B", "C"],
            &["A", "B"],
        ));
        assert_eq!(merged, vec!["X", "B"]);
    }

    #[test]
    fn test_both_append_different_tails_conflict() {
        let merge = LineMerger::merge(&["A"], &["A", "L"], &["A", "R"]);
        assert_eq!(merge, LineMerge::Conflict { indices: vec![1] });
    }

    #[test]
    fn test_deletion_against_edit_conflicts() {
        // Local deleted position 1 (padded as ""), remote edited it.
        let merge = LineMerger::merge(&["A", "B"], &["A"], &["A", "Y"]);
        assert_eq!(merge, LineMerge::Conflict { indices: vec![1] });
    }

    #[test]
    fn test_conflict_count_spans_all_positions() {
        let indices = LineMerger::conflicts(&["a", "b", "c"], &["1", "b", "3"], &["x", "b", "z"]);
        assert_eq!(indices, vec![0, 2]);
    }

    #[test]
    fn test_whitespace_is_significant() {
        let base = split_lines("A\nB\n");
        let local = split_lines("A \nB\n");
        let remote = split_lines("A\t\nB\n");
        assert!(!LineMerger::merge(&base, &local, &remote).is_clean());
    }

    #[test]
    fn test_split_lines_keeps_terminators() {
        assert_eq!(split_lines("a\nb\r\nc"), vec!["a\n", "b\r\n", "c"]);
        assert!(split_lines("").is_empty());
    }

    #[test]
    fn test_missing_final_newline_differs() {
        let base = split_lines("A\nB\n");
        let local = split_lines("A\nB");
        let remote = split_lines("A\nC\n");
        assert_eq!(
            LineMerger::merge(&base, &local, &remote),
            LineMerge::Conflict { indices: vec![1] }
        );
    }
}
