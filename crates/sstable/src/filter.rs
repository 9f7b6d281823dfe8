//! Column-name filters consulted by scanners during point reads.

use std::cmp::Ordering;
use std::sync::Arc;

use model::{Name, NameOrdering};

/// Outcome of testing a filter against a slice's leaf-name range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchResult {
    /// The range may contain matches: decode and scan the slice's columns.
    MatchCont,
    /// No match here and none possible later; the caller can stop.
    NomatchDone,
    /// No match in this range; the next possible match is at or after the
    /// returned name, so the caller may seek instead of scanning.
    Seek(Vec<u8>),
}

/// Column-level filter installed on a scanner to skip intra-slice decoding.
///
/// Slices whose columns are all filtered away are still surfaced by the
/// scanner, because their metadata may matter to the caller. Compaction
/// never installs a filter: it has to see everything.
pub trait ColumnNameFilter {
    /// Tests the filter against the closed range `[begin, end]` of leaf
    /// names covered by a slice.
    fn matches_between(&self, begin: &Name, end: &Name) -> MatchResult;

    /// Tests a single column name.
    fn matches(&self, name: &[u8]) -> bool;
}

/// Matches exactly one column name.
pub struct NameMatchFilter {
    ordering: Arc<dyn NameOrdering>,
    name: Vec<u8>,
}

impl NameMatchFilter {
    pub fn new(ordering: Arc<dyn NameOrdering>, name: impl Into<Vec<u8>>) -> NameMatchFilter {
        NameMatchFilter {
            ordering,
            name: name.into(),
        }
    }
}

impl ColumnNameFilter for NameMatchFilter {
    fn matches_between(&self, begin: &Name, end: &Name) -> MatchResult {
        if cmp_bound(self.ordering.as_ref(), end, &self.name) == Ordering::Less {
            // positioned before our name: instruct the scanner to seek forward
            return MatchResult::Seek(self.name.clone());
        }
        if cmp_bound(self.ordering.as_ref(), begin, &self.name) == Ordering::Greater {
            // positioned after our name: we are finished
            return MatchResult::NomatchDone;
        }
        MatchResult::MatchCont
    }

    fn matches(&self, name: &[u8]) -> bool {
        self.ordering.cmp_names(&self.name, name) == Ordering::Equal
    }
}

fn cmp_bound(ordering: &dyn NameOrdering, bound: &Name, name: &[u8]) -> Ordering {
    match bound {
        Name::Begin => Ordering::Less,
        Name::End => Ordering::Greater,
        Name::Bytes(bytes) => ordering.cmp_names(bytes, name),
    }
}
