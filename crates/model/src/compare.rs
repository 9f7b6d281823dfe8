use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use crate::key::{ColumnKey, Name};

/// A total order on raw column-name bytes for one level of a column family.
///
/// Supplied per family by the schema; the on-disk format never depends on
/// the choice, only the sort order of what gets written does.
pub trait NameOrdering: Send + Sync {
    fn cmp_names(&self, a: &[u8], b: &[u8]) -> Ordering;
}

/// Lexicographic byte order, the default.
#[derive(Debug, Default, Clone, Copy)]
pub struct BytesOrdering;

impl NameOrdering for BytesOrdering {
    fn cmp_names(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }
}

/// Names are signed 64-bit big-endian integers compared numerically.
/// Malformed names sort before well-formed ones, then by bytes, so the
/// order stays total.
#[derive(Debug, Default, Clone, Copy)]
pub struct LongOrdering;

impl NameOrdering for LongOrdering {
    fn cmp_names(&self, a: &[u8], b: &[u8]) -> Ordering {
        match (decode_i64(a), decode_i64(b)) {
            (Some(x), Some(y)) => x.cmp(&y),
            (None, None) => a.cmp(b),
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
        }
    }
}

fn decode_i64(bytes: &[u8]) -> Option<i64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(i64::from_be_bytes(arr))
}

/// Depth-parameterized total order on [`ColumnKey`]s for one column family.
///
/// Holds one [`NameOrdering`] per level. `compare(a, b, d)` considers the
/// decorated key plus the first `d` name components; comparing at depth
/// `D-1` groups keys by parent, at depth `D` it is the full column order.
/// Sentinels order `Begin < Bytes(_) < End` at every level regardless of
/// the level's configured ordering.
#[derive(Clone)]
pub struct KeyComparator {
    levels: Vec<Arc<dyn NameOrdering>>,
}

impl KeyComparator {
    /// Comparator for a standard (depth 1) family with byte-ordered names.
    pub fn standard() -> KeyComparator {
        KeyComparator {
            levels: vec![Arc::new(BytesOrdering)],
        }
    }

    /// Comparator for a super (depth 2) family with byte-ordered names at
    /// both levels.
    pub fn super_family() -> KeyComparator {
        KeyComparator {
            levels: vec![Arc::new(BytesOrdering), Arc::new(BytesOrdering)],
        }
    }

    /// Comparator with an explicit ordering per level; the number of levels
    /// is the family's column depth.
    pub fn new(levels: Vec<Arc<dyn NameOrdering>>) -> KeyComparator {
        KeyComparator { levels }
    }

    /// The column depth `D` of the family.
    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// Total order considering `dk` and the first `d` name components.
    /// A key missing a component sorts before any key that has one there.
    pub fn compare(&self, a: &ColumnKey, b: &ColumnKey, d: usize) -> Ordering {
        let ord = a.dk.cmp(&b.dk);
        if ord != Ordering::Equal {
            return ord;
        }
        for level in 0..d {
            let (an, bn) = match (a.name(level), b.name(level)) {
                (Some(an), Some(bn)) => (an, bn),
                (None, None) => return Ordering::Equal,
                (None, Some(_)) => return Ordering::Less,
                (Some(_), None) => return Ordering::Greater,
            };
            let ord = self.compare_at(an, bn, level);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Compares a single name component under the ordering configured for
    /// `level`.
    pub fn compare_at(&self, a: &Name, b: &Name, level: usize) -> Ordering {
        match (a, b) {
            (Name::Begin, Name::Begin) | (Name::End, Name::End) => Ordering::Equal,
            (Name::Begin, _) => Ordering::Less,
            (_, Name::Begin) => Ordering::Greater,
            (Name::End, _) => Ordering::Greater,
            (_, Name::End) => Ordering::Less,
            (Name::Bytes(a), Name::Bytes(b)) => self.ordering_for(level).cmp_names(a, b),
        }
    }

    fn ordering_for(&self, level: usize) -> &dyn NameOrdering {
        static DEFAULT: BytesOrdering = BytesOrdering;
        self.levels
            .get(level)
            .map(|ordering| ordering.as_ref())
            .unwrap_or(&DEFAULT)
    }
}

impl fmt::Debug for KeyComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyComparator")
            .field("depth", &self.depth())
            .finish()
    }
}
