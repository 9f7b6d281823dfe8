use std::cmp::Ordering;

use crate::meta::SliceMetadata;

/// Flag bits stored in a column's `flags` byte.
pub mod flags {
    /// The column is a deletion marker; its value holds the local deletion
    /// time as a big-endian `i32`.
    pub const TOMBSTONE: u8 = 0x01;
    /// The column carries a time-to-live and will expire into a tombstone.
    pub const EXPIRING: u8 = 0x02;
}

/// Smallest addressable value: a named, timestamped byte payload.
///
/// Timestamps are client-supplied and totally ordered; they are what makes
/// last-writer-wins reconciliation deterministic across replicas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: Vec<u8>,
    value: Vec<u8>,
    timestamp: i64,
    flags: u8,
}

impl Column {
    pub fn live(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, timestamp: i64) -> Column {
        Column {
            name: name.into(),
            value: value.into(),
            timestamp,
            flags: 0,
        }
    }

    /// A deletion marker. `local_deletion_time` is the wall-clock second the
    /// tombstone was written, used only for GC eligibility; it travels in
    /// the value bytes.
    pub fn tombstone(name: impl Into<Vec<u8>>, timestamp: i64, local_deletion_time: i32) -> Column {
        Column {
            name: name.into(),
            value: local_deletion_time.to_be_bytes().to_vec(),
            timestamp,
            flags: flags::TOMBSTONE,
        }
    }

    /// Reassembles a column from decoded record fields.
    pub fn from_parts(name: Vec<u8>, value: Vec<u8>, timestamp: i64, flags: u8) -> Column {
        Column {
            name,
            value,
            timestamp,
            flags,
        }
    }

    pub fn name(&self) -> &[u8] {
        &self.name
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn flags(&self) -> u8 {
        self.flags
    }

    pub fn is_tombstone(&self) -> bool {
        self.flags & flags::TOMBSTONE != 0
    }

    pub fn is_expiring(&self) -> bool {
        self.flags & flags::EXPIRING != 0
    }

    /// Local deletion time of a tombstone, or `None` for live columns or a
    /// tombstone whose value bytes are malformed.
    pub fn local_deletion_time(&self) -> Option<i32> {
        if !self.is_tombstone() {
            return None;
        }
        let arr: [u8; 4] = self.value.as_slice().try_into().ok()?;
        Some(i32::from_be_bytes(arr))
    }

    /// Conflict-resolution priority; the greater column wins.
    ///
    /// Greater timestamp first; on a tie a tombstone beats a live column; on
    /// a full tie the lexicographically greater value wins. Symmetric and
    /// transitive, so resolution order does not matter.
    pub fn compare_priority(&self, other: &Column) -> Ordering {
        self.timestamp
            .cmp(&other.timestamp)
            .then_with(|| self.is_tombstone().cmp(&other.is_tombstone()))
            .then_with(|| self.value.cmp(&other.value))
    }

    /// True if this column is shadowed by an ancestor tombstone, or is
    /// itself a tombstone old enough to collect.
    ///
    /// Tombstone collection additionally requires `major`: a compaction
    /// that cannot see every sstable must keep tombstones, or older data in
    /// an unseen sstable could resurrect.
    pub fn is_deleted(&self, parent: &SliceMetadata, major: bool, gc_before: i32) -> bool {
        if self.timestamp <= parent.max_marked_for_delete_at() {
            return true;
        }
        match self.local_deletion_time() {
            Some(local_deletion_time) => major && local_deletion_time < gc_before,
            None => false,
        }
    }

    /// Exact size of this column's on-disk record.
    pub fn serialized_size(&self) -> usize {
        2 + self.name.len() + 8 + 1 + 4 + self.value.len()
    }
}
