/// Deletion bookkeeping for one ancestor level of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LevelDeletion {
    /// Client timestamp at which the level was deleted; columns with
    /// timestamps at or below it are shadowed.
    pub marked_for_delete_at: i64,
    /// Wall-clock second the tombstone was written locally. Drives GC
    /// eligibility, never conflict resolution.
    pub local_deletion_time: i32,
}

impl LevelDeletion {
    /// A level that has never been deleted.
    pub const NONE: LevelDeletion = LevelDeletion {
        marked_for_delete_at: i64::MIN,
        local_deletion_time: i32::MIN,
    };

    pub fn new(marked_for_delete_at: i64, local_deletion_time: i32) -> LevelDeletion {
        LevelDeletion {
            marked_for_delete_at,
            local_deletion_time,
        }
    }

    pub fn is_live(&self) -> bool {
        self.marked_for_delete_at == i64::MIN
    }

    /// Fieldwise maximum: the later deletion wins at each field.
    pub fn max(a: LevelDeletion, b: LevelDeletion) -> LevelDeletion {
        LevelDeletion {
            marked_for_delete_at: a.marked_for_delete_at.max(b.marked_for_delete_at),
            local_deletion_time: a.local_deletion_time.max(b.local_deletion_time),
        }
    }
}

/// Per-slice deletion metadata: one [`LevelDeletion`] per ancestor level,
/// index 0 being the row. A standard family carries one level; a super
/// family two (row, then supercolumn).
///
/// Metadata applies to every column in its slice, and — because natural
/// slice bounds round out to the sentinels — to any column of the same
/// parent group discovered later in another sstable.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SliceMetadata {
    levels: Vec<LevelDeletion>,
}

impl SliceMetadata {
    /// Metadata with `depth` levels, none of them deleted.
    pub fn clear(depth: usize) -> SliceMetadata {
        SliceMetadata {
            levels: vec![LevelDeletion::NONE; depth],
        }
    }

    /// Single-level metadata describing the row.
    pub fn rooted(marked_for_delete_at: i64, local_deletion_time: i32) -> SliceMetadata {
        SliceMetadata {
            levels: vec![LevelDeletion::new(marked_for_delete_at, local_deletion_time)],
        }
    }

    /// This metadata extended with one child level, for descending into a
    /// parent group.
    pub fn child_with(&self, marked_for_delete_at: i64, local_deletion_time: i32) -> SliceMetadata {
        let mut levels = self.levels.clone();
        levels.push(LevelDeletion::new(marked_for_delete_at, local_deletion_time));
        SliceMetadata { levels }
    }

    pub fn from_levels(levels: Vec<LevelDeletion>) -> SliceMetadata {
        SliceMetadata { levels }
    }

    pub fn levels(&self) -> &[LevelDeletion] {
        &self.levels
    }

    pub fn depth(&self) -> usize {
        self.levels.len()
    }

    /// True if no level has ever been marked deleted.
    pub fn is_clear(&self) -> bool {
        self.levels.iter().all(LevelDeletion::is_live)
    }

    /// The newest deletion timestamp over all ancestor levels.
    pub fn max_marked_for_delete_at(&self) -> i64 {
        self.levels
            .iter()
            .map(|level| level.marked_for_delete_at)
            .max()
            .unwrap_or(i64::MIN)
    }

    /// The newest local deletion time over all ancestor levels.
    pub fn max_local_deletion_time(&self) -> i32 {
        self.levels
            .iter()
            .map(|level| level.local_deletion_time)
            .max()
            .unwrap_or(i32::MIN)
    }

    /// Elementwise pairwise max of two metadata values. Shorter inputs are
    /// padded with live levels, so unequal depths resolve cleanly.
    ///
    /// Used identically by replica reconciliation and by compaction when two
    /// slices of the same parent group meet.
    pub fn resolve(a: &SliceMetadata, b: &SliceMetadata) -> SliceMetadata {
        let depth = a.depth().max(b.depth());
        let mut levels = Vec::with_capacity(depth);
        for i in 0..depth {
            let x = a.levels.get(i).copied().unwrap_or(LevelDeletion::NONE);
            let y = b.levels.get(i).copied().unwrap_or(LevelDeletion::NONE);
            levels.push(LevelDeletion::max(x, y));
        }
        SliceMetadata { levels }
    }
}
