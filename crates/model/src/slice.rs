use crate::column::Column;
use crate::key::{ColumnKey, Name};
use crate::meta::SliceMetadata;

/// Bounds and shared metadata for a run of columns: the unit of on-disk
/// framing and of compaction output.
///
/// `end_key` rounds up to [`Name::End`] when the slice closes a natural
/// subrange, so that any column later found to share the slice's parents
/// falls inside the bounds and inherits the metadata. `next_key` points at
/// the first key of the following slice (`None` at EOF), letting a scanner
/// skip a slice without decoding its columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Slice {
    pub meta: SliceMetadata,
    pub start_key: ColumnKey,
    pub end_key: ColumnKey,
    pub next_key: Option<ColumnKey>,
}

/// A slice materialized with its column list, as emitted by compaction and
/// consumed whole by the writer.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceBuffer {
    pub meta: SliceMetadata,
    pub start_key: ColumnKey,
    pub columns: Vec<Column>,
}

impl SliceBuffer {
    pub fn new(meta: SliceMetadata, start_key: ColumnKey, columns: Vec<Column>) -> SliceBuffer {
        SliceBuffer {
            meta,
            start_key,
            columns,
        }
    }

    /// Key of the last column in the buffer, or the start key when empty.
    /// This is what write-order tracking advances past after an append.
    pub fn end_key(&self) -> ColumnKey {
        match self.columns.last() {
            Some(column) => self.start_key.with_name(Name::bytes(column.name())),
            None => self.start_key.clone(),
        }
    }

    pub fn num_cols(&self) -> usize {
        self.columns.len()
    }

    /// Combined on-disk size of the buffered column records.
    pub fn serialized_size(&self) -> usize {
        self.columns.iter().map(Column::serialized_size).sum()
    }
}
