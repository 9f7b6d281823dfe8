use std::path::Path;

use anyhow::Result;
use model::{
    Column, ColumnKey, KeyComparator, Name, OrderPreservingPartitioner, Partitioner, Slice,
    SliceBuffer, SliceMetadata,
};
use sstable::{SSTableReader, SSTableWriter};

/// A depth-1 column key under the order-preserving partitioner.
pub fn key(row: &str, name: impl AsRef<[u8]>) -> ColumnKey {
    ColumnKey::new(
        OrderPreservingPartitioner.decorate(row.as_bytes()),
        vec![Name::bytes(name.as_ref())],
    )
}

pub fn clear() -> SliceMetadata {
    SliceMetadata::clear(1)
}

/// One input row for [`write_table`]: key, row metadata, name-sorted columns.
pub type Row<'a> = (&'a str, SliceMetadata, Vec<Column>);

/// Writes a standard-family sstable from literal rows. Rows without columns
/// become metadata-only slices (a row tombstone with nothing under it).
pub fn write_table(dir: &Path, file: &str, rows: &[Row]) -> Result<SSTableReader> {
    let base = dir.join(file);
    let mut writer =
        SSTableWriter::create(&base, rows.len() as u64, KeyComparator::standard())?;
    for (row, meta, columns) in rows {
        if columns.is_empty() {
            writer.append_slice(SliceBuffer::new(
                meta.clone(),
                key(row, "").with_name(Name::Begin),
                Vec::new(),
            ))?;
            continue;
        }
        for column in columns {
            writer.append(meta, key(row, column.name()), column.clone())?;
        }
    }
    Ok(writer.finish()?)
}

/// Exhaustively scans an sstable into `(slice, columns)` pairs.
pub fn slices(reader: &SSTableReader) -> Result<Vec<(Slice, Vec<Column>)>> {
    let mut scanner = reader.scan()?;
    let mut out = Vec::new();
    while let Some(slice) = scanner.get().cloned() {
        let columns = scanner.columns()?;
        out.push((slice, columns));
        if !scanner.next()? {
            break;
        }
    }
    scanner.close()?;
    Ok(out)
}

/// The logical contents of an sstable: every column with its full key, in
/// scan order. Slice packing is invisible here, which is exactly what the
/// compaction laws quantify over.
pub fn logical(reader: &SSTableReader) -> Result<Vec<(ColumnKey, Column)>> {
    let mut out = Vec::new();
    for (slice, columns) in slices(reader)? {
        for column in columns {
            out.push((
                slice.start_key.with_name(Name::bytes(column.name())),
                column,
            ));
        }
    }
    Ok(out)
}
