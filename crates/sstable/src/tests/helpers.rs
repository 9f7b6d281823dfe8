use std::path::Path;

use anyhow::Result;
use model::{
    Column, ColumnKey, KeyComparator, Name, OrderPreservingPartitioner, Partitioner, Slice,
    SliceMetadata,
};

use crate::{SSTableReader, SSTableWriter};

/// A depth-1 column key under the order-preserving partitioner.
pub fn key(row: &str, name: impl AsRef<[u8]>) -> ColumnKey {
    ColumnKey::new(
        OrderPreservingPartitioner.decorate(row.as_bytes()),
        vec![Name::bytes(name.as_ref())],
    )
}

/// Writes one standard-family sstable: per row, a metadata value and its
/// columns (already name-sorted).
pub fn write_rows(
    base: &Path,
    rows: &[(&str, SliceMetadata, Vec<Column>)],
) -> Result<SSTableReader> {
    let mut writer = SSTableWriter::create(base, rows.len() as u64, KeyComparator::standard())?;
    for (row, meta, columns) in rows {
        for column in columns {
            writer.append(meta, key(row, column.name()), column.clone())?;
        }
    }
    Ok(writer.finish()?)
}

/// Exhaustively scans an sstable into `(slice, columns)` pairs.
pub fn collect(reader: &SSTableReader) -> Result<Vec<(Slice, Vec<Column>)>> {
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

/// Every column in the sstable, fully keyed, in scan order.
pub fn flat_columns(reader: &SSTableReader) -> Result<Vec<(ColumnKey, Column)>> {
    let mut out = Vec::new();
    for (slice, columns) in collect(reader)? {
        for column in columns {
            out.push((
                slice.start_key.with_name(Name::bytes(column.name())),
                column,
            ));
        }
    }
    Ok(out)
}
