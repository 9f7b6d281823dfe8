//! # Compaction — folding sstables back into one
//!
//! Compaction takes N immutable sstables of one column family and produces
//! a single new sstable holding the merged, reconciled, garbage-collected
//! result. It is the only way data ever leaves disk: writes are append-only
//! and sstables are write-once.
//!
//! The work happens in [`CompactionIterator`], a streaming heap-merge over
//! one scanner per input. Slices are merged in key order through a small
//! in-memory buffer where equal-keyed columns resolve by priority and
//! equal-keyed metadata resolves by pairwise max; tombstone semantics are
//! applied as entries leave the buffer. Nothing is ever materialized beyond
//! roughly one slice per input, so compacting arbitrarily large sstables
//! runs in bounded memory.
//!
//! [`compact`] wires the iterator to a writer: inputs in, one finalized
//! sstable out (or nothing at all, when every slice was collected).
//! Compaction is idempotent — compacting a single sstable reproduces its
//! logical contents — and reduces N inputs to 1.

mod iter;

pub use iter::{CompactionIterator, TOTAL_FILE_BUFFER_BYTES};

use std::path::Path;

use log::{debug, info};
use sstable::{Result, SSTableReader, SSTableWriter};

/// Folds `inputs` into one new sstable at `out_base`.
///
/// Output slices stream straight into the writer, so memory stays bounded
/// regardless of input sizes. Returns `None` — leaving nothing on disk —
/// when every slice was garbage-collected, which a major compaction with a
/// permissive `gc_before` can legitimately produce. Inputs are untouched;
/// swapping them out for the result is the scheduler's job.
///
/// `major` must only be set when `inputs` include every sstable that could
/// hold data for the keys being compacted; it is what licenses tombstone
/// collection.
pub fn compact(
    inputs: &[SSTableReader],
    out_base: &Path,
    gc_before: i32,
    major: bool,
) -> Result<Option<SSTableReader>> {
    let Some(first) = inputs.first() else {
        return Ok(None);
    };

    let mut iter = CompactionIterator::new(inputs, gc_before, major)?;

    // the writer re-expands this by its own columns-per-key heuristic when
    // sizing the bloom filter
    let estimated_keys = inputs
        .iter()
        .map(SSTableReader::estimated_columns)
        .sum::<u64>()
        / 11
        + 1;
    let mut writer = SSTableWriter::create(out_base, estimated_keys, first.comparator().clone())?;

    let mut emitted = 0u64;
    loop {
        let slice = match iter.next_slice() {
            Ok(Some(slice)) => slice,
            Ok(None) => break,
            Err(e) => {
                let _ = iter.close();
                return Err(e);
            }
        };
        if let Err(e) = writer.append_slice(slice) {
            let _ = iter.close();
            return Err(e);
        }
        emitted += 1;
    }
    iter.close()?;

    if emitted == 0 {
        debug!(
            "compaction of {} inputs at {} produced no live data",
            inputs.len(),
            out_base.display()
        );
        writer.abort();
        return Ok(None);
    }

    let columns = writer.columns_written();
    let reader = writer.finish()?;
    info!(
        "compacted {} inputs into {} ({} slices, {} columns)",
        inputs.len(),
        out_base.display(),
        emitted,
        columns
    );
    Ok(Some(reader))
}

#[cfg(test)]
mod tests;
