use std::cmp::Ordering;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bloom::BloomFilter;
use byteorder::{BigEndian, WriteBytesExt};
use log::{debug, info};
use model::{Column, ColumnKey, KeyComparator, Name, Slice, SliceBuffer, SliceMetadata};

use crate::error::{Result, SSTableError};
use crate::format::{
    component_path, write_block_header, write_column, write_slice_mark, BlockHeader, IndexEntry,
    SliceMark, BLOCK_CONTINUE, BLOCK_END, BLOCK_HEADER_BYTES, CODEC_IDENTITY, DATA_COMPONENT,
    FILTER_COMPONENT, INDEX_COMPONENT, INDEX_INTERVAL, TARGET_MAX_BLOCK_BYTES,
    TARGET_MAX_SLICE_BYTES,
};
use crate::reader::SSTableReader;

// Bloom sizing heuristic: ~11 columns per row key, ~15 bits per expected
// column, 15 hash functions. The serialized header records whatever was
// chosen, so these numbers never leak into the read path.
const BLOOM_COLUMNS_PER_KEY: u64 = 11;
const BLOOM_BITS_PER_COLUMN: u64 = 15;
const BLOOM_HASHES: u32 = 15;

// The block buffer should never get here if the boundary rules are applied;
// reaching it means a single column outgrew every target.
const HARD_MAX_BLOCK_BYTES: usize = 64 * 1024 * 1024;

/// Why a new slice begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    /// Key order did not leave the current parent group and nothing else
    /// forces a flush.
    None,
    /// The column parents changed: round the outgoing end key up to
    /// [`Name::End`] and the incoming start key down to [`Name::Begin`].
    Natural,
    /// The metadata changed or a size target was reached; bounds stay
    /// exact.
    Artificial,
}

/// Streams a monotonically non-decreasing sequence of columns into an
/// sstable triplet.
///
/// Columns accumulate into a slice until a boundary (see [`Boundary`]);
/// slices accumulate into a block until it exceeds
/// [`TARGET_MAX_BLOCK_BYTES`], at which point the block is framed, written,
/// and indexed. The caller guarantees input order; violations fail the
/// append immediately.
///
/// All three files are written under `-tmp-` names. [`finish`] fsyncs and
/// renames them (data file last — its final name is the atomicity marker)
/// and returns a reader backed by the retained index sample and filter. An
/// unfinished writer removes its temporaries on drop, so an abandoned or
/// failed write leaves nothing behind.
///
/// [`finish`]: SSTableWriter::finish
pub struct SSTableWriter {
    base: PathBuf,
    comparator: KeyComparator,
    guard: TmpGuard,
    data: BufWriter<File>,
    index: BufWriter<File>,
    data_pos: u64,
    index_pos: u64,
    bloom: BloomFilter,
    sampled: Vec<IndexEntry>,
    ctx: BlockContext,
    last_key: Option<ColumnKey>,
    columns_written: u64,
    slices_written: u64,
    blocks_written: u64,
}

/// The slice currently receiving columns.
struct OpenSlice {
    meta: SliceMetadata,
    key: ColumnKey,
    buf: Vec<u8>,
    num_cols: u32,
}

/// Buffered state of the block under construction.
struct BlockContext {
    slice: Option<OpenSlice>,
    block: Vec<u8>,
    slices_in_block: u32,
    block_key: Option<ColumnKey>,
    block_start: u64,
}

impl SSTableWriter {
    /// Opens temporary data and index files next to `base` and sizes the
    /// bloom filter for roughly `key_count` row keys.
    ///
    /// # Panics
    ///
    /// Panics if the comparator has zero depth.
    pub fn create(
        base: impl Into<PathBuf>,
        key_count: u64,
        comparator: KeyComparator,
    ) -> Result<SSTableWriter> {
        assert!(comparator.depth() >= 1, "column depth must be at least 1");
        let base = base.into();
        let data = open_tmp(&base, DATA_COMPONENT)?;
        let index = open_tmp(&base, INDEX_COMPONENT)?;
        let bits = key_count
            .saturating_mul(BLOOM_COLUMNS_PER_KEY)
            .saturating_mul(BLOOM_BITS_PER_COLUMN)
            .max(64);
        Ok(SSTableWriter {
            guard: TmpGuard {
                base: base.clone(),
                armed: true,
            },
            base,
            comparator,
            data,
            index,
            data_pos: 0,
            index_pos: 0,
            bloom: BloomFilter::with_params(bits, BLOOM_HASHES),
            sampled: Vec::new(),
            ctx: BlockContext {
                slice: None,
                block: Vec::new(),
                slices_in_block: 0,
                block_key: None,
                block_start: 0,
            },
            last_key: None,
            columns_written: 0,
            slices_written: 0,
            blocks_written: 0,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn comparator(&self) -> &KeyComparator {
        &self.comparator
    }

    pub fn columns_written(&self) -> u64 {
        self.columns_written
    }

    /// Appends one column under the given parent metadata.
    ///
    /// `key` must compare at full depth at-or-after every previously
    /// appended key.
    pub fn append(&mut self, meta: &SliceMetadata, key: ColumnKey, column: Column) -> Result<()> {
        self.before_append(meta, &key)?;
        let slice = self
            .ctx
            .slice
            .as_mut()
            .expect("before_append leaves a slice open");
        write_column(&mut slice.buf, &column)?;
        slice.num_cols += 1;
        self.bloom.insert(&key.bloom_key());
        self.last_key = Some(key);
        self.columns_written += 1;
        Ok(())
    }

    /// Appends a whole slice, as produced by compaction.
    ///
    /// The buffer's columns land in the slice the boundary rules dictate:
    /// usually a fresh one, but a buffer that neither crosses a parent
    /// boundary nor changes metadata coalesces into the open slice. A
    /// buffer with no columns still frames its metadata, which is how
    /// parent tombstones outlive their columns.
    pub fn append_slice(&mut self, slice: SliceBuffer) -> Result<()> {
        if slice.columns.is_empty() && slice.meta.is_clear() {
            // nothing worth framing
            return Ok(());
        }
        self.before_append(&slice.meta, &slice.start_key)?;
        let end_key = slice.end_key();
        {
            let open = self
                .ctx
                .slice
                .as_mut()
                .expect("before_append leaves a slice open");
            for column in &slice.columns {
                write_column(&mut open.buf, column)?;
                open.num_cols += 1;
            }
        }
        for column in &slice.columns {
            let key = slice.start_key.with_name(Name::bytes(column.name()));
            self.bloom.insert(&key.bloom_key());
        }
        self.columns_written += slice.columns.len() as u64;
        self.last_key = Some(end_key);
        Ok(())
    }

    /// Flushes the open slice and block, writes the filter file, fsyncs
    /// everything, and renames the triplet into place. Returns a reader
    /// over the finished sstable backed by the retained index sample and
    /// bloom filter.
    pub fn finish(mut self) -> Result<SSTableReader> {
        self.flush_slice(None, Boundary::Natural, None, true)?;

        let filter_tmp = component_path(&self.base, FILTER_COMPONENT, true);
        let filter_file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&filter_tmp)?;
        let mut filter = BufWriter::new(filter_file);
        filter.write_u32::<BigEndian>(self.bloom.serialized_size() as u32)?;
        self.bloom.write_to(&mut filter)?;
        filter.flush()?;
        filter.get_ref().sync_all()?;

        self.data.flush()?;
        self.data.get_ref().sync_all()?;
        self.index.flush()?;
        self.index.get_ref().sync_all()?;

        info!(
            "wrote {} blocks, {} slices, and {} columns to {}",
            self.blocks_written,
            self.slices_written,
            self.columns_written,
            self.base.display()
        );

        // index and filter first: the data file's final name is what marks
        // the sstable live, so it must appear last.
        rename_from_tmp(&self.base, INDEX_COMPONENT)?;
        rename_from_tmp(&self.base, FILTER_COMPONENT)?;
        rename_from_tmp(&self.base, DATA_COMPONENT)?;
        self.guard.armed = false;

        SSTableReader::from_parts(
            self.base.clone(),
            self.comparator.clone(),
            std::mem::take(&mut self.sampled),
            self.bloom,
        )
    }

    /// Abandons the write, removing the temporary files.
    pub fn abort(self) {
        debug!("aborting write of {}", self.base.display());
        // the drop guard removes the temporaries
    }

    /// Detects order violations, then flushes the current slice if the new
    /// key requires a boundary.
    fn before_append(&mut self, meta: &SliceMetadata, key: &ColumnKey) -> Result<()> {
        let last = match &self.last_key {
            None => {
                self.reset_slice(meta.clone(), Boundary::Natural, Some(key));
                return Ok(());
            }
            Some(last) => last.clone(),
        };
        let depth = self.comparator.depth();
        if self.comparator.compare(&last, key, depth) == Ordering::Greater {
            return Err(SSTableError::InputOrderViolation(format!(
                "key precedes the last written key in {}",
                self.base.display()
            )));
        }
        let filled = self.ctx.block_len() > TARGET_MAX_BLOCK_BYTES;
        let btype = self.boundary_for(&last, meta, key);
        if btype != Boundary::None {
            self.flush_slice(Some(meta), btype, Some(key), filled)?;
        }
        Ok(())
    }

    /// A new slice must begin if the parent group changed (natural), or the
    /// metadata changed or the slice outgrew its target (artificial).
    /// Natural boundaries are checked first: they must win whenever the
    /// parent changes, or slice keys could leave sorted order on disk.
    fn boundary_for(&self, last: &ColumnKey, meta: &SliceMetadata, key: &ColumnKey) -> Boundary {
        let parent_depth = self.comparator.depth() - 1;
        if self.comparator.compare(last, key, parent_depth) == Ordering::Less {
            return Boundary::Natural;
        }
        match &self.ctx.slice {
            Some(slice) => {
                if slice.buf.len() > TARGET_MAX_SLICE_BYTES {
                    Boundary::Artificial
                } else if slice.meta != *meta {
                    Boundary::Artificial
                } else {
                    Boundary::None
                }
            }
            None => Boundary::Natural,
        }
    }

    /// Writes the open slice's mark and payload into the block buffer,
    /// closing the block behind it when asked, then begins the next slice.
    ///
    /// At a natural boundary the outgoing end key rounds up to
    /// [`Name::End`] and the incoming start key down to [`Name::Begin`], so
    /// the slice's metadata covers any same-parent columns discovered in
    /// other sstables later.
    fn flush_slice(
        &mut self,
        next_meta: Option<&SliceMetadata>,
        btype: Boundary,
        next_key: Option<&ColumnKey>,
        close_block: bool,
    ) -> Result<()> {
        if let Some(slice) = self.ctx.slice.take() {
            if slice.num_cols > 0 || !slice.meta.is_clear() {
                if self.ctx.slices_in_block == 0 {
                    self.ctx.block_key = Some(slice.key.clone());
                }
                let natural = btype == Boundary::Natural;
                let end_key = match next_key {
                    Some(next) if !natural => next.clone(),
                    _ => slice.key.with_name(Name::End),
                };
                let mark_next = match next_key {
                    Some(next) if natural => Some(next.with_name(Name::Begin)),
                    Some(next) => Some(next.clone()),
                    None => None,
                };
                let mark = SliceMark {
                    slice: Slice {
                        meta: slice.meta,
                        start_key: slice.key,
                        end_key,
                        next_key: mark_next,
                    },
                    payload_len: slice.buf.len() as u32,
                    column_count: slice.num_cols,
                    status: if close_block { BLOCK_END } else { BLOCK_CONTINUE },
                };
                write_slice_mark(&mut self.ctx.block, &mark)?;
                self.ctx.block.extend_from_slice(&slice.buf);
                self.ctx.slices_in_block += 1;
                self.slices_written += 1;
            }
        }
        if close_block {
            self.close_block()?;
        }
        if let Some(meta) = next_meta {
            self.reset_slice(meta.clone(), btype, next_key);
        }
        Ok(())
    }

    fn reset_slice(&mut self, meta: SliceMetadata, btype: Boundary, key: Option<&ColumnKey>) {
        let Some(key) = key else {
            self.ctx.slice = None;
            return;
        };
        let start = if btype == Boundary::Natural {
            key.with_name(Name::Begin)
        } else {
            key.clone()
        };
        self.ctx.slice = Some(OpenSlice {
            meta,
            key: start,
            buf: Vec::new(),
            num_cols: 0,
        });
    }

    /// Frames the buffered block into the data file and appends its
    /// [`IndexEntry`] to the index file, retaining every
    /// [`INDEX_INTERVAL`]-th entry in memory.
    fn close_block(&mut self) -> Result<()> {
        let Some(block_key) = self.ctx.block_key.take() else {
            return Ok(());
        };
        if self.ctx.block.len() > HARD_MAX_BLOCK_BYTES {
            return Err(SSTableError::BoundExceeded(format!(
                "block of {} bytes in {}",
                self.ctx.block.len(),
                self.base.display()
            )));
        }
        write_block_header(
            &mut self.data,
            &BlockHeader {
                length: self.ctx.block.len() as u32,
                codec: CODEC_IDENTITY,
            },
        )?;
        self.data.write_all(&self.ctx.block)?;
        let block_start = self.ctx.block_start;
        self.data_pos += BLOCK_HEADER_BYTES + self.ctx.block.len() as u64;

        let entry = IndexEntry {
            key: block_key,
            index_offset: self.index_pos,
            data_offset: block_start,
        };
        let mut buf = Vec::new();
        entry.write_to(&mut buf)?;
        self.index.write_all(&buf)?;
        self.index_pos += buf.len() as u64;

        debug!(
            "closed block of {} bytes at offset {} in {}",
            self.ctx.block.len(),
            block_start,
            self.base.display()
        );

        if self.blocks_written % INDEX_INTERVAL as u64 == 0 {
            self.sampled.push(entry);
        }
        self.blocks_written += 1;

        self.ctx.block.clear();
        self.ctx.slices_in_block = 0;
        self.ctx.block_start = self.data_pos;
        Ok(())
    }
}

impl BlockContext {
    fn block_len(&self) -> usize {
        self.block.len() + self.slice.as_ref().map_or(0, |slice| slice.buf.len())
    }
}

fn open_tmp(base: &Path, component: &str) -> Result<BufWriter<File>> {
    let path = component_path(base, component, true);
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)?;
    Ok(BufWriter::new(file))
}

fn rename_from_tmp(base: &Path, component: &str) -> io::Result<()> {
    fs::rename(
        component_path(base, component, true),
        component_path(base, component, false),
    )
}

/// Removes the writer's temporary files unless finalization disarmed it.
struct TmpGuard {
    base: PathBuf,
    armed: bool,
}

impl Drop for TmpGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for component in [DATA_COMPONENT, INDEX_COMPONENT, FILTER_COMPONENT] {
            let _ = fs::remove_file(component_path(&self.base, component, true));
        }
    }
}
