use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bloom::BloomFilter;
use byteorder::{BigEndian, ReadBytesExt};
use log::warn;
use model::{ColumnKey, KeyComparator};

use crate::error::{Result, SSTableError};
use crate::format::{
    component_path, read_index_entry, IndexEntry, DATA_COMPONENT, FILTER_COMPONENT,
    INDEX_COMPONENT, INDEX_INTERVAL,
};
use crate::scanner::SSTableScanner;

/// Default read buffer for scanners opened outside a compaction.
pub const DEFAULT_SCAN_BUFFER_BYTES: usize = 64 * 1024;

/// A finalized, immutable sstable.
///
/// Opening a reader loads the filter file and a sample of the index file
/// (every [`INDEX_INTERVAL`]-th entry) into memory; the data file is only
/// touched by scanners. Readers are cheap shared handles — cloning one
/// shares the loaded state — and every scanner holds a clone, which is the
/// reference count that [`try_delete`](SSTableReader::try_delete) consults
/// before removing files.
///
/// All methods take `&self`; a reader is safe to share once finalized.
/// Scanners themselves are not.
#[derive(Clone)]
pub struct SSTableReader {
    inner: Arc<Inner>,
}

struct Inner {
    base: PathBuf,
    comparator: KeyComparator,
    bloom: BloomFilter,
    sampled: Vec<IndexEntry>,
    data_len: u64,
}

impl SSTableReader {
    /// Opens an sstable from its finalized triplet.
    ///
    /// # Errors
    ///
    /// Returns an error if any component file is missing, the filter file's
    /// declared length disagrees with its contents, or an index entry fails
    /// to decode.
    pub fn open(base: impl Into<PathBuf>, comparator: KeyComparator) -> Result<SSTableReader> {
        let base = base.into();

        let filter_path = component_path(&base, FILTER_COMPONENT, false);
        let mut filter = BufReader::new(File::open(&filter_path)?);
        let declared = filter.read_u32::<BigEndian>()? as usize;
        let bloom = BloomFilter::read_from(&mut filter)?;
        if bloom.serialized_size() != declared {
            return Err(SSTableError::Corrupt(format!(
                "filter file declares {} bytes but holds {}",
                declared,
                bloom.serialized_size()
            )));
        }

        let index_path = component_path(&base, INDEX_COMPONENT, false);
        let mut index = BufReader::new(File::open(&index_path)?);
        let mut sampled = Vec::new();
        let mut entries = 0usize;
        while let Some(entry) = read_index_entry(&mut index)? {
            if entries % INDEX_INTERVAL == 0 {
                sampled.push(entry);
            }
            entries += 1;
        }

        let data_len = fs::metadata(component_path(&base, DATA_COMPONENT, false))?.len();

        Ok(SSTableReader {
            inner: Arc::new(Inner {
                base,
                comparator,
                bloom,
                sampled,
                data_len,
            }),
        })
    }

    /// Builds a reader directly from a finished writer's retained state,
    /// skipping the re-read of the index and filter files.
    pub(crate) fn from_parts(
        base: PathBuf,
        comparator: KeyComparator,
        sampled: Vec<IndexEntry>,
        bloom: BloomFilter,
    ) -> Result<SSTableReader> {
        let data_len = fs::metadata(component_path(&base, DATA_COMPONENT, false))?.len();
        Ok(SSTableReader {
            inner: Arc::new(Inner {
                base,
                comparator,
                bloom,
                sampled,
                data_len,
            }),
        })
    }

    pub fn base(&self) -> &Path {
        &self.inner.base
    }

    pub fn comparator(&self) -> &KeyComparator {
        &self.inner.comparator
    }

    /// The column depth `D` of the family this sstable belongs to.
    pub fn column_depth(&self) -> usize {
        self.inner.comparator.depth()
    }

    /// Size of the data file in bytes.
    pub fn data_len(&self) -> u64 {
        self.inner.data_len
    }

    /// Rough column count derived from the data size; used to size the
    /// bloom filter of a compaction output.
    pub fn estimated_columns(&self) -> u64 {
        (self.inner.data_len / 32).max(1)
    }

    /// Bloom filter probe. `false` means the column is definitely absent;
    /// `true` means it must be looked for.
    pub fn may_contain(&self, key: &ColumnKey) -> bool {
        self.inner.bloom.may_contain(&key.bloom_key())
    }

    /// Opens an exhaustive scanner positioned at the first slice.
    pub fn scan(&self) -> Result<SSTableScanner> {
        self.scan_buffered(DEFAULT_SCAN_BUFFER_BYTES)
    }

    /// Opens a scanner with an explicit read-buffer size; compaction splits
    /// a shared budget across its inputs.
    pub fn scan_buffered(&self, buffer_bytes: usize) -> Result<SSTableScanner> {
        SSTableScanner::open(self.clone(), buffer_bytes)
    }

    /// The finalized component paths of this sstable.
    pub fn paths(&self) -> [PathBuf; 3] {
        [
            component_path(&self.inner.base, DATA_COMPONENT, false),
            component_path(&self.inner.base, INDEX_COMPONENT, false),
            component_path(&self.inner.base, FILTER_COMPONENT, false),
        ]
    }

    /// Removes the on-disk triplet, best-effort, once nothing else
    /// references the sstable.
    ///
    /// If another handle or scanner is still alive the reader is returned
    /// unconsumed and nothing is removed; obsoleted compaction inputs are
    /// retried by their owner once the last scanner closes.
    pub fn try_delete(self) -> std::result::Result<(), SSTableReader> {
        if Arc::strong_count(&self.inner) > 1 {
            return Err(self);
        }
        for path in self.paths() {
            if let Err(e) = fs::remove_file(&path) {
                warn!("failed to remove {}: {}", path.display(), e);
            }
        }
        Ok(())
    }

    /// The last retained index entry whose key compares at-or-before
    /// `target` at `depth`, or `None` if the target precedes every block.
    pub(crate) fn floor_sampled(&self, target: &ColumnKey, depth: usize) -> Option<&IndexEntry> {
        let sampled = &self.inner.sampled;
        let idx = sampled.partition_point(|entry| {
            self.inner.comparator.compare(&entry.key, target, depth) != std::cmp::Ordering::Greater
        });
        if idx == 0 {
            None
        } else {
            Some(&sampled[idx - 1])
        }
    }

    #[cfg(test)]
    pub(crate) fn sampled_len(&self) -> usize {
        self.inner.sampled.len()
    }
}
