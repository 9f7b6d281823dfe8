use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use log::trace;
use model::{Column, ColumnKey, KeyComparator, Name, Slice, SliceBuffer, SliceMetadata};
use sstable::{Result, SSTableReader, SSTableScanner, TARGET_MAX_SLICE_BYTES};

/// Shared file-buffer budget split evenly across all input scanners.
pub const TOTAL_FILE_BUFFER_BYTES: usize = 1 << 22;

/// Heap-merges the slices of N sstables into a monotonically non-decreasing
/// stream of output slices, resolving column conflicts by priority and
/// purging dead data as it goes.
///
/// The iterator owns its scanners exclusively, runs single-threaded, and is
/// finite and not restartable. Memory is bounded by the merge buffer, which
/// never holds more than roughly one slice per input
/// (`inputs x TARGET_MAX_SLICE_BYTES`) because both the writer and this
/// iterator split slices at the same target.
///
/// `gc_before` is a wall-clock second; tombstones written locally before it
/// are eligible for collection — but only when `major` is set, meaning the
/// input set subsumes every sstable that could resurrect the deleted data.
pub struct CompactionIterator {
    comparator: KeyComparator,
    depth: usize,
    gc_before: i32,
    major: bool,
    /// Scanners ordered by the key of the slice each is positioned at.
    scanners: BinaryHeap<RankedScanner>,
    /// Ordered metadata and column entries awaiting emission. Metadata
    /// entries apply to every column entry behind them, up to the next
    /// metadata entry, just as they do on disk.
    merge_buf: VecDeque<BufferEntry>,
    /// The output slice under construction.
    building: Option<OutSlice>,
}

impl CompactionIterator {
    /// Opens one buffered scanner per input, splitting
    /// [`TOTAL_FILE_BUFFER_BYTES`] across them. All inputs must share a
    /// comparator and column depth.
    pub fn new(inputs: &[SSTableReader], gc_before: i32, major: bool) -> Result<CompactionIterator> {
        let comparator = inputs
            .first()
            .map(|reader| reader.comparator().clone())
            .unwrap_or_else(KeyComparator::standard);
        let depth = comparator.depth();
        let buffer_per = TOTAL_FILE_BUFFER_BYTES / inputs.len().max(1);
        let mut scanners = BinaryHeap::with_capacity(inputs.len());
        for (id, reader) in inputs.iter().enumerate() {
            let scanner = reader.scan_buffered(buffer_per)?;
            if scanner.get().is_some() {
                scanners.push(RankedScanner {
                    scanner,
                    comparator: comparator.clone(),
                    id,
                });
            } else {
                scanner.close()?;
            }
        }
        Ok(CompactionIterator {
            comparator,
            depth,
            gc_before,
            major,
            scanners,
            merge_buf: VecDeque::new(),
            building: None,
        })
    }

    /// The next output slice, or `None` once the inputs are exhausted.
    ///
    /// Pops buffer entries while the buffer is guaranteed to hold the
    /// global minimum key. A metadata entry begins a new output slice
    /// (emitting the previous one unless it was fully deleted); a column
    /// entry joins the current slice unless the tombstone rules drop it.
    /// Output slices split at [`TARGET_MAX_SLICE_BYTES`] to keep the
    /// downstream writer within its own bounds.
    pub fn next_slice(&mut self) -> Result<Option<SliceBuffer>> {
        while self.ensure_merge_buffer()? {
            let entry = self
                .merge_buf
                .pop_front()
                .expect("ensure_merge_buffer filled the buffer");
            match entry {
                BufferEntry::Metadata { key, meta } => {
                    // metadata at a natural start covers its whole
                    // subrange, so a slice beginning mid-group inherits the
                    // group's resolved metadata
                    let meta = match &self.building {
                        Some(out)
                            if self.comparator.compare(&out.start_key, &key, self.depth - 1)
                                == Ordering::Equal =>
                        {
                            SliceMetadata::resolve(&out.meta, &meta)
                        }
                        _ => meta,
                    };
                    let finished = self.building.replace(OutSlice::new(key, meta));
                    if let Some(out) = finished {
                        if !out.fully_deleted(self.major, self.gc_before) {
                            return Ok(Some(out.into_buffer()));
                        }
                    }
                }
                BufferEntry::Column { key, column } => {
                    let mut building = self
                        .building
                        .take()
                        .expect("slices always begin with metadata");
                    if column.is_deleted(&building.meta, self.major, self.gc_before) {
                        self.building = Some(building);
                        continue;
                    }
                    let oversized = !building.columns.is_empty()
                        && building.bytes + column.serialized_size() > TARGET_MAX_SLICE_BYTES;
                    if oversized {
                        let mut continuation = OutSlice::new(key, building.meta.clone());
                        continuation.push(column);
                        self.building = Some(continuation);
                        return Ok(Some(building.into_buffer()));
                    }
                    building.push(column);
                    self.building = Some(building);
                }
            }
        }
        // inputs exhausted: emit whatever is still building
        if let Some(out) = self.building.take() {
            if !out.fully_deleted(self.major, self.gc_before) {
                return Ok(Some(out.into_buffer()));
            }
        }
        Ok(None)
    }

    /// Approximate bytes left to read across all inputs, for progress
    /// reporting.
    pub fn bytes_remaining(&self) -> u64 {
        self.scanners
            .iter()
            .map(|ranked| ranked.scanner.bytes_remaining())
            .sum()
    }

    /// Closes every remaining scanner, surfacing the first error only after
    /// all of them have been attempted.
    pub fn close(&mut self) -> Result<()> {
        let mut first_err = None;
        while let Some(ranked) = self.scanners.pop() {
            if let Err(e) = ranked.scanner.close() {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Guarantees the merge buffer holds the global minimum key by draining
    /// every scanner positioned at or below it. In the best case this is a
    /// single comparison of the buffer head against the scanner heap head.
    ///
    /// Returns `false` only when the buffer and every scanner are
    /// exhausted.
    fn ensure_merge_buffer(&mut self) -> Result<bool> {
        let minimum = match self.merge_buf.front() {
            Some(entry) => entry.key().clone(),
            None => match self.scanners.peek() {
                Some(top) => top.current_key().clone(),
                None => return Ok(false),
            },
        };
        loop {
            let due = match self.scanners.peek() {
                Some(top) => {
                    self.comparator.compare(top.current_key(), &minimum, self.depth)
                        != Ordering::Greater
                }
                None => false,
            };
            if !due {
                break;
            }
            let mut ranked = match self.scanners.pop() {
                Some(ranked) => ranked,
                None => break,
            };
            let slice = ranked
                .scanner
                .get()
                .cloned()
                .expect("ranked scanners are always positioned at a slice");
            let columns = ranked.scanner.columns()?;
            self.merge_to_buffer(slice, columns);
            if ranked.scanner.next()? {
                self.scanners.push(ranked);
            } else {
                // exhausted: close eagerly rather than leaking the handle
                ranked.scanner.close()?;
            }
        }
        Ok(true)
    }

    /// Merges one input slice and its columns into the buffer in place.
    /// The slice's metadata leads the input so that it lands ahead of, and
    /// applies to, the columns behind it.
    fn merge_to_buffer(&mut self, slice: Slice, columns: Vec<Column>) {
        let added = columns.len() + 1;
        let mut rhs = Vec::with_capacity(added);
        rhs.push(BufferEntry::Metadata {
            key: slice.start_key.clone(),
            meta: slice.meta,
        });
        for column in columns {
            rhs.push(BufferEntry::Column {
                key: slice.start_key.with_name(Name::bytes(column.name())),
                column,
            });
        }

        let mut rhs = rhs.into_iter().peekable();
        let mut idx = 0;
        while idx < self.merge_buf.len() {
            let Some(next) = rhs.peek() else {
                break;
            };
            match self.entry_cmp(&self.merge_buf[idx], next) {
                Ordering::Less => idx += 1,
                Ordering::Equal => {
                    let incoming = rhs.next().expect("peeked entry");
                    resolve_in_place(&mut self.merge_buf[idx], incoming);
                }
                Ordering::Greater => {
                    let incoming = rhs.next().expect("peeked entry");
                    self.merge_buf.insert(idx, incoming);
                    idx += 1;
                }
            }
        }
        for entry in rhs {
            self.merge_buf.push_back(entry);
        }
        trace!(
            "merge buffer holds {} entries after adding {}",
            self.merge_buf.len(),
            added
        );
    }

    /// Buffer order: key order, with metadata sorting before columns at
    /// equal keys so it can apply to them.
    fn entry_cmp(&self, a: &BufferEntry, b: &BufferEntry) -> Ordering {
        self.comparator
            .compare(a.key(), b.key(), self.depth)
            .then_with(|| a.rank().cmp(&b.rank()))
    }
}

/// Two equal-keyed entries of the same kind collapse into one: metadata by
/// pairwise max, columns by priority.
fn resolve_in_place(existing: &mut BufferEntry, incoming: BufferEntry) {
    match (existing, incoming) {
        (BufferEntry::Metadata { meta, .. }, BufferEntry::Metadata { meta: rhs, .. }) => {
            *meta = SliceMetadata::resolve(meta, &rhs);
        }
        (BufferEntry::Column { column, .. }, BufferEntry::Column { column: rhs, .. }) => {
            if column.compare_priority(&rhs) != Ordering::Greater {
                *column = rhs;
            }
        }
        // entry_cmp never reports equality across kinds
        _ => unreachable!("resolving buffer entries of different kinds"),
    }
}

/// An ordered entry in the merge buffer: a slice's metadata, or one of its
/// columns, keyed for the global merge order.
enum BufferEntry {
    Metadata { key: ColumnKey, meta: SliceMetadata },
    Column { key: ColumnKey, column: Column },
}

impl BufferEntry {
    fn key(&self) -> &ColumnKey {
        match self {
            BufferEntry::Metadata { key, .. } => key,
            BufferEntry::Column { key, .. } => key,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            BufferEntry::Metadata { .. } => 0,
            BufferEntry::Column { .. } => 1,
        }
    }
}

/// The output slice being assembled between emissions.
struct OutSlice {
    meta: SliceMetadata,
    start_key: ColumnKey,
    columns: Vec<Column>,
    bytes: usize,
}

impl OutSlice {
    fn new(start_key: ColumnKey, meta: SliceMetadata) -> OutSlice {
        OutSlice {
            meta,
            start_key,
            columns: Vec::new(),
            bytes: 0,
        }
    }

    fn push(&mut self, column: Column) {
        self.bytes += column.serialized_size();
        self.columns.push(column);
    }

    /// A slice all of whose columns were dropped, with metadata that is
    /// either empty or old enough to collect under a major compaction.
    fn fully_deleted(&self, major: bool, gc_before: i32) -> bool {
        self.columns.is_empty()
            && (self.meta.is_clear()
                || (major && self.meta.max_local_deletion_time() < gc_before))
    }

    fn into_buffer(self) -> SliceBuffer {
        SliceBuffer::new(self.meta, self.start_key, self.columns)
    }
}

/// A scanner ranked by the key of the slice it is positioned at, with a
/// stable id so equal keys pop in a deterministic order.
struct RankedScanner {
    scanner: SSTableScanner,
    comparator: KeyComparator,
    id: usize,
}

impl RankedScanner {
    fn current_key(&self) -> &ColumnKey {
        &self
            .scanner
            .get()
            .expect("ranked scanners are always positioned at a slice")
            .start_key
    }
}

impl PartialEq for RankedScanner {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for RankedScanner {}

impl PartialOrd for RankedScanner {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RankedScanner {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse the comparison so the smallest
        // current key pops first, tie-breaking on scanner id.
        let depth = self.comparator.depth();
        other
            .comparator
            .compare(other.current_key(), self.current_key(), depth)
            .then_with(|| other.id.cmp(&self.id))
    }
}
