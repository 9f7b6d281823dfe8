use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, Seek, SeekFrom};

use model::{Column, ColumnKey, Name, Slice};

use crate::error::{Result, SSTableError};
use crate::filter::{ColumnNameFilter, MatchResult};
use crate::format::{
    component_path, read_block_header, read_column, read_index_entry, read_slice_mark,
    SliceMark, BLOCK_END, BLOCK_HEADER_BYTES, CODEC_IDENTITY, DATA_COMPONENT, INDEX_COMPONENT,
};
use crate::reader::SSTableReader;

static LEAF_FALLBACK: Name = Name::Begin;

/// An iterator over an sstable's slices in key order.
///
/// A scanner owns its file descriptors and is single-threaded; the shared
/// reader state (index sample, bloom filter) is borrowed through a cloned
/// [`SSTableReader`] handle, which also keeps the files on disk for as long
/// as the scanner lives.
///
/// Reads are block-at-a-time: the current block is held decoded in memory
/// and slice marks are parsed out of it lazily. Column payloads are only
/// decoded by [`columns`](SSTableScanner::columns), so seeking skips whole
/// slices by their marks alone.
pub struct SSTableScanner {
    sstable: SSTableReader,
    data: BufReader<File>,
    /// Dense index handle, opened on the first seek.
    index: Option<BufReader<File>>,
    data_len: u64,
    /// Decoded payload of the current block.
    block: Vec<u8>,
    /// Data-file offset of the current block's header.
    block_start: u64,
    /// Data-file offset just past the current block.
    block_end: u64,
    /// Cursor into `block`.
    pos: usize,
    current: Option<CurrentSlice>,
    filter: Option<Box<dyn ColumnNameFilter>>,
    /// Target recorded when the filter asked to seek past the current
    /// slice; consumed by the next advance.
    filter_seek: Option<ColumnKey>,
    /// Set when the filter ruled out every later slice; the next advance
    /// reports EOF.
    filter_done: bool,
}

struct CurrentSlice {
    mark: SliceMark,
    payload_start: usize,
}

impl SSTableScanner {
    pub(crate) fn open(sstable: SSTableReader, buffer_bytes: usize) -> Result<SSTableScanner> {
        let file = File::open(component_path(sstable.base(), DATA_COMPONENT, false))?;
        let data = BufReader::with_capacity(buffer_bytes.max(4096), file);
        let data_len = sstable.data_len();
        let mut scanner = SSTableScanner {
            sstable,
            data,
            index: None,
            data_len,
            block: Vec::new(),
            block_start: 0,
            block_end: 0,
            pos: 0,
            current: None,
            filter: None,
            filter_seek: None,
            filter_done: false,
        };
        if scanner.read_block_at(0)? {
            scanner.parse_mark()?;
        }
        Ok(scanner)
    }

    /// The sstable this scanner reads.
    pub fn sstable(&self) -> &SSTableReader {
        &self.sstable
    }

    /// The comparator ordering the returned slices.
    pub fn comparator(&self) -> &model::KeyComparator {
        self.sstable.comparator()
    }

    /// The slice the scanner is positioned at, or `None` at EOF.
    pub fn get(&self) -> Option<&Slice> {
        self.current.as_ref().map(|current| &current.mark.slice)
    }

    /// Column count recorded in the current slice's mark.
    pub fn column_count(&self) -> u32 {
        self.current
            .as_ref()
            .map_or(0, |current| current.mark.column_count)
    }

    /// Decodes the current slice's columns, consulting the installed
    /// column filter.
    ///
    /// The filter's range verdict decides skip, scan, or seek:
    /// `MatchCont` decodes the slice and keeps the columns `matches`
    /// accepts; `NomatchDone` skips it and makes the next advance report
    /// EOF; `Seek(target)` skips it and turns the next advance into a
    /// forward seek to the first slice that can contain `target`. A slice
    /// the filter rules out decodes to no columns but is still surfaced by
    /// `get`, since its metadata may matter to the caller.
    pub fn columns(&mut self) -> Result<Vec<Column>> {
        let Some(current) = &self.current else {
            return Ok(Vec::new());
        };
        if let Some(filter) = &self.filter {
            let slice = &current.mark.slice;
            let begin = leaf(&slice.start_key);
            let end = leaf(&slice.end_key);
            match filter.matches_between(begin, end) {
                MatchResult::MatchCont => {}
                MatchResult::NomatchDone => {
                    self.filter_done = true;
                    return Ok(Vec::new());
                }
                MatchResult::Seek(target) => {
                    self.filter_seek = Some(slice.start_key.with_name(Name::bytes(target)));
                    return Ok(Vec::new());
                }
            }
        }
        let payload_end = current.payload_start + current.mark.payload_len as usize;
        let mut cursor = &self.block[current.payload_start..payload_end];
        let mut out = Vec::with_capacity(current.mark.column_count as usize);
        for _ in 0..current.mark.column_count {
            let column = read_column(&mut cursor)?;
            let keep = self
                .filter
                .as_ref()
                .map_or(true, |filter| filter.matches(column.name()));
            if keep {
                out.push(column);
            }
        }
        if !cursor.is_empty() {
            return Err(SSTableError::Corrupt(
                "slice payload longer than its column records".into(),
            ));
        }
        Ok(out)
    }

    /// Advances to the next slice; `false` at EOF.
    ///
    /// Honors any verdict the filter handed down while decoding the
    /// current slice: a pending `NomatchDone` ends the scan here, and a
    /// pending `Seek` target jumps forward instead of stepping.
    pub fn next(&mut self) -> Result<bool> {
        if self.filter_done {
            self.current = None;
            return Ok(false);
        }
        if let Some(target) = self.filter_seek.take() {
            if self.seek_to(&target)? {
                return Ok(true);
            }
            // the filter says the sstable holds nothing at or after the
            // target
            self.current = None;
            return Ok(false);
        }
        let Some(current) = self.current.take() else {
            return Ok(false);
        };
        self.pos = current.payload_start + current.mark.payload_len as usize;
        if current.mark.status == BLOCK_END {
            if self.pos != self.block.len() {
                return Err(SSTableError::Corrupt(
                    "trailing bytes after the final slice in a block".into(),
                ));
            }
            if !self.read_block_at(self.block_end)? {
                return Ok(false);
            }
        } else if self.pos >= self.block.len() {
            return Err(SSTableError::Corrupt(
                "block ended without a closing slice mark".into(),
            ));
        }
        self.parse_mark()?;
        Ok(true)
    }

    /// Positions at the first slice whose end key is at-or-after `key`.
    ///
    /// Returns `false` without moving when the bloom filter rules a
    /// fully-qualified key out, and `false` at EOF when no slice reaches
    /// the target. Never moves backward: a target behind the current
    /// position resolves at the current slice.
    pub fn seek_to(&mut self, key: &ColumnKey) -> Result<bool> {
        // an explicit reposition supersedes any pending filter verdict
        self.filter_seek = None;
        self.filter_done = false;
        let depth = self.sstable.column_depth();
        let qualified =
            key.depth() == depth && key.names.iter().all(|name| !name.is_sentinel());
        if qualified && !self.sstable.may_contain(key) {
            return Ok(false);
        }
        if self.current.is_none() {
            return Ok(false);
        }
        if let Some(offset) = self.locate_block(key, depth)? {
            if offset > self.block_start {
                if !self.read_block_at(offset)? {
                    return Ok(false);
                }
                self.parse_mark()?;
            }
        }
        loop {
            let Some(current) = &self.current else {
                return Ok(false);
            };
            let end = &current.mark.slice.end_key;
            if self.sstable.comparator().compare(end, key, depth) != Ordering::Less {
                return Ok(true);
            }
            if !self.next()? {
                return Ok(false);
            }
        }
    }

    /// Installs a column filter consulted by
    /// [`columns`](SSTableScanner::columns) to decide skip, scan, or seek
    /// per slice. Compaction must not install one.
    pub fn set_column_filter(&mut self, filter: Box<dyn ColumnNameFilter>) {
        self.filter = Some(filter);
        self.filter_seek = None;
        self.filter_done = false;
    }

    /// Approximate bytes between the current position and EOF.
    pub fn bytes_remaining(&self) -> u64 {
        if self.current.is_none() {
            return 0;
        }
        let in_block = self.block.len().saturating_sub(self.pos) as u64;
        self.data_len.saturating_sub(self.block_end) + in_block
    }

    /// Releases the scanner's file handles.
    pub fn close(self) -> Result<()> {
        Ok(())
    }

    /// Loads the block whose header sits at `offset`; `false` at EOF.
    fn read_block_at(&mut self, offset: u64) -> Result<bool> {
        if offset >= self.data_len {
            self.block.clear();
            self.pos = 0;
            self.block_start = offset;
            self.block_end = offset;
            return Ok(false);
        }
        self.data.seek(SeekFrom::Start(offset))?;
        let Some(header) = read_block_header(&mut self.data)? else {
            return Ok(false);
        };
        if header.codec != CODEC_IDENTITY {
            return Err(SSTableError::Corrupt(format!(
                "unknown block codec tag {}",
                header.codec
            )));
        }
        self.block.resize(header.length as usize, 0);
        std::io::Read::read_exact(&mut self.data, &mut self.block)?;
        self.block_start = offset;
        self.block_end = offset + BLOCK_HEADER_BYTES + header.length as u64;
        self.pos = 0;
        Ok(true)
    }

    /// Parses the slice mark at the block cursor into `current`.
    fn parse_mark(&mut self) -> Result<()> {
        let mut cursor = &self.block[self.pos..];
        let before = cursor.len();
        let mark = read_slice_mark(&mut cursor)?;
        let consumed = before - cursor.len();
        let payload_start = self.pos + consumed;
        let payload_end = payload_start + mark.payload_len as usize;
        if payload_end > self.block.len() {
            return Err(SSTableError::Corrupt(
                "slice payload overruns its block".into(),
            ));
        }
        self.pos = payload_start;
        self.current = Some(CurrentSlice {
            mark,
            payload_start,
        });
        Ok(())
    }

    /// Data-file offset of the last block whose first key is at-or-before
    /// `key`: binary search over the retained sample, then a forward scan
    /// of the dense index file. `None` when the target precedes every
    /// block.
    fn locate_block(&mut self, key: &ColumnKey, depth: usize) -> Result<Option<u64>> {
        let (mut best, index_offset) = match self.sstable.floor_sampled(key, depth) {
            Some(sample) => (sample.data_offset, sample.index_offset),
            None => return Ok(None),
        };
        if self.index.is_none() {
            let path = component_path(self.sstable.base(), INDEX_COMPONENT, false);
            self.index = Some(BufReader::new(File::open(path)?));
        }
        let index = self.index.as_mut().expect("index handle just opened");
        index.seek(SeekFrom::Start(index_offset))?;
        while let Some(entry) = read_index_entry(index)? {
            if self
                .sstable
                .comparator()
                .compare(&entry.key, key, depth)
                == Ordering::Greater
            {
                break;
            }
            best = entry.data_offset;
        }
        Ok(Some(best))
    }
}

fn leaf(key: &ColumnKey) -> &Name {
    key.names.last().unwrap_or(&LEAF_FALLBACK)
}
