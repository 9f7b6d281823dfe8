//! On-disk record codecs and framing constants.
//!
//! All integers are big-endian. The data file is a sequence of blocks, each
//! a [`BlockHeader`] followed by `length` payload bytes holding
//! `(SliceMark, column records)` frames; the index file is a dense sequence
//! of [`IndexEntry`] records; the filter file is a length-prefixed
//! serialized bloom filter. See the crate docs for the full layout.

use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use model::{Column, ColumnKey, DecoratedKey, LevelDeletion, Name, Slice, SliceMetadata};

use crate::error::{Result, SSTableError};

/// Target decompressed size of a block: the minimum unit of read
/// amplification. A single oversized slice can stretch a block past this.
pub const TARGET_MAX_BLOCK_BYTES: usize = 1 << 14;

/// Target serialized size of one slice; the writer and compaction both
/// split at this bound, which is what keeps the compaction merge buffer's
/// memory bounded.
pub const TARGET_MAX_SLICE_BYTES: usize = 1 << 12;

/// One of every `INDEX_INTERVAL` index entries is retained in memory for
/// binary search; the rest are reached by scanning the index file forward
/// from the nearest retained entry.
pub const INDEX_INTERVAL: usize = 128;

/// Block codec tags. Only the identity codec is implemented; the field is
/// reserved so compressed blocks stay representable.
pub const CODEC_IDENTITY: u8 = 0;

/// Marker spliced into file names while a writer owns them.
pub const TEMPFILE_MARKER: &str = "tmp";

/// `SliceMark` status: more slices follow in this block.
pub const BLOCK_CONTINUE: u8 = 0;
/// `SliceMark` status: last slice in this block.
pub const BLOCK_END: u8 = 1;

/// Serialized size of a [`BlockHeader`]: length, codec tag, three reserved
/// bytes.
pub const BLOCK_HEADER_BYTES: u64 = 8;

pub const DATA_COMPONENT: &str = "Data.db";
pub const INDEX_COMPONENT: &str = "Index.db";
pub const FILTER_COMPONENT: &str = "Filter.db";

// Allocation guards applied while decoding, so corrupt length fields fail
// instead of exhausting memory.
const MAX_DK_BYTES: usize = 64 * 1024;
const MAX_VALUE_BYTES: usize = 10 * 1024 * 1024;
const MAX_BLOCK_BYTES: usize = 64 * 1024 * 1024;
const MAX_META_DEPTH: u8 = 8;

// Discriminators for zero-length name encodings.
const NAME_FLAG_BEGIN: u8 = 0;
const NAME_FLAG_END: u8 = 1;
const NAME_FLAG_EMPTY: u8 = 2;

/// `<base>-Data.db`, or `<base>-tmp-Data.db` while a writer owns it.
pub fn component_path(base: &Path, component: &str, tmp: bool) -> PathBuf {
    let stem = base
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = if tmp {
        format!("{}-{}-{}", stem, TEMPFILE_MARKER, component)
    } else {
        format!("{}-{}", stem, component)
    };
    base.with_file_name(name)
}

/// Framing header preceding every block in the data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub length: u32,
    pub codec: u8,
}

pub fn write_block_header<W: Write>(w: &mut W, header: &BlockHeader) -> Result<()> {
    w.write_u32::<BigEndian>(header.length)?;
    w.write_u8(header.codec)?;
    w.write_all(&[0u8; 3])?;
    Ok(())
}

/// Reads the next block header, or `None` at a clean end of file. A partial
/// header is corruption, not EOF.
pub fn read_block_header<R: Read>(r: &mut R) -> Result<Option<BlockHeader>> {
    let mut buf = [0u8; BLOCK_HEADER_BYTES as usize];
    let read = fill(r, &mut buf)?;
    if read == 0 {
        return Ok(None);
    }
    if read < buf.len() {
        return Err(SSTableError::Corrupt("truncated block header".into()));
    }
    let length = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    if length as usize > MAX_BLOCK_BYTES {
        return Err(SSTableError::Corrupt(format!(
            "block length {} exceeds maximum {}",
            length, MAX_BLOCK_BYTES
        )));
    }
    Ok(Some(BlockHeader {
        length,
        codec: buf[4],
    }))
}

// -------------------- names & keys --------------------

pub fn write_name<W: Write>(w: &mut W, name: &Name) -> Result<()> {
    match name {
        Name::Bytes(bytes) if !bytes.is_empty() => {
            if bytes.len() > u16::MAX as usize {
                return Err(SSTableError::BoundExceeded(format!(
                    "name of {} bytes does not fit its length prefix",
                    bytes.len()
                )));
            }
            w.write_u16::<BigEndian>(bytes.len() as u16)?;
            w.write_all(bytes)?;
        }
        Name::Bytes(_) => {
            w.write_u16::<BigEndian>(0)?;
            w.write_u8(NAME_FLAG_EMPTY)?;
        }
        Name::Begin => {
            w.write_u16::<BigEndian>(0)?;
            w.write_u8(NAME_FLAG_BEGIN)?;
        }
        Name::End => {
            w.write_u16::<BigEndian>(0)?;
            w.write_u8(NAME_FLAG_END)?;
        }
    }
    Ok(())
}

pub fn read_name<R: Read>(r: &mut R) -> Result<Name> {
    let len = r.read_u16::<BigEndian>()? as usize;
    if len > 0 {
        let mut bytes = vec![0u8; len];
        r.read_exact(&mut bytes)?;
        return Ok(Name::Bytes(bytes));
    }
    match r.read_u8()? {
        NAME_FLAG_BEGIN => Ok(Name::Begin),
        NAME_FLAG_END => Ok(Name::End),
        NAME_FLAG_EMPTY => Ok(Name::Bytes(Vec::new())),
        flag => Err(SSTableError::Corrupt(format!(
            "unknown name sentinel flag {}",
            flag
        ))),
    }
}

pub fn write_column_key<W: Write>(w: &mut W, key: &ColumnKey) -> Result<()> {
    let dk_len = 2 + key.dk.token.len() + key.dk.key.len();
    if dk_len > u16::MAX as usize {
        return Err(SSTableError::BoundExceeded(format!(
            "decorated key of {} bytes does not fit its length prefix",
            dk_len
        )));
    }
    w.write_u16::<BigEndian>(dk_len as u16)?;
    w.write_u16::<BigEndian>(key.dk.token.len() as u16)?;
    w.write_all(&key.dk.token)?;
    w.write_all(&key.dk.key)?;
    if key.names.len() > u8::MAX as usize {
        return Err(SSTableError::BoundExceeded(format!(
            "column key with {} name components",
            key.names.len()
        )));
    }
    w.write_u8(key.names.len() as u8)?;
    for name in &key.names {
        write_name(w, name)?;
    }
    Ok(())
}

pub fn read_column_key<R: Read>(r: &mut R) -> Result<ColumnKey> {
    let dk_len = r.read_u16::<BigEndian>()? as usize;
    let dk = read_decorated_key_body(r, dk_len)?;
    let name_count = r.read_u8()? as usize;
    let mut names = Vec::with_capacity(name_count);
    for _ in 0..name_count {
        names.push(read_name(r)?);
    }
    Ok(ColumnKey::new(dk, names))
}

fn read_decorated_key_body<R: Read>(r: &mut R, dk_len: usize) -> Result<DecoratedKey> {
    if dk_len < 2 || dk_len > MAX_DK_BYTES {
        return Err(SSTableError::Corrupt(format!(
            "impossible decorated key length {}",
            dk_len
        )));
    }
    let mut buf = vec![0u8; dk_len];
    r.read_exact(&mut buf)?;
    let token_len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if 2 + token_len > dk_len {
        return Err(SSTableError::Corrupt(format!(
            "token length {} overruns decorated key of {} bytes",
            token_len, dk_len
        )));
    }
    let token = buf[2..2 + token_len].to_vec();
    let key = buf[2 + token_len..].to_vec();
    Ok(DecoratedKey::new(token, key))
}

// -------------------- metadata & columns --------------------

pub fn write_metadata<W: Write>(w: &mut W, meta: &SliceMetadata) -> Result<()> {
    if meta.depth() > MAX_META_DEPTH as usize {
        return Err(SSTableError::BoundExceeded(format!(
            "metadata with {} ancestor levels",
            meta.depth()
        )));
    }
    w.write_u8(meta.depth() as u8)?;
    for level in meta.levels() {
        w.write_i64::<BigEndian>(level.marked_for_delete_at)?;
        w.write_i32::<BigEndian>(level.local_deletion_time)?;
    }
    Ok(())
}

pub fn read_metadata<R: Read>(r: &mut R) -> Result<SliceMetadata> {
    let depth = r.read_u8()?;
    if depth > MAX_META_DEPTH {
        return Err(SSTableError::Corrupt(format!(
            "metadata depth {} exceeds maximum {}",
            depth, MAX_META_DEPTH
        )));
    }
    let mut levels = Vec::with_capacity(depth as usize);
    for _ in 0..depth {
        let marked_for_delete_at = r.read_i64::<BigEndian>()?;
        let local_deletion_time = r.read_i32::<BigEndian>()?;
        levels.push(LevelDeletion::new(marked_for_delete_at, local_deletion_time));
    }
    Ok(SliceMetadata::from_levels(levels))
}

pub fn write_column<W: Write>(w: &mut W, column: &Column) -> Result<()> {
    if column.name().len() > u16::MAX as usize {
        return Err(SSTableError::BoundExceeded(format!(
            "column name of {} bytes does not fit its length prefix",
            column.name().len()
        )));
    }
    w.write_u16::<BigEndian>(column.name().len() as u16)?;
    w.write_all(column.name())?;
    w.write_i64::<BigEndian>(column.timestamp())?;
    w.write_u8(column.flags())?;
    w.write_u32::<BigEndian>(column.value().len() as u32)?;
    w.write_all(column.value())?;
    Ok(())
}

pub fn read_column<R: Read>(r: &mut R) -> Result<Column> {
    let name_len = r.read_u16::<BigEndian>()? as usize;
    let mut name = vec![0u8; name_len];
    r.read_exact(&mut name)?;
    let timestamp = r.read_i64::<BigEndian>()?;
    let flags = r.read_u8()?;
    let value_len = r.read_u32::<BigEndian>()? as usize;
    if value_len > MAX_VALUE_BYTES {
        return Err(SSTableError::Corrupt(format!(
            "column value length {} exceeds maximum {}",
            value_len, MAX_VALUE_BYTES
        )));
    }
    let mut value = vec![0u8; value_len];
    r.read_exact(&mut value)?;
    Ok(Column::from_parts(name, value, timestamp, flags))
}

// -------------------- slice marks --------------------

/// The frame header written at the start of every slice within a block.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceMark {
    pub slice: Slice,
    pub payload_len: u32,
    pub column_count: u32,
    pub status: u8,
}

pub fn write_slice_mark<W: Write>(w: &mut W, mark: &SliceMark) -> Result<()> {
    write_metadata(w, &mark.slice.meta)?;
    write_column_key(w, &mark.slice.start_key)?;
    write_column_key(w, &mark.slice.end_key)?;
    match &mark.slice.next_key {
        Some(next) => {
            w.write_u8(1)?;
            write_column_key(w, next)?;
        }
        None => w.write_u8(0)?,
    }
    w.write_u32::<BigEndian>(mark.payload_len)?;
    w.write_u32::<BigEndian>(mark.column_count)?;
    w.write_u8(mark.status)?;
    Ok(())
}

pub fn read_slice_mark<R: Read>(r: &mut R) -> Result<SliceMark> {
    let meta = read_metadata(r)?;
    let start_key = read_column_key(r)?;
    let end_key = read_column_key(r)?;
    let next_key = match r.read_u8()? {
        0 => None,
        1 => Some(read_column_key(r)?),
        flag => {
            return Err(SSTableError::Corrupt(format!(
                "bad next-key presence flag {}",
                flag
            )))
        }
    };
    let payload_len = r.read_u32::<BigEndian>()?;
    let column_count = r.read_u32::<BigEndian>()?;
    let status = r.read_u8()?;
    if status != BLOCK_CONTINUE && status != BLOCK_END {
        return Err(SSTableError::Corrupt(format!(
            "bad slice mark status {}",
            status
        )));
    }
    Ok(SliceMark {
        slice: Slice {
            meta,
            start_key,
            end_key,
            next_key,
        },
        payload_len,
        column_count,
        status,
    })
}

// -------------------- index entries --------------------

/// One entry per closed block: the block's first key plus the offset of
/// this entry in the index file and of the block in the data file.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub key: ColumnKey,
    pub index_offset: u64,
    pub data_offset: u64,
}

impl IndexEntry {
    pub fn write_to<W: Write>(&self, w: &mut W) -> Result<()> {
        write_column_key(w, &self.key)?;
        w.write_u64::<BigEndian>(self.index_offset)?;
        w.write_u64::<BigEndian>(self.data_offset)?;
        Ok(())
    }
}

/// Reads the next index entry, or `None` at a clean end of file.
pub fn read_index_entry<R: Read>(r: &mut R) -> Result<Option<IndexEntry>> {
    let mut len_buf = [0u8; 2];
    let read = fill(r, &mut len_buf)?;
    if read == 0 {
        return Ok(None);
    }
    if read < 2 {
        return Err(SSTableError::Corrupt("truncated index entry".into()));
    }
    let dk_len = u16::from_be_bytes(len_buf) as usize;
    let dk = read_decorated_key_body(r, dk_len)?;
    let name_count = r.read_u8()? as usize;
    let mut names = Vec::with_capacity(name_count);
    for _ in 0..name_count {
        names.push(read_name(r)?);
    }
    let index_offset = r.read_u64::<BigEndian>()?;
    let data_offset = r.read_u64::<BigEndian>()?;
    Ok(Some(IndexEntry {
        key: ColumnKey::new(dk, names),
        index_offset,
        data_offset,
    }))
}

/// Reads until `buf` is full or EOF; returns the number of bytes read.
fn fill<R: Read>(r: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut read = 0;
    while read < buf.len() {
        match r.read(&mut buf[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(read)
}
