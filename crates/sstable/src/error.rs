use std::io;

use thiserror::Error;

/// Errors surfaced by sstable writing, reading, and compaction.
///
/// Every error is fatal for the operation that raised it. I/O errors may be
/// retryable by the caller at a higher layer; nothing here retries
/// internally.
#[derive(Debug, Error)]
pub enum SSTableError {
    /// An underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// The caller appended a key that precedes the last written key. The
    /// write is aborted; temporary files are left for cleanup.
    #[error("keys appended out of order: {0}")]
    InputOrderViolation(String),

    /// Framing mismatch, truncated record, or impossible length while
    /// reading an sstable.
    #[error("corrupt sstable: {0}")]
    Corrupt(String),

    /// A slice, block, or record outgrew its size bound mid-write, which
    /// means the caller bypassed the boundary rules.
    #[error("size bound exceeded: {0}")]
    BoundExceeded(String),
}

pub type Result<T> = std::result::Result<T, SSTableError>;
