//! Storage errors.

use std::io;
use thiserror::Error;

/// Result alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors raised by a [`crate::StorageBackend`].
#[derive(Debug, Error)]
pub enum StorageError {
    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A read range extended past the end of the store.
    #[error("read past end of storage: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// Requested offset.
        offset: u64,
        /// Requested length.
        len: usize,
        /// Size of the store at the time of the read.
        size: u64,
    },

    /// An in-place write extended past the end of the store.
    #[error("write past end of storage: offset {offset}, len {len}, size {size}")]
    WritePastEnd {
        /// Requested offset.
        offset: u64,
        /// Length of the data.
        len: usize,
        /// Size of the store at the time of the write.
        size: u64,
    },

    /// Truncation was asked to grow the store.
    #[error("cannot truncate to {requested} bytes, store holds only {size}")]
    InvalidTruncate {
        /// Requested new size.
        requested: u64,
        /// Current size.
        size: u64,
    },
}
