//! Error types for ChronoDB core.

use crate::types::{AwaitTarget, BitemporalInstant};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised by the core.
///
/// Timing conditions ([`NodeOutOfSync`](Self::NodeOutOfSync),
/// [`TimeoutExceeded`](Self::TimeoutExceeded)) are recoverable and always
/// surfaced to the caller. Integrity failures (see
/// [`is_integrity_failure`](Self::is_integrity_failure)) mean the stored
/// data cannot be trusted and are never retried.
///
/// A transaction that aborts is not an error; it is reported through
/// `Node::has_tx_committed` and the `committed` flag on events.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] chronodb_storage::StorageError),

    /// Canonical CBOR error.
    #[error("codec error: {0}")]
    Codec(#[from] chronodb_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The requested read bound has not been indexed yet.
    #[error("node out of sync: requested {requested}, latest indexed {latest_indexed:?}")]
    NodeOutOfSync {
        /// What the caller asked for.
        requested: AwaitTarget,
        /// How far the indexer had got.
        latest_indexed: Option<BitemporalInstant>,
    },

    /// An await deadline elapsed first.
    #[error("timed out after {waited:?} (limit {timeout:?}) waiting for {target}")]
    TimeoutExceeded {
        /// What was awaited.
        target: AwaitTarget,
        /// Time actually spent waiting.
        waited: Duration,
        /// The caller's limit.
        timeout: Duration,
    },

    /// The transaction log is malformed.
    #[error("transaction log corruption: {message}")]
    LogCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A stored document body is malformed.
    #[error("document corruption: {message}")]
    DocumentCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// A record failed its CRC check.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Checksum of the bytes read.
        actual: u32,
    },

    /// A transaction references a document body the store does not hold.
    #[error("document {hash} is missing from the document store")]
    DocumentMissing {
        /// Hex content hash.
        hash: String,
    },

    /// The indexer hit an integrity failure and stopped.
    #[error("indexer stopped: {reason}")]
    IndexerStopped {
        /// The failure that stopped it.
        reason: String,
    },

    /// A transaction record exceeds the configured size limit.
    #[error("transaction record of {size} bytes exceeds limit {max}")]
    RecordTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A caller-supplied value was rejected.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// What was wrong.
        message: String,
    },

    /// Operation not permitted in the current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Why it is not permitted.
        message: String,
    },

    /// The node has been closed.
    #[error("node is closed")]
    NodeClosed,
}

impl CoreError {
    /// Creates a log corruption error.
    pub fn log_corruption(message: impl Into<String>) -> Self {
        Self::LogCorruption {
            message: message.into(),
        }
    }

    /// Creates a document corruption error.
    pub fn document_corruption(message: impl Into<String>) -> Self {
        Self::DocumentCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an indexer stopped error.
    pub fn indexer_stopped(reason: impl Into<String>) -> Self {
        Self::IndexerStopped {
            reason: reason.into(),
        }
    }

    /// Returns `true` if the error means stored data cannot be trusted.
    ///
    /// The indexer stops on these instead of aborting a single transaction.
    #[must_use]
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            Self::Storage(_)
                | Self::Codec(_)
                | Self::Io(_)
                | Self::LogCorruption { .. }
                | Self::DocumentCorruption { .. }
                | Self::ChecksumMismatch { .. }
        )
    }

    /// Returns `true` for errors a caller can resolve by waiting or retrying.
    #[must_use]
    pub fn is_timing(&self) -> bool {
        matches!(self, Self::NodeOutOfSync { .. } | Self::TimeoutExceeded { .. })
    }
}
