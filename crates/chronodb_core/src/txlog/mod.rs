//! The append-only transaction log.
//!
//! The log is the source of truth: the index can always be rebuilt by
//! replaying it. Appends assign the next gapless tx id and a strictly
//! increasing tx time under one short lock, then write the framed record
//! with a single backend append. Recovery on open cuts off a record torn by
//! a crash mid-append: a partial header, or a header whose checksum holds
//! but whose frame runs past the end. Any other malformation is fatal.

mod cursor;
mod record;

pub use cursor::TxLogCursor;
pub use record::{TransactionRecord, LOG_MAGIC, LOG_VERSION};

use crate::config::Config;
use crate::error::{CoreError, CoreResult};
use crate::operation::TxOperation;
use crate::types::{BitemporalInstant, Timestamp, TxId};
use chronodb_storage::StorageBackend;
use parking_lot::Mutex;
use record::{encode_frame, verify_frame, RecordHeader, HEADER_SIZE};
use std::sync::Arc;

pub(crate) struct LogInner {
    backend: Box<dyn StorageBackend>,
    /// Frame offset of each record, indexed by tx id.
    offsets: Vec<u64>,
    last: Option<BitemporalInstant>,
}

impl LogInner {
    fn read_record(
        &self,
        tx_id: TxId,
        include_operations: bool,
    ) -> CoreResult<Option<TransactionRecord>> {
        let Some(&offset) = usize::try_from(tx_id.as_u64())
            .ok()
            .and_then(|i| self.offsets.get(i))
        else {
            return Ok(None);
        };
        let header = RecordHeader::parse(&self.backend.read_at(offset, HEADER_SIZE)?)?;
        if header.tx_id != tx_id {
            return Err(CoreError::log_corruption(format!(
                "expected {tx_id} at offset {offset}, found {}",
                header.tx_id
            )));
        }
        let frame = self.backend.read_at(offset, header.frame_len())?;
        record::decode_record(&header, &frame, include_operations).map(Some)
    }
}

/// Thread-safe handle to the transaction log.
#[derive(Clone)]
pub struct TxLog {
    inner: Arc<Mutex<LogInner>>,
    sync_on_commit: bool,
    max_record_size: usize,
}

impl TxLog {
    /// Opens a log, validating every record and truncating a torn tail.
    ///
    /// # Errors
    ///
    /// [`CoreError::LogCorruption`] for bad magic, an unsupported version, a
    /// header or record checksum mismatch, a tx id gap or tx time going
    /// backwards; storage errors.
    pub fn open(mut backend: Box<dyn StorageBackend>, config: &Config) -> CoreResult<Self> {
        let size = backend.size()?;
        let mut offsets = Vec::new();
        let mut last: Option<BitemporalInstant> = None;
        let mut offset = 0u64;

        while offset < size {
            let remaining = size - offset;
            if remaining < HEADER_SIZE as u64 {
                break;
            }
            let header = RecordHeader::parse(&backend.read_at(offset, HEADER_SIZE)?)?;
            if remaining < header.frame_len() as u64 {
                break;
            }
            let frame = backend.read_at(offset, header.frame_len())?;
            verify_frame(&header, &frame)?;

            let expected = last.map_or(TxId::FIRST, |l| l.tx_id.next());
            if header.tx_id != expected {
                return Err(CoreError::log_corruption(format!(
                    "tx id gap: expected {expected}, found {}",
                    header.tx_id
                )));
            }
            if let Some(prev) = last {
                if header.tx_time < prev.tx_time {
                    return Err(CoreError::log_corruption(format!(
                        "tx time of {} goes backwards ({} < {})",
                        header.tx_id, header.tx_time, prev.tx_time
                    )));
                }
            }

            offsets.push(offset);
            last = Some(BitemporalInstant::new(header.tx_id, header.tx_time));
            offset += header.frame_len() as u64;
        }

        if offset < size {
            tracing::info!(
                offset,
                dropped = size - offset,
                "truncating torn transaction log tail"
            );
            backend.truncate(offset)?;
        }
        tracing::info!(records = offsets.len(), latest = ?last, "transaction log opened");

        Ok(Self {
            inner: Arc::new(Mutex::new(LogInner {
                backend,
                offsets,
                last,
            })),
            sync_on_commit: config.sync_on_commit,
            max_record_size: config.max_record_size,
        })
    }

    /// Appends a transaction and returns its id and time.
    ///
    /// Does not wait for indexing.
    ///
    /// # Errors
    ///
    /// [`CoreError::RecordTooLarge`] if the encoded operations exceed
    /// [`Config::max_record_size`]; storage errors. A failed write is rolled
    /// back so the log never holds a partial record.
    pub fn append(&self, operations: &[TxOperation]) -> CoreResult<BitemporalInstant> {
        let payload = TxOperation::encode_all(operations)?;
        if payload.len() > self.max_record_size {
            return Err(CoreError::RecordTooLarge {
                size: payload.len(),
                max: self.max_record_size,
            });
        }

        let mut inner = self.inner.lock();
        let tx = match inner.last {
            None => BitemporalInstant::new(TxId::FIRST, Timestamp::now()),
            Some(prev) => BitemporalInstant::new(
                prev.tx_id.next(),
                Timestamp::now().max(prev.tx_time.succ()),
            ),
        };
        let frame = encode_frame(tx, &payload)?;

        let before = inner.backend.size()?;
        let written = inner.backend.append(&frame).and_then(|offset| {
            if self.sync_on_commit {
                inner.backend.flush()?;
            }
            Ok(offset)
        });
        let offset = match written {
            Ok(offset) => offset,
            Err(e) => {
                if let Err(rollback) = inner.backend.truncate(before) {
                    tracing::warn!(error = %rollback, "could not roll back failed log append");
                }
                return Err(e.into());
            }
        };

        inner.offsets.push(offset);
        inner.last = Some(tx);
        Ok(tx)
    }

    /// Opens a lazy cursor over records with id `>= from`.
    ///
    /// The cursor covers the records present when it was opened. Operations
    /// are decoded only when `include_operations` is set.
    #[must_use]
    pub fn open_cursor(&self, from: TxId, include_operations: bool) -> TxLogCursor {
        let end = self.inner.lock().offsets.len() as u64;
        TxLogCursor::new(Arc::clone(&self.inner), from, TxId::new(end), include_operations)
    }

    /// Reads one record.
    ///
    /// # Errors
    ///
    /// Storage errors or [`CoreError::LogCorruption`].
    pub fn record(&self, tx_id: TxId, include_operations: bool) -> CoreResult<Option<TransactionRecord>> {
        self.inner.lock().read_record(tx_id, include_operations)
    }

    /// The most recently appended transaction.
    #[must_use]
    pub fn latest(&self) -> Option<BitemporalInstant> {
        self.inner.lock().last
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.inner.lock().offsets.len() as u64
    }

    /// Returns `true` if nothing was ever appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current size of the log in bytes.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.inner.lock().backend.size()?)
    }

    /// Flushes the backend.
    ///
    /// # Errors
    ///
    /// Storage errors.
    pub fn flush(&self) -> CoreResult<()> {
        self.inner.lock().backend.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for TxLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxLog")
            .field("latest", &self.latest())
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}
