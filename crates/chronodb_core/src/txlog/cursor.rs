//! Lazy log cursor.

use super::{LogInner, TransactionRecord};
use crate::error::CoreResult;
use crate::types::TxId;
use parking_lot::Mutex;
use std::sync::Arc;

/// Iterator over log records in increasing tx id order.
///
/// Reads one record per call to `next`, taking the log lock only for that
/// read, so appends proceed while a cursor is open. Iteration ends at the
/// first error.
pub struct TxLogCursor {
    inner: Arc<Mutex<LogInner>>,
    next: TxId,
    end: TxId,
    include_operations: bool,
    failed: bool,
}

impl TxLogCursor {
    pub(crate) fn new(
        inner: Arc<Mutex<LogInner>>,
        from: TxId,
        end: TxId,
        include_operations: bool,
    ) -> Self {
        Self {
            inner,
            next: from,
            end,
            include_operations,
            failed: false,
        }
    }

    /// The id the next call to `next` would read.
    #[must_use]
    pub fn position(&self) -> TxId {
        self.next
    }

    /// Releases the cursor.
    pub fn close(self) {}
}

impl Iterator for TxLogCursor {
    type Item = CoreResult<TransactionRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.next >= self.end {
            return None;
        }
        let read = self.inner.lock().read_record(self.next, self.include_operations);
        match read {
            Ok(Some(record)) => {
                self.next = self.next.next();
                Some(Ok(record))
            }
            Ok(None) => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

impl std::fmt::Debug for TxLogCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxLogCursor")
            .field("next", &self.next)
            .field("end", &self.end)
            .field("include_operations", &self.include_operations)
            .finish_non_exhaustive()
    }
}
