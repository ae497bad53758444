//! The indexer: the log's single sequential consumer.
//!
//! Records are indexed strictly in tx id order. For each one the processor
//! runs against the index as of the previous transaction; a committed
//! result is published with one write lock, an aborted one only records the
//! outcome. Either way the indexed marker then advances, waiters wake and
//! subscribers are notified.
//!
//! Processing errors that concern a single transaction (a missing body, an
//! empty valid time range) abort it. Integrity failures stop the indexer for
//! good; every later await reports them.

use crate::document::{ContentHash, Document, DocumentStore};
use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::events::{EventBus, EventType, IndexedTxEvent};
use crate::index::{BitemporalIndex, EntityTimeline};
use crate::operation::TxOperation;
use crate::processor::{self, TxContext};
use crate::progress::IndexProgress;
use crate::stats::NodeStats;
use crate::txlog::{TransactionRecord, TxLog};
use crate::types::{BitemporalInstant, TxId};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// State the indexer shares with the node.
pub(crate) struct Indexer {
    pub log: TxLog,
    pub index: Arc<BitemporalIndex>,
    pub documents: Arc<dyn DocumentStore>,
    pub progress: Arc<IndexProgress>,
    pub events: Arc<EventBus>,
    pub stats: Arc<NodeStats>,
    /// Held by submitters from storing bodies until the log append, and by
    /// the indexer while it drops bodies, so a body is never dropped under
    /// a transaction that is about to reference it.
    pub doc_gate: Arc<Mutex<()>>,
    /// Only one caller indexes at a time.
    run_lock: Mutex<()>,
}

impl Indexer {
    pub fn new(
        log: TxLog,
        index: Arc<BitemporalIndex>,
        documents: Arc<dyn DocumentStore>,
        progress: Arc<IndexProgress>,
        events: Arc<EventBus>,
        stats: Arc<NodeStats>,
        doc_gate: Arc<Mutex<()>>,
    ) -> Self {
        Self {
            log,
            index,
            documents,
            progress,
            events,
            stats,
            doc_gate,
            run_lock: Mutex::new(()),
        }
    }

    /// Indexes everything appended so far. Returns the number of records
    /// indexed.
    ///
    /// # Errors
    ///
    /// [`CoreError::IndexerStopped`] if an earlier run stopped; the
    /// integrity failure that stops this one.
    pub fn index_pending(&self) -> CoreResult<usize> {
        let _running = self.run_lock.lock();
        if let Some(reason) = self.progress.stop_reason() {
            return Err(CoreError::indexer_stopped(reason));
        }

        let from = self
            .progress
            .latest_indexed()
            .map_or(TxId::FIRST, |indexed| indexed.tx_id.next());
        let mut indexed = 0;
        for record in self.log.open_cursor(from, true) {
            if let Err(e) = record.and_then(|record| self.index_record(record)) {
                self.stop(&e);
                return Err(e);
            }
            indexed += 1;
        }
        Ok(indexed)
    }

    fn index_record(&self, record: TransactionRecord) -> CoreResult<()> {
        let tx = record.instant();
        let operations = record.operations.unwrap_or_default();
        let ctx = IndexContext {
            index: &self.index,
            documents: self.documents.as_ref(),
        };

        let committed = match processor::process(&ctx, tx, &operations, tx.tx_time) {
            Ok(Some(effects)) => {
                let released = self.index.apply(tx, effects.changes, &effects.attributes);
                self.release_documents(tx, released)?;
                true
            }
            Ok(None) => {
                self.index.record_aborted(tx);
                false
            }
            Err(e) if e.is_integrity_failure() => return Err(e),
            Err(e) => {
                warn!(tx = %tx.tx_id, error = %e, "transaction aborted");
                self.index.record_aborted(tx);
                false
            }
        };

        self.stats.record_indexed(committed);
        self.progress.record_indexed(tx);
        debug!(
            tx = %tx.tx_id,
            tx_time = %tx.tx_time,
            committed,
            ops = operations.len(),
            "indexed transaction"
        );

        if self.events.subscriber_count() > 0 {
            let operations = self.events.wants_operations().then_some(operations);
            self.events.emit(&IndexedTxEvent {
                event_type: EventType::IndexedTx,
                tx_id: tx.tx_id,
                tx_time: tx.tx_time,
                committed,
                operations,
            });
        }
        Ok(())
    }

    /// Drops bodies that no indexed version references any more, keeping
    /// those a not yet indexed transaction still puts.
    fn release_documents(&self, tx: BitemporalInstant, released: Vec<ContentHash>) -> CoreResult<()> {
        if released.is_empty() {
            return Ok(());
        }
        let _gate = self.doc_gate.lock();
        let mut pending = HashSet::new();
        for record in self.log.open_cursor(tx.tx_id.next(), true) {
            let operations = record?.operations.unwrap_or_default();
            pending.extend(operations.iter().filter_map(TxOperation::content).copied());
        }

        let mut evicted = 0;
        for hash in released.iter().filter(|hash| !pending.contains(*hash)) {
            if self.documents.evict(hash)? {
                evicted += 1;
            }
        }
        self.stats.record_evicted(evicted);
        debug!(
            tx = %tx.tx_id,
            released = released.len(),
            evicted,
            "released document bodies"
        );
        Ok(())
    }

    fn stop(&self, cause: &CoreError) {
        error!(error = %cause, "indexer stopped");
        self.progress.record_stopped(cause.to_string());
    }
}

impl std::fmt::Debug for Indexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Indexer")
            .field("latest_indexed", &self.progress.latest_indexed())
            .field("stopped", &self.progress.stop_reason())
            .finish_non_exhaustive()
    }
}

/// The index as of the previous transaction.
struct IndexContext<'a> {
    index: &'a BitemporalIndex,
    documents: &'a dyn DocumentStore,
}

impl TxContext for IndexContext<'_> {
    fn timeline(&self, entity_id: &EntityId) -> Option<Arc<EntityTimeline>> {
        self.index.timeline(entity_id)
    }

    fn document(&self, hash: &ContentHash) -> CoreResult<Option<Document>> {
        self.documents.get(hash)
    }

    fn is_evicted(&self, hash: &ContentHash) -> CoreResult<bool> {
        self.documents.is_evicted(hash)
    }
}
