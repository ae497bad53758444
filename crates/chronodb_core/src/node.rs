//! The node facade.
//!
//! A [`Node`] ties the transaction log, the document store, the index and
//! the indexer together. Submissions return as soon as the record is in the
//! log; reads go through snapshots bounded by what the indexer has
//! finished.

use crate::config::Config;
use crate::document::{ContentHash, Document, DocumentStore, LogDocumentStore};
use crate::error::{CoreError, CoreResult};
use crate::events::{EventBus, EventFilter, Subscription};
use crate::index::BitemporalIndex;
use crate::indexer::Indexer;
use crate::operation::Operation;
use crate::progress::IndexProgress;
use crate::snapshot::Snapshot;
use crate::stats::{NodeStats, StatsSnapshot};
use crate::txlog::{TxLog, TxLogCursor};
use crate::types::{AwaitTarget, BitemporalInstant, Timestamp, TxId};
use chronodb_storage::{FileBackend, InMemoryBackend, StorageBackend};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// File holding the transaction log inside a node directory.
pub const LOG_FILE: &str = "tx.log";

/// File holding document bodies inside a node directory.
pub const DOCUMENTS_FILE: &str = "documents.bin";

/// Upper bound on how long the indexer thread sleeps without a wake-up.
const INDEXER_POLL: Duration = Duration::from_millis(100);

/// A bitemporal document store node.
///
/// # Example
///
/// ```rust,ignore
/// use chronodb_core::{Document, HistoryOptions, Node, TransactionBuilder};
///
/// let node = Node::open_in_memory()?;
/// let tx = node.submit_tx(
///     &TransactionBuilder::new()
///         .put("doc-1", Document::new().with("bar", "baz"))
///         .build(),
/// )?;
/// node.await_tx(tx, None)?;
///
/// let snapshot = node.snapshot();
/// assert!(snapshot.entity(&"doc-1".into())?.is_some());
/// ```
pub struct Node {
    config: Config,
    log: TxLog,
    index: Arc<BitemporalIndex>,
    documents: Arc<dyn DocumentStore>,
    progress: Arc<IndexProgress>,
    events: Arc<EventBus>,
    stats: Arc<NodeStats>,
    indexer: Arc<Indexer>,
    doc_gate: Arc<Mutex<()>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Node {
    /// Opens a node stored in directory `path`.
    ///
    /// # Errors
    ///
    /// Storage errors (including missing files when
    /// [`Config::create_if_missing`] is off), log or document corruption
    /// found during recovery.
    pub fn open(path: impl AsRef<Path>, config: Config) -> CoreResult<Self> {
        let path = path.as_ref();
        let open_file = |name: &str| {
            let file = path.join(name);
            if config.create_if_missing {
                FileBackend::open_with_create_dirs(&file)
            } else {
                FileBackend::open_existing(&file)
            }
        };
        let log_backend = open_file(LOG_FILE)?;
        let doc_backend = open_file(DOCUMENTS_FILE)?;
        info!(path = %path.display(), "opening node");
        Self::open_with_backends(config, Box::new(log_backend), Box::new(doc_backend))
    }

    /// Opens a fresh node that lives only in memory.
    ///
    /// # Errors
    ///
    /// Fails only if the indexer thread cannot be started.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open_with_backends(
            Config::default(),
            Box::new(InMemoryBackend::new()),
            Box::new(InMemoryBackend::new()),
        )
    }

    /// Opens a node over the given log and document store backends.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open).
    pub fn open_with_backends(
        config: Config,
        log_backend: Box<dyn StorageBackend>,
        doc_backend: Box<dyn StorageBackend>,
    ) -> CoreResult<Self> {
        let documents = LogDocumentStore::open(doc_backend, config.sync_on_commit)?;
        Self::open_with_store(config, log_backend, Arc::new(documents))
    }

    /// Opens a node over a log backend and any document store.
    ///
    /// # Errors
    ///
    /// As [`open`](Self::open).
    pub fn open_with_store(
        config: Config,
        log_backend: Box<dyn StorageBackend>,
        documents: Arc<dyn DocumentStore>,
    ) -> CoreResult<Self> {
        let log = TxLog::open(log_backend, &config)?;
        let index = Arc::new(BitemporalIndex::new());
        let progress = Arc::new(IndexProgress::new(log.latest()));
        let events = Arc::new(EventBus::new());
        let stats = Arc::new(NodeStats::new());
        let doc_gate = Arc::new(Mutex::new(()));
        let indexer = Arc::new(Indexer::new(
            log.clone(),
            Arc::clone(&index),
            Arc::clone(&documents),
            Arc::clone(&progress),
            Arc::clone(&events),
            Arc::clone(&stats),
            Arc::clone(&doc_gate),
        ));

        let worker = if config.background_indexing {
            let indexer = Arc::clone(&indexer);
            let handle = thread::Builder::new()
                .name("chronodb-indexer".into())
                .spawn(move || run_indexer(&indexer))?;
            Some(handle)
        } else {
            None
        };

        Ok(Self {
            config,
            log,
            index,
            documents,
            progress,
            events,
            stats,
            indexer,
            doc_gate,
            worker: Mutex::new(worker),
        })
    }

    /// Appends a transaction to the log and returns its id and time.
    ///
    /// Document bodies are stored first. The transaction is not indexed yet
    /// when this returns; use [`await_tx`](Self::await_tx) to wait for it
    /// and [`has_tx_committed`](Self::has_tx_committed) for its outcome.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] for an empty valid time range,
    /// [`CoreError::RecordTooLarge`], [`CoreError::NodeClosed`]; storage
    /// errors.
    pub fn submit_tx(&self, operations: &[Operation]) -> CoreResult<BitemporalInstant> {
        self.ensure_open()?;
        let mut tx_ops = Vec::with_capacity(operations.len());
        let mut bodies = Vec::new();
        for op in operations {
            let (tx_op, document) = op.to_tx_operation()?;
            if let (Some(hash), Some(document)) = (tx_op.content(), document) {
                bodies.push((*hash, document));
            }
            tx_ops.push(tx_op);
        }

        let gate = self.doc_gate.lock();
        for (hash, document) in &bodies {
            self.documents.put(*hash, document)?;
        }
        if self.config.sync_on_commit && !bodies.is_empty() {
            self.documents.flush()?;
        }
        let tx = self.log.append(&tx_ops)?;
        drop(gate);

        self.stats.record_submitted();
        self.progress.record_submitted(tx);
        debug!(tx = %tx.tx_id, ops = tx_ops.len(), "submitted transaction");
        Ok(tx)
    }

    /// Reads the log from `from` onwards, one record at a time.
    #[must_use]
    pub fn open_tx_log(&self, from: TxId, with_operations: bool) -> TxLogCursor {
        self.log.open_cursor(from, with_operations)
    }

    /// A snapshot at the latest indexed transaction.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.make_snapshot(self.progress.latest_indexed(), None)
    }

    /// A snapshot as of transaction time `tx_time` (latest indexed when
    /// `None`) and valid time `valid_time` (the transaction time when
    /// `None`).
    ///
    /// # Errors
    ///
    /// [`CoreError::NodeOutOfSync`] if `tx_time` is not indexed yet.
    pub fn snapshot_at(
        &self,
        tx_time: Option<Timestamp>,
        valid_time: Option<Timestamp>,
    ) -> CoreResult<Snapshot> {
        let Some(tx_time) = tx_time else {
            return Ok(self.make_snapshot(self.progress.latest_indexed(), valid_time));
        };
        self.progress.ensure(AwaitTarget::TxTime(tx_time))?;
        let basis = self.index.instant_at_or_before(tx_time);
        Ok(self.make_snapshot(basis, valid_time.or(Some(tx_time))))
    }

    /// Like [`snapshot_at`](Self::snapshot_at), but waits for `tx_time` to
    /// be indexed.
    ///
    /// # Errors
    ///
    /// As [`await_tx_time`](Self::await_tx_time).
    pub fn await_snapshot_at(
        &self,
        tx_time: Option<Timestamp>,
        valid_time: Option<Timestamp>,
        timeout: Option<Duration>,
    ) -> CoreResult<Snapshot> {
        if let Some(tx_time) = tx_time {
            self.await_tx_time(tx_time, timeout)?;
        }
        self.snapshot_at(tx_time, valid_time)
    }

    /// Whether `tx` committed.
    ///
    /// # Errors
    ///
    /// [`CoreError::NodeOutOfSync`] if it is not indexed yet.
    pub fn has_tx_committed(&self, tx: BitemporalInstant) -> CoreResult<bool> {
        self.progress.ensure(AwaitTarget::Tx(tx.tx_id))?;
        Ok(self.index.outcome(tx.tx_id).is_some_and(|o| o.committed))
    }

    /// Blocks until `tx` is indexed and returns the latest indexed
    /// transaction.
    ///
    /// # Errors
    ///
    /// [`CoreError::TimeoutExceeded`], [`CoreError::IndexerStopped`],
    /// [`CoreError::NodeClosed`].
    pub fn await_tx(
        &self,
        tx: BitemporalInstant,
        timeout: Option<Duration>,
    ) -> CoreResult<BitemporalInstant> {
        self.progress
            .await_target(AwaitTarget::Tx(tx.tx_id), self.timeout(timeout))
    }

    /// Blocks until a transaction at or after `tx_time` is indexed.
    ///
    /// # Errors
    ///
    /// As [`await_tx`](Self::await_tx).
    pub fn await_tx_time(
        &self,
        tx_time: Timestamp,
        timeout: Option<Duration>,
    ) -> CoreResult<BitemporalInstant> {
        self.progress
            .await_target(AwaitTarget::TxTime(tx_time), self.timeout(timeout))
    }

    /// Blocks until everything submitted before the call is indexed.
    /// Returns `None` only when nothing was ever submitted.
    ///
    /// # Errors
    ///
    /// As [`await_tx`](Self::await_tx).
    pub fn sync(&self, timeout: Option<Duration>) -> CoreResult<Option<BitemporalInstant>> {
        self.progress.sync(self.timeout(timeout))
    }

    /// The latest indexed transaction.
    #[must_use]
    pub fn latest_completed_tx(&self) -> Option<BitemporalInstant> {
        self.progress.latest_indexed()
    }

    /// The latest appended transaction.
    #[must_use]
    pub fn latest_submitted_tx(&self) -> Option<BitemporalInstant> {
        self.progress.latest_submitted()
    }

    /// Subscribes to indexed-transaction events.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.events.subscribe(filter)
    }

    /// A document body by hash.
    ///
    /// # Errors
    ///
    /// Document store failures.
    pub fn document(&self, hash: &ContentHash) -> CoreResult<Option<Document>> {
        self.documents.get(hash)
    }

    /// How many committed puts wrote each field name.
    #[must_use]
    pub fn attribute_stats(&self) -> BTreeMap<String, u64> {
        self.index.attribute_counts()
    }

    /// Current statistics.
    ///
    /// # Errors
    ///
    /// Storage errors reading the log size.
    pub fn stats(&self) -> CoreResult<StatsSnapshot> {
        Ok(StatsSnapshot {
            transactions_submitted: self.stats.transactions_submitted(),
            transactions_committed: self.stats.transactions_committed(),
            transactions_aborted: self.stats.transactions_aborted(),
            documents_evicted: self.stats.documents_evicted(),
            open_snapshots: self.stats.open_snapshots(),
            entity_count: self.index.entity_count() as u64,
            log_size: self.log.size()?,
            latest_submitted: self.progress.latest_submitted(),
            latest_indexed: self.progress.latest_indexed(),
        })
    }

    /// Indexes everything submitted so far on the calling thread. Returns
    /// the number of transactions indexed.
    ///
    /// Meant for nodes opened without background indexing.
    ///
    /// # Errors
    ///
    /// [`CoreError::IndexerStopped`] and the integrity failure that stops
    /// indexing.
    pub fn index_pending(&self) -> CoreResult<usize> {
        self.ensure_open()?;
        self.indexer.index_pending()
    }

    /// Returns `true` until [`close`](Self::close) is called.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.progress.is_closed()
    }

    /// Stops the indexer, wakes every waiter and flushes storage.
    ///
    /// # Errors
    ///
    /// Storage errors while flushing.
    pub fn close(&self) -> CoreResult<()> {
        if self.progress.is_closed() {
            return Ok(());
        }
        self.progress.close();
        if let Some(worker) = self.worker.lock().take() {
            if worker.join().is_err() {
                warn!("indexer thread panicked");
            }
        }
        self.log.flush()?;
        self.documents.flush()?;
        info!(latest = ?self.progress.latest_submitted(), "node closed");
        Ok(())
    }

    fn ensure_open(&self) -> CoreResult<()> {
        if self.progress.is_closed() {
            Err(CoreError::NodeClosed)
        } else {
            Ok(())
        }
    }

    fn timeout(&self, timeout: Option<Duration>) -> Duration {
        timeout.unwrap_or(self.config.default_await_timeout)
    }

    fn make_snapshot(
        &self,
        basis: Option<BitemporalInstant>,
        valid_time: Option<Timestamp>,
    ) -> Snapshot {
        Snapshot::new(
            Arc::clone(&self.index),
            Arc::clone(&self.documents),
            self.stats.open_snapshots_counter(),
            basis,
            valid_time,
        )
    }
}

/// Indexes until the node closes or indexing stops.
fn run_indexer(indexer: &Indexer) {
    loop {
        if indexer.index_pending().is_err() {
            // already logged and recorded for waiters
            return;
        }
        let indexed = indexer.progress.latest_indexed();
        if !indexer.progress.wait_for_submission(indexed, INDEXER_POLL) {
            return;
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("latest_submitted", &self.progress.latest_submitted())
            .field("latest_indexed", &self.progress.latest_indexed())
            .field("background_indexing", &self.config.background_indexing)
            .finish_non_exhaustive()
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
