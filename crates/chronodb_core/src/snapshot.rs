//! Point-in-time reads.
//!
//! A [`Snapshot`] is a pair of bounds: a transaction (what was known) and a
//! valid time (when it was true). It borrows no index data; each read
//! clones the entity's timeline `Arc` and resolves it against the bounds,
//! so snapshots stay consistent while the indexer moves on.

use crate::document::{ContentHash, Document, DocumentStore};
use crate::entity::EntityId;
use crate::error::CoreResult;
use crate::history::{HistoryCursor, HistoryEntry, HistoryOptions};
use crate::index::{BitemporalIndex, EntityTimeline, EntityVersion};
use crate::operation::Operation;
use crate::query::Matcher;
use crate::speculative::{DocumentResolver, SpeculativeBase};
use crate::types::{BitemporalInstant, Timestamp, TxId};
use chronodb_codec::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Version metadata of an entity as seen by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityTx {
    /// The entity.
    pub entity_id: EntityId,
    /// Hash of the visible document.
    pub content_hash: ContentHash,
    /// Start of the visible version's validity.
    pub valid_time: Timestamp,
    /// End of the visible version's validity.
    pub valid_to: Option<Timestamp>,
    /// Time of the transaction that wrote it.
    pub tx_time: Timestamp,
    /// Transaction that wrote it.
    pub tx_id: TxId,
}

/// Counts live snapshots for [`crate::NodeStats`].
struct OpenGuard(Arc<AtomicU64>);

impl OpenGuard {
    fn new(counter: &Arc<AtomicU64>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// An immutable view of the database at a transaction bound and a valid
/// time.
pub struct Snapshot {
    index: Arc<BitemporalIndex>,
    documents: DocumentResolver,
    basis: Option<BitemporalInstant>,
    valid_time: Timestamp,
    open: OpenGuard,
}

impl Snapshot {
    pub(crate) fn new(
        index: Arc<BitemporalIndex>,
        store: Arc<dyn DocumentStore>,
        open_snapshots: &Arc<AtomicU64>,
        basis: Option<BitemporalInstant>,
        valid_time: Option<Timestamp>,
    ) -> Self {
        let valid_time = valid_time
            .or(basis.map(|b| b.tx_time))
            .unwrap_or_else(Timestamp::now);
        Self {
            index,
            documents: DocumentResolver { store, layer: None },
            basis,
            valid_time,
            open: OpenGuard::new(open_snapshots),
        }
    }

    /// The transaction bound: the latest transaction this snapshot sees.
    /// `None` when nothing was indexed when it was opened.
    #[must_use]
    pub fn basis(&self) -> Option<BitemporalInstant> {
        self.basis
    }

    /// The valid time reads resolve at.
    #[must_use]
    pub fn valid_time(&self) -> Timestamp {
        self.valid_time
    }

    /// The transaction time of the bound, including speculative
    /// transactions.
    #[must_use]
    pub fn transaction_time(&self) -> Option<Timestamp> {
        self.speculative_tx().or(self.basis).map(|b| b.tx_time)
    }

    /// The newest speculative transaction, for snapshots made by
    /// [`with_tx`](Self::with_tx).
    #[must_use]
    pub fn speculative_tx(&self) -> Option<BitemporalInstant> {
        self.documents.layer.as_ref().map(|l| l.tx)
    }

    /// The entity's document, or `None` if it is absent, deleted or evicted.
    ///
    /// # Errors
    ///
    /// Document store failures.
    pub fn entity(&self, entity_id: &EntityId) -> CoreResult<Option<Document>> {
        match self.resolve(entity_id).and_then(|v| v.content_hash()) {
            Some(hash) => self.documents.get(&hash),
            None => Ok(None),
        }
    }

    /// Metadata of the visible version, or `None` if absent.
    #[must_use]
    pub fn entity_tx(&self, entity_id: &EntityId) -> Option<EntityTx> {
        let version = self.resolve(entity_id)?;
        Some(EntityTx {
            entity_id: entity_id.clone(),
            content_hash: version.content_hash()?,
            valid_time: version.valid_from,
            valid_to: version.valid_to,
            tx_time: version.tx_time,
            tx_id: version.tx_id,
        })
    }

    /// Only the named fields of the entity's document.
    ///
    /// # Errors
    ///
    /// Document store failures.
    pub fn project(&self, entity_id: &EntityId, fields: &[&str]) -> CoreResult<Option<Document>> {
        Ok(self.entity(entity_id)?.map(|doc| doc.project(fields)))
    }

    /// [`project`](Self::project) over several entities, skipping absent
    /// ones.
    ///
    /// # Errors
    ///
    /// Document store failures.
    pub fn project_many(
        &self,
        entity_ids: &[EntityId],
        fields: &[&str],
    ) -> CoreResult<Vec<(EntityId, Document)>> {
        let mut out = Vec::with_capacity(entity_ids.len());
        for id in entity_ids {
            if let Some(doc) = self.project(id, fields)? {
                out.push((id.clone(), doc));
            }
        }
        Ok(out)
    }

    /// Every entity visible to this snapshot, in id order.
    #[must_use]
    pub fn entities(&self) -> Vec<EntityId> {
        let mut ids: BTreeSet<EntityId> = self.index.entity_ids().into_iter().collect();
        if let Some(layer) = &self.documents.layer {
            ids.extend(layer.timelines.keys().cloned());
        }
        ids.into_iter()
            .filter(|id| self.resolve(id).is_some_and(|v| !v.is_tombstone()))
            .collect()
    }

    /// Runs a query through a pluggable matcher.
    ///
    /// # Errors
    ///
    /// Whatever the matcher returns.
    pub fn query<M: Matcher + ?Sized>(&self, matcher: &M, query: &M::Query) -> CoreResult<Vec<Vec<Value>>> {
        matcher.execute(query, self)
    }

    /// The entity's history as seen by this snapshot.
    ///
    /// # Errors
    ///
    /// Document store failures when `with_docs` is set.
    pub fn entity_history(
        &self,
        entity_id: &EntityId,
        options: HistoryOptions,
    ) -> CoreResult<Vec<HistoryEntry>> {
        self.open_entity_history(entity_id, options).collect()
    }

    /// Lazy form of [`entity_history`](Self::entity_history).
    #[must_use]
    pub fn open_entity_history(&self, entity_id: &EntityId, options: HistoryOptions) -> HistoryCursor {
        HistoryCursor::new(
            self.visible_timeline(entity_id),
            self.valid_time,
            options,
            self.documents.clone(),
        )
    }

    /// Applies `operations` speculatively and returns a snapshot that sees
    /// them, or `None` if a match failed.
    ///
    /// The transaction gets id `bound + 1` and this snapshot's transaction
    /// time; omitted valid times default to this snapshot's valid time.
    /// Nothing is written to the log.
    ///
    /// # Errors
    ///
    /// [`crate::CoreError::InvalidArgument`] for an empty valid time range;
    /// document store failures.
    pub fn with_tx(&self, operations: &[Operation]) -> CoreResult<Option<Snapshot>> {
        let base = SpeculativeBase {
            index: &self.index,
            basis: self.basis,
            documents: &self.documents,
            valid_time: self.valid_time,
        };
        let Some(layer) = base.apply(operations)? else {
            return Ok(None);
        };
        Ok(Some(Self {
            index: Arc::clone(&self.index),
            documents: DocumentResolver {
                store: Arc::clone(&self.documents.store),
                layer: Some(Arc::new(layer)),
            },
            basis: self.basis,
            valid_time: self.valid_time,
            open: OpenGuard::new(&self.open.0),
        }))
    }

    /// A document body by hash, including speculative ones.
    ///
    /// # Errors
    ///
    /// Document store failures.
    pub fn document(&self, hash: &ContentHash) -> CoreResult<Option<Document>> {
        self.documents.get(hash)
    }

    /// Releases the snapshot.
    pub fn close(self) {}

    /// The entity's timeline and the tx bound to resolve it at: the
    /// speculative transaction for entities a layer touched, the basis for
    /// everything else.
    fn visible_timeline(&self, entity_id: &EntityId) -> Option<(Arc<EntityTimeline>, TxId)> {
        if let Some(layer) = &self.documents.layer {
            if let Some(layered) = layer.timelines.get(entity_id) {
                return layered.clone().map(|t| (t, layer.tx.tx_id));
            }
        }
        let bound = self.basis?.tx_id;
        Some((self.index.timeline(entity_id)?, bound))
    }

    fn resolve(&self, entity_id: &EntityId) -> Option<Arc<EntityVersion>> {
        let (timeline, bound) = self.visible_timeline(entity_id)?;
        timeline.resolve(self.valid_time, bound).cloned()
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("basis", &self.basis)
            .field("valid_time", &self.valid_time)
            .field("speculative_tx", &self.speculative_tx())
            .finish_non_exhaustive()
    }
}
