//! Speculative ("what if") transactions.
//!
//! A speculative transaction runs through the same processor as a real one,
//! but against a snapshot's view and into a private layer: nothing reaches
//! the log, the index or the document store. Layers stack, so a
//! speculative snapshot can speculate further.

use crate::document::{ContentHash, Document, DocumentStore};
use crate::entity::EntityId;
use crate::error::CoreResult;
use crate::index::{BitemporalIndex, EntityTimeline};
use crate::operation::Operation;
use crate::processor::{self, TxContext};
use crate::types::{BitemporalInstant, Timestamp, TxId};
use std::collections::HashMap;
use std::sync::Arc;

/// Private state written by one or more speculative transactions.
#[derive(Debug, Clone)]
pub(crate) struct SpeculativeLayer {
    /// The newest speculative transaction in the stack.
    pub tx: BitemporalInstant,
    /// Entities the layer touched; `None` means evicted.
    pub timelines: HashMap<EntityId, Option<Arc<EntityTimeline>>>,
    pub documents: HashMap<ContentHash, Document>,
}

/// Looks bodies up in a layer first, then in the document store.
#[derive(Clone)]
pub(crate) struct DocumentResolver {
    pub store: Arc<dyn DocumentStore>,
    pub layer: Option<Arc<SpeculativeLayer>>,
}

impl DocumentResolver {
    pub fn get(&self, hash: &ContentHash) -> CoreResult<Option<Document>> {
        if let Some(doc) = self.layer.as_ref().and_then(|l| l.documents.get(hash)) {
            return Ok(Some(doc.clone()));
        }
        self.store.get(hash)
    }
}

/// The view a speculative transaction is applied to.
pub(crate) struct SpeculativeBase<'a> {
    pub index: &'a BitemporalIndex,
    pub basis: Option<BitemporalInstant>,
    pub documents: &'a DocumentResolver,
    pub valid_time: Timestamp,
}

impl SpeculativeBase<'_> {
    fn layer(&self) -> Option<&SpeculativeLayer> {
        self.documents.layer.as_deref()
    }

    /// Applies `operations` on top of this view. `None` if a match failed.
    pub fn apply(&self, operations: &[Operation]) -> CoreResult<Option<SpeculativeLayer>> {
        let tx_id = match (self.layer(), self.basis) {
            (Some(layer), _) => layer.tx.tx_id.next(),
            (None, Some(basis)) => basis.tx_id.next(),
            (None, None) => TxId::FIRST,
        };
        let tx_time = self
            .layer()
            .map(|l| l.tx.tx_time)
            .or(self.basis.map(|b| b.tx_time))
            .unwrap_or(self.valid_time);
        let tx = BitemporalInstant::new(tx_id, tx_time);

        let mut tx_ops = Vec::with_capacity(operations.len());
        let mut documents = HashMap::new();
        for op in operations {
            let (tx_op, document) = op.to_tx_operation()?;
            if let (Some(hash), Some(document)) = (tx_op.content(), document) {
                documents.insert(*hash, document);
            }
            tx_ops.push(tx_op);
        }

        let ctx = SpeculativeContext {
            base: self,
            documents: &documents,
        };
        let Some(effects) = processor::process(&ctx, tx, &tx_ops, self.valid_time)? else {
            return Ok(None);
        };

        let mut layer = match self.layer() {
            Some(parent) => parent.clone(),
            None => SpeculativeLayer {
                tx,
                timelines: HashMap::new(),
                documents: HashMap::new(),
            },
        };
        layer.tx = tx;
        for change in effects.changes {
            layer.timelines.insert(change.entity_id, change.timeline);
        }
        layer.documents.extend(documents);
        Ok(Some(layer))
    }
}

struct SpeculativeContext<'a> {
    base: &'a SpeculativeBase<'a>,
    documents: &'a HashMap<ContentHash, Document>,
}

impl TxContext for SpeculativeContext<'_> {
    fn timeline(&self, entity_id: &EntityId) -> Option<Arc<EntityTimeline>> {
        if let Some(layered) = self.base.layer().and_then(|l| l.timelines.get(entity_id)) {
            return layered.clone();
        }
        let bound = self.base.basis?.tx_id;
        let timeline = self.base.index.timeline(entity_id)?;
        if timeline.latest_tx().is_some_and(|latest| latest <= bound) {
            Some(timeline)
        } else {
            timeline.as_of(bound).map(Arc::new)
        }
    }

    fn document(&self, hash: &ContentHash) -> CoreResult<Option<Document>> {
        match self.documents.get(hash) {
            Some(doc) => Ok(Some(doc.clone())),
            None => self.base.documents.get(hash),
        }
    }

    fn is_evicted(&self, hash: &ContentHash) -> CoreResult<bool> {
        self.base.documents.store.is_evicted(hash)
    }
}
