//! The bitemporal index.

use super::timeline::EntityTimeline;
use super::version::EntityVersion;
use crate::document::ContentHash;
use crate::entity::EntityId;
use crate::types::{BitemporalInstant, Timestamp, TxId};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// How one transaction changed one entity.
#[derive(Debug, Clone)]
pub(crate) struct EntityChange {
    pub entity_id: EntityId,
    /// The previous timeline is dropped first.
    pub evicted: bool,
    /// The replacement timeline, if any.
    pub timeline: Option<Arc<EntityTimeline>>,
    /// Versions the transaction added.
    pub added: Vec<Arc<EntityVersion>>,
}

/// Result of one indexed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxOutcome {
    /// Transaction time.
    pub tx_time: Timestamp,
    /// Whether the transaction committed.
    pub committed: bool,
}

#[derive(Debug, Default)]
struct IndexState {
    entities: HashMap<EntityId, Arc<EntityTimeline>>,
    /// Number of indexed versions referencing each body.
    doc_refs: HashMap<ContentHash, usize>,
    attribute_counts: BTreeMap<String, u64>,
    /// Indexed by tx id.
    outcomes: Vec<TxOutcome>,
}

/// Entity timelines for every indexed transaction.
///
/// A single writer (the indexer) applies whole transactions under one write
/// lock; readers clone a timeline `Arc` and release the lock immediately.
#[derive(Debug, Default)]
pub struct BitemporalIndex {
    state: RwLock<IndexState>,
}

impl BitemporalIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The entity's current timeline.
    #[must_use]
    pub fn timeline(&self, entity_id: &EntityId) -> Option<Arc<EntityTimeline>> {
        self.state.read().entities.get(entity_id).cloned()
    }

    /// Ids of every entity with at least one indexed version.
    #[must_use]
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.state.read().entities.keys().cloned().collect()
    }

    /// Number of entities with at least one indexed version.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.state.read().entities.len()
    }

    /// Number of transactions indexed, committed or not.
    #[must_use]
    pub fn indexed_count(&self) -> u64 {
        self.state.read().outcomes.len() as u64
    }

    /// Outcome of an indexed transaction.
    #[must_use]
    pub fn outcome(&self, tx_id: TxId) -> Option<TxOutcome> {
        let index = usize::try_from(tx_id.as_u64()).ok()?;
        self.state.read().outcomes.get(index).copied()
    }

    /// The latest indexed transaction with `tx_time <= at`.
    #[must_use]
    pub fn instant_at_or_before(&self, at: Timestamp) -> Option<BitemporalInstant> {
        let state = self.state.read();
        let count = state.outcomes.partition_point(|o| o.tx_time <= at);
        let index = count.checked_sub(1)?;
        Some(BitemporalInstant::new(
            TxId::new(index as u64),
            state.outcomes[index].tx_time,
        ))
    }

    /// Returns `true` while some indexed version references `hash`.
    #[must_use]
    pub fn references(&self, hash: &ContentHash) -> bool {
        self.state.read().doc_refs.contains_key(hash)
    }

    /// How many committed puts wrote each field name.
    #[must_use]
    pub fn attribute_counts(&self) -> BTreeMap<String, u64> {
        self.state.read().attribute_counts.clone()
    }

    /// Publishes an aborted transaction.
    pub(crate) fn record_aborted(&self, tx: BitemporalInstant) {
        Self::push_outcome(&mut self.state.write(), tx, false);
    }

    /// Publishes a committed transaction atomically.
    ///
    /// Returns the hashes of bodies that lost their last reference through
    /// an eviction.
    pub(crate) fn apply(
        &self,
        tx: BitemporalInstant,
        changes: Vec<EntityChange>,
        attributes: &[String],
    ) -> Vec<ContentHash> {
        let mut state = self.state.write();
        let mut released = Vec::new();

        for change in changes {
            if change.evicted {
                if let Some(old) = state.entities.remove(&change.entity_id) {
                    for hash in old.versions().filter_map(|v| v.content_hash()) {
                        if let Some(count) = state.doc_refs.get_mut(&hash) {
                            *count -= 1;
                            if *count == 0 {
                                state.doc_refs.remove(&hash);
                                released.push(hash);
                            }
                        }
                    }
                }
            }
            for hash in change.added.iter().filter_map(|v| v.content_hash()) {
                *state.doc_refs.entry(hash).or_insert(0) += 1;
            }
            if let Some(timeline) = change.timeline {
                state.entities.insert(change.entity_id, timeline);
            }
        }

        for name in attributes {
            *state.attribute_counts.entry(name.clone()).or_insert(0) += 1;
        }
        Self::push_outcome(&mut state, tx, true);

        released.sort();
        released.dedup();
        released.retain(|hash| !state.doc_refs.contains_key(hash));
        released
    }

    fn push_outcome(state: &mut IndexState, tx: BitemporalInstant, committed: bool) {
        debug_assert_eq!(tx.tx_id.as_u64(), state.outcomes.len() as u64);
        state.outcomes.push(TxOutcome {
            tx_time: tx.tx_time,
            committed,
        });
    }
}
