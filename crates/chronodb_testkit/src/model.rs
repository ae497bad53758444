//! A brute-force bitemporal model.
//!
//! Keeps a flat list of every version ever written and answers each read by
//! scanning it. Slow but obviously correct, which is what the index is
//! checked against.

use chronodb_core::{Document, EntityId, Operation, Timestamp};

/// One written version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelVersion {
    /// The entity.
    pub entity_id: EntityId,
    /// Start of validity, inclusive.
    pub valid_from: Timestamp,
    /// End of validity, exclusive; `None` is open-ended.
    pub valid_to: Option<Timestamp>,
    /// Writing transaction.
    pub tx: u64,
    /// Position of the operation inside its transaction.
    pub op_index: usize,
    /// `None` for a delete.
    pub document: Option<Document>,
}

impl ModelVersion {
    fn covers(&self, valid_time: Timestamp) -> bool {
        self.valid_from <= valid_time && self.valid_to.map_or(true, |to| valid_time < to)
    }
}

/// Reference implementation of put, delete, match and evict.
#[derive(Debug, Clone, Default)]
pub struct BitemporalModel {
    versions: Vec<ModelVersion>,
    committed: Vec<bool>,
}

impl BitemporalModel {
    /// An empty model.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one transaction with the next tx id. Omitted valid times
    /// default to `default_valid_time`. Returns whether it committed.
    pub fn apply(&mut self, operations: &[Operation], default_valid_time: Timestamp) -> bool {
        let tx = self.committed.len() as u64;
        let mut staged = self.versions.clone();
        let mut committed = true;

        for (op_index, op) in operations.iter().enumerate() {
            match op {
                Operation::Put {
                    entity_id,
                    document,
                    valid_from,
                    valid_to,
                } => {
                    let from = valid_from.unwrap_or(default_valid_time);
                    if valid_to.is_some_and(|to| to <= from) {
                        committed = false;
                        break;
                    }
                    staged.push(ModelVersion {
                        entity_id: entity_id.clone(),
                        valid_from: from,
                        valid_to: *valid_to,
                        tx,
                        op_index,
                        document: Some(document.clone()),
                    });
                }
                Operation::Delete {
                    entity_id,
                    valid_from,
                    valid_to,
                } => {
                    let from = valid_from.unwrap_or(default_valid_time);
                    if valid_to.is_some_and(|to| to <= from) {
                        committed = false;
                        break;
                    }
                    staged.push(ModelVersion {
                        entity_id: entity_id.clone(),
                        valid_from: from,
                        valid_to: *valid_to,
                        tx,
                        op_index,
                        document: None,
                    });
                }
                Operation::Match {
                    entity_id,
                    expected,
                    valid_time,
                } => {
                    let at = valid_time.unwrap_or(default_valid_time);
                    if winner(&staged, entity_id, at, tx).and_then(|v| v.document.as_ref())
                        != expected.as_ref()
                    {
                        committed = false;
                        break;
                    }
                }
                Operation::Evict { entity_id } => staged.retain(|v| &v.entity_id != entity_id),
            }
        }

        if committed {
            self.versions = staged;
        }
        self.committed.push(committed);
        committed
    }

    /// The document visible at `valid_time` to a reader that has seen
    /// transactions up to and including `tx_bound`.
    #[must_use]
    pub fn resolve(&self, entity_id: &EntityId, valid_time: Timestamp, tx_bound: u64) -> Option<&Document> {
        winner(&self.versions, entity_id, valid_time, tx_bound)?.document.as_ref()
    }

    /// Entities with a document at `valid_time` as of `tx_bound`, in id
    /// order.
    #[must_use]
    pub fn entities(&self, valid_time: Timestamp, tx_bound: u64) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.versions.iter().map(|v| v.entity_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids.retain(|id| self.resolve(id, valid_time, tx_bound).is_some());
        ids
    }

    /// Whether transaction `tx` committed.
    #[must_use]
    pub fn committed(&self, tx: u64) -> Option<bool> {
        self.committed.get(tx as usize).copied()
    }

    /// Number of transactions applied.
    #[must_use]
    pub fn tx_count(&self) -> u64 {
        self.committed.len() as u64
    }

    /// Every surviving version.
    #[must_use]
    pub fn versions(&self) -> &[ModelVersion] {
        &self.versions
    }
}

/// Among versions of `entity_id` covering `valid_time` with `tx <= tx_bound`,
/// the one written last.
fn winner<'a>(
    versions: &'a [ModelVersion],
    entity_id: &EntityId,
    valid_time: Timestamp,
    tx_bound: u64,
) -> Option<&'a ModelVersion> {
    versions
        .iter()
        .filter(|v| &v.entity_id == entity_id && v.tx <= tx_bound && v.covers(valid_time))
        .max_by_key(|v| (v.tx, v.op_index))
}
