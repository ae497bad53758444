//! Applies one transaction's operations.
//!
//! Operations run strictly in order against a private overlay of the state
//! as of the previous transaction, so a `Match` sees the effect of earlier
//! operations in the same transaction. Nothing is published here: the
//! result is either a set of replacement timelines (commit) or nothing at
//! all (abort).

use crate::document::{ContentHash, Document};
use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::index::{EntityChange, EntityTimeline, EntityVersion, VersionContent};
use crate::operation::TxOperation;
use crate::types::{BitemporalInstant, Timestamp};
use std::collections::BTreeMap;
use std::sync::Arc;

/// The state a transaction is applied on top of.
pub(crate) trait TxContext {
    /// The entity's timeline before this transaction.
    fn timeline(&self, entity_id: &EntityId) -> Option<Arc<EntityTimeline>>;

    /// A document body referenced by a put.
    fn document(&self, hash: &ContentHash) -> CoreResult<Option<Document>>;

    /// Whether a body that is not held was evicted rather than lost.
    fn is_evicted(&self, hash: &ContentHash) -> CoreResult<bool>;
}

/// What a committed transaction changes.
#[derive(Debug, Default)]
pub(crate) struct TxEffects {
    pub changes: Vec<EntityChange>,
    /// Field names of every put document, one entry per put.
    pub attributes: Vec<String>,
}

struct PendingEntity {
    base: Option<Arc<EntityTimeline>>,
    evicted: bool,
    /// Written by this transaction; never overlapping.
    versions: Vec<EntityVersion>,
}

impl PendingEntity {
    fn resolve(&self, valid_time: Timestamp) -> Option<ContentHash> {
        let content = match self.versions.iter().find(|v| v.covers(valid_time)) {
            Some(own) => own.content,
            None => self.base.as_ref()?.resolve_latest(valid_time)?.content,
        };
        match content {
            VersionContent::Document(hash) => Some(hash),
            VersionContent::Tombstone => None,
        }
    }

    /// Later operations clip earlier ones of the same transaction.
    fn write(&mut self, version: EntityVersion) {
        let (from, to) = (version.valid_from, version.valid_to);
        self.versions = self
            .versions
            .drain(..)
            .flat_map(|v| v.without(from, to))
            .collect();
        self.versions.push(version);
    }

    fn evict(&mut self) {
        self.evicted = true;
        self.base = None;
        self.versions.clear();
    }
}

/// Runs `operations` as transaction `tx`.
///
/// Returns `Ok(None)` when a match fails. Errors abort the transaction too;
/// the caller decides from [`CoreError::is_integrity_failure`] whether they
/// are fatal.
pub(crate) fn process(
    ctx: &dyn TxContext,
    tx: BitemporalInstant,
    operations: &[TxOperation],
    default_valid_time: Timestamp,
) -> CoreResult<Option<TxEffects>> {
    let mut pending: BTreeMap<EntityId, PendingEntity> = BTreeMap::new();
    let mut attributes = Vec::new();

    for op in operations {
        let entity_id = op.entity_id();
        let entity = pending
            .entry(entity_id.clone())
            .or_insert_with(|| PendingEntity {
                base: ctx.timeline(entity_id),
                evicted: false,
                versions: Vec::new(),
            });

        let version = |from: Option<Timestamp>, to: Option<Timestamp>, content| {
            let valid_from = from.unwrap_or(default_valid_time);
            if to.is_some_and(|to| to <= valid_from) {
                return Err(CoreError::invalid_argument(format!(
                    "{op} has an empty valid time range"
                )));
            }
            Ok(EntityVersion {
                entity_id: entity_id.clone(),
                valid_from,
                valid_to: to,
                tx_id: tx.tx_id,
                tx_time: tx.tx_time,
                content,
            })
        };

        match op {
            TxOperation::Put {
                content,
                valid_from,
                valid_to,
                ..
            } => {
                // A replayed put whose body a later evict removed still
                // writes its version; that evict drops it again.
                let document = match ctx.document(content)? {
                    Some(document) => Some(document),
                    None if ctx.is_evicted(content)? => None,
                    None => {
                        return Err(CoreError::DocumentMissing {
                            hash: content.to_hex(),
                        })
                    }
                };
                entity.write(version(
                    *valid_from,
                    *valid_to,
                    VersionContent::Document(*content),
                )?);
                if let Some(document) = document {
                    attributes.extend(document.field_names().map(str::to_owned));
                }
            }
            TxOperation::Delete {
                valid_from,
                valid_to,
                ..
            } => {
                entity.write(version(*valid_from, *valid_to, VersionContent::Tombstone)?);
            }
            TxOperation::Match {
                expected,
                valid_time,
                ..
            } => {
                let at = valid_time.unwrap_or(default_valid_time);
                let actual = entity.resolve(at);
                if actual != *expected {
                    tracing::debug!(
                        tx = %tx.tx_id,
                        entity = %entity_id,
                        valid_time = %at,
                        "match failed, aborting transaction"
                    );
                    return Ok(None);
                }
            }
            TxOperation::Evict { .. } => entity.evict(),
        }
    }

    let mut changes = Vec::new();
    for (entity_id, entity) in pending {
        if entity.versions.is_empty() {
            if entity.evicted {
                changes.push(EntityChange {
                    entity_id,
                    evicted: true,
                    timeline: None,
                    added: Vec::new(),
                });
            }
            continue;
        }
        let (timeline, added) = EntityTimeline::with_transaction(
            entity.base.as_deref(),
            entity_id.clone(),
            tx.tx_id,
            entity.versions,
        );
        changes.push(EntityChange {
            entity_id,
            evicted: entity.evicted,
            timeline: Some(Arc::new(timeline)),
            added,
        });
    }

    Ok(Some(TxEffects {
        changes,
        attributes,
    }))
}
