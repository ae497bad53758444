//! Transaction operations.
//!
//! Callers submit [`Operation`]s, which carry whole documents. The log
//! persists [`TxOperation`]s, which reference documents by content hash; the
//! bodies go to the document store.
//!
//! On disk a transaction's operations are a canonical CBOR array of maps:
//!
//! ```text
//! {"op": "put",    "id": <id>, "doc": h'<hash>', "vt": <ms>?, "end-vt": <ms>?}
//! {"op": "delete", "id": <id>, "vt": <ms>?, "end-vt": <ms>?}
//! {"op": "match",  "id": <id>, "doc": h'<hash>' | null, "vt": <ms>?}
//! {"op": "evict",  "id": <id>}
//! ```

use crate::document::{ContentHash, Document};
use crate::entity::EntityId;
use crate::error::{CoreError, CoreResult};
use crate::types::Timestamp;
use chronodb_codec::{from_cbor, to_canonical_cbor, Value};
use std::fmt;

const OP: &str = "op";
const ID: &str = "id";
const DOC: &str = "doc";
const VALID_FROM: &str = "vt";
const VALID_TO: &str = "end-vt";

/// An operation as submitted by a caller.
///
/// Omitted valid times default to the transaction time when indexed, or to
/// the snapshot's valid time when applied speculatively. `valid_to` is
/// exclusive; `None` means open-ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Writes a document version.
    Put {
        /// Target entity.
        entity_id: EntityId,
        /// New content.
        document: Document,
        /// Start of validity.
        valid_from: Option<Timestamp>,
        /// End of validity.
        valid_to: Option<Timestamp>,
    },
    /// Writes a tombstone.
    Delete {
        /// Target entity.
        entity_id: EntityId,
        /// Start of the deleted range.
        valid_from: Option<Timestamp>,
        /// End of the deleted range.
        valid_to: Option<Timestamp>,
    },
    /// Aborts the transaction unless the entity's content at `valid_time`
    /// equals `expected` (`None`: the entity must be absent).
    Match {
        /// Checked entity.
        entity_id: EntityId,
        /// Expected content.
        expected: Option<Document>,
        /// Instant to check at.
        valid_time: Option<Timestamp>,
    },
    /// Removes every version of the entity across all time.
    Evict {
        /// Target entity.
        entity_id: EntityId,
    },
}

impl Operation {
    /// Put valid from the transaction time onwards.
    pub fn put(entity_id: impl Into<EntityId>, document: Document) -> Self {
        Self::Put {
            entity_id: entity_id.into(),
            document,
            valid_from: None,
            valid_to: None,
        }
    }

    /// Delete from the transaction time onwards.
    pub fn delete(entity_id: impl Into<EntityId>) -> Self {
        Self::Delete {
            entity_id: entity_id.into(),
            valid_from: None,
            valid_to: None,
        }
    }

    /// Evicts an entity.
    pub fn evict(entity_id: impl Into<EntityId>) -> Self {
        Self::Evict {
            entity_id: entity_id.into(),
        }
    }

    /// The entity the operation targets.
    #[must_use]
    pub fn entity_id(&self) -> &EntityId {
        match self {
            Self::Put { entity_id, .. }
            | Self::Delete { entity_id, .. }
            | Self::Match { entity_id, .. }
            | Self::Evict { entity_id } => entity_id,
        }
    }

    /// Splits the operation into its logged form and the document body it
    /// carries, if any.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] for a range whose end is not after its
    /// start; codec errors while hashing.
    pub fn to_tx_operation(&self) -> CoreResult<(TxOperation, Option<Document>)> {
        Ok(match self {
            Self::Put {
                entity_id,
                document,
                valid_from,
                valid_to,
            } => {
                check_range(*valid_from, *valid_to)?;
                let op = TxOperation::Put {
                    entity_id: entity_id.clone(),
                    content: document.content_hash()?,
                    valid_from: *valid_from,
                    valid_to: *valid_to,
                };
                (op, Some(document.clone()))
            }
            Self::Delete {
                entity_id,
                valid_from,
                valid_to,
            } => {
                check_range(*valid_from, *valid_to)?;
                let op = TxOperation::Delete {
                    entity_id: entity_id.clone(),
                    valid_from: *valid_from,
                    valid_to: *valid_to,
                };
                (op, None)
            }
            Self::Match {
                entity_id,
                expected,
                valid_time,
            } => {
                let op = TxOperation::Match {
                    entity_id: entity_id.clone(),
                    expected: expected.as_ref().map(Document::content_hash).transpose()?,
                    valid_time: *valid_time,
                };
                (op, None)
            }
            Self::Evict { entity_id } => (
                TxOperation::Evict {
                    entity_id: entity_id.clone(),
                },
                None,
            ),
        })
    }
}

fn check_range(from: Option<Timestamp>, to: Option<Timestamp>) -> CoreResult<()> {
    match (from, to) {
        (Some(from), Some(to)) if to <= from => Err(CoreError::invalid_argument(format!(
            "valid time range [{from}, {to}) is empty"
        ))),
        _ => Ok(()),
    }
}

/// An operation as persisted in the transaction log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOperation {
    /// See [`Operation::Put`].
    Put {
        /// Target entity.
        entity_id: EntityId,
        /// Hash of the new content.
        content: ContentHash,
        /// Start of validity.
        valid_from: Option<Timestamp>,
        /// End of validity.
        valid_to: Option<Timestamp>,
    },
    /// See [`Operation::Delete`].
    Delete {
        /// Target entity.
        entity_id: EntityId,
        /// Start of the deleted range.
        valid_from: Option<Timestamp>,
        /// End of the deleted range.
        valid_to: Option<Timestamp>,
    },
    /// See [`Operation::Match`].
    Match {
        /// Checked entity.
        entity_id: EntityId,
        /// Hash of the expected content; `None` expects absence.
        expected: Option<ContentHash>,
        /// Instant to check at.
        valid_time: Option<Timestamp>,
    },
    /// See [`Operation::Evict`].
    Evict {
        /// Target entity.
        entity_id: EntityId,
    },
}

impl TxOperation {
    /// The entity the operation targets.
    #[must_use]
    pub fn entity_id(&self) -> &EntityId {
        match self {
            Self::Put { entity_id, .. }
            | Self::Delete { entity_id, .. }
            | Self::Match { entity_id, .. }
            | Self::Evict { entity_id } => entity_id,
        }
    }

    /// Short name of the operation.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Put { .. } => "put",
            Self::Delete { .. } => "delete",
            Self::Match { .. } => "match",
            Self::Evict { .. } => "evict",
        }
    }

    /// The document body this operation needs, if any.
    #[must_use]
    pub fn content(&self) -> Option<&ContentHash> {
        match self {
            Self::Put { content, .. } => Some(content),
            _ => None,
        }
    }

    /// The persisted map form.
    #[must_use]
    pub fn to_value(&self) -> Value {
        let mut pairs = vec![
            (Value::text(OP), Value::text(self.kind())),
            (Value::text(ID), self.entity_id().to_value()),
        ];
        let mut time = |key: &str, t: &Option<Timestamp>| {
            if let Some(t) = t {
                pairs.push((Value::text(key), Value::Integer(t.as_millis())));
            }
        };
        match self {
            Self::Put {
                valid_from,
                valid_to,
                ..
            }
            | Self::Delete {
                valid_from,
                valid_to,
                ..
            } => {
                time(VALID_FROM, valid_from);
                time(VALID_TO, valid_to);
            }
            Self::Match { valid_time, .. } => time(VALID_FROM, valid_time),
            Self::Evict { .. } => {}
        }
        match self {
            Self::Put { content, .. } => {
                pairs.push((Value::text(DOC), hash_value(content)));
            }
            Self::Match { expected, .. } => {
                let doc = expected.as_ref().map_or(Value::Null, hash_value);
                pairs.push((Value::text(DOC), doc));
            }
            _ => {}
        }
        Value::map(pairs)
    }

    /// Parses the persisted map form.
    ///
    /// # Errors
    ///
    /// [`CoreError::LogCorruption`] for anything malformed.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let op = value
            .get(OP)
            .and_then(Value::as_text)
            .ok_or_else(|| CoreError::log_corruption("operation without a kind"))?;
        let entity_id = value
            .get(ID)
            .ok_or_else(|| CoreError::log_corruption("operation without an entity id"))
            .and_then(|id| {
                EntityId::coerce(id)
                    .map_err(|e| CoreError::log_corruption(format!("bad entity id: {e}")))
            })?;
        let valid_from = timestamp_field(value, VALID_FROM)?;
        let valid_to = timestamp_field(value, VALID_TO)?;

        match op {
            "put" => Ok(Self::Put {
                entity_id,
                content: hash_field(value)?
                    .ok_or_else(|| CoreError::log_corruption("put without a document"))?,
                valid_from,
                valid_to,
            }),
            "delete" => Ok(Self::Delete {
                entity_id,
                valid_from,
                valid_to,
            }),
            "match" => Ok(Self::Match {
                entity_id,
                expected: hash_field(value)?,
                valid_time: valid_from,
            }),
            "evict" => Ok(Self::Evict { entity_id }),
            other => Err(CoreError::log_corruption(format!(
                "unknown operation kind {other:?}"
            ))),
        }
    }

    /// Encodes a transaction's operations.
    ///
    /// # Errors
    ///
    /// Propagates codec errors.
    pub fn encode_all(operations: &[Self]) -> CoreResult<Vec<u8>> {
        let array = Value::Array(operations.iter().map(Self::to_value).collect());
        Ok(to_canonical_cbor(&array)?)
    }

    /// Decodes a transaction's operations.
    ///
    /// # Errors
    ///
    /// [`CoreError::LogCorruption`] if the bytes are not a valid operations
    /// array.
    pub fn decode_all(bytes: &[u8]) -> CoreResult<Vec<Self>> {
        let value = from_cbor(bytes)
            .map_err(|e| CoreError::log_corruption(format!("undecodable operations: {e}")))?;
        value
            .as_array()
            .ok_or_else(|| CoreError::log_corruption("operations payload is not an array"))?
            .iter()
            .map(Self::from_value)
            .collect()
    }
}

impl fmt::Display for TxOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind(), self.entity_id())
    }
}

fn hash_value(hash: &ContentHash) -> Value {
    Value::Bytes(hash.as_bytes().to_vec())
}

fn hash_field(value: &Value) -> CoreResult<Option<ContentHash>> {
    match value.get(DOC) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bytes(bytes)) => ContentHash::from_slice(bytes)
            .map(Some)
            .ok_or_else(|| CoreError::log_corruption("content hash must be 32 bytes")),
        Some(other) => Err(CoreError::log_corruption(format!(
            "content hash is a {}",
            other.type_name()
        ))),
    }
}

fn timestamp_field(value: &Value, key: &str) -> CoreResult<Option<Timestamp>> {
    match value.get(key) {
        None => Ok(None),
        Some(Value::Integer(ms)) => Ok(Some(Timestamp::from_millis(*ms))),
        Some(other) => Err(CoreError::log_corruption(format!(
            "{key} is a {}",
            other.type_name()
        ))),
    }
}

/// Fluent builder for a transaction's operations.
///
/// ```
/// use chronodb_core::{Document, EntityId, Timestamp, TransactionBuilder};
///
/// let ops = TransactionBuilder::new()
///     .put(EntityId::keyword("ivan").unwrap(), Document::new().with("name", "Ivan"))
///     .delete_at("petr", Timestamp::from_millis(1_000))
///     .build();
/// assert_eq!(ops.len(), 2);
/// ```
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    operations: Vec<Operation>,
}

impl TransactionBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Puts a document from the transaction time onwards.
    #[must_use]
    pub fn put(self, entity_id: impl Into<EntityId>, document: Document) -> Self {
        self.push(Operation::Put {
            entity_id: entity_id.into(),
            document,
            valid_from: None,
            valid_to: None,
        })
    }

    /// Puts a document from `valid_from` onwards.
    #[must_use]
    pub fn put_at(
        self,
        entity_id: impl Into<EntityId>,
        document: Document,
        valid_from: Timestamp,
    ) -> Self {
        self.push(Operation::Put {
            entity_id: entity_id.into(),
            document,
            valid_from: Some(valid_from),
            valid_to: None,
        })
    }

    /// Puts a document valid in `[valid_from, valid_to)`.
    #[must_use]
    pub fn put_between(
        self,
        entity_id: impl Into<EntityId>,
        document: Document,
        valid_from: Timestamp,
        valid_to: Timestamp,
    ) -> Self {
        self.push(Operation::Put {
            entity_id: entity_id.into(),
            document,
            valid_from: Some(valid_from),
            valid_to: Some(valid_to),
        })
    }

    /// Deletes from the transaction time onwards.
    #[must_use]
    pub fn delete(self, entity_id: impl Into<EntityId>) -> Self {
        self.push(Operation::delete(entity_id))
    }

    /// Deletes from `valid_from` onwards.
    #[must_use]
    pub fn delete_at(self, entity_id: impl Into<EntityId>, valid_from: Timestamp) -> Self {
        self.push(Operation::Delete {
            entity_id: entity_id.into(),
            valid_from: Some(valid_from),
            valid_to: None,
        })
    }

    /// Deletes in `[valid_from, valid_to)`.
    #[must_use]
    pub fn delete_between(
        self,
        entity_id: impl Into<EntityId>,
        valid_from: Timestamp,
        valid_to: Timestamp,
    ) -> Self {
        self.push(Operation::Delete {
            entity_id: entity_id.into(),
            valid_from: Some(valid_from),
            valid_to: Some(valid_to),
        })
    }

    /// Requires the entity to hold `expected` at the transaction time.
    #[must_use]
    pub fn match_doc(self, entity_id: impl Into<EntityId>, expected: Document) -> Self {
        self.push(Operation::Match {
            entity_id: entity_id.into(),
            expected: Some(expected),
            valid_time: None,
        })
    }

    /// Requires the entity to hold `expected` at `valid_time`.
    #[must_use]
    pub fn match_doc_at(
        self,
        entity_id: impl Into<EntityId>,
        expected: Document,
        valid_time: Timestamp,
    ) -> Self {
        self.push(Operation::Match {
            entity_id: entity_id.into(),
            expected: Some(expected),
            valid_time: Some(valid_time),
        })
    }

    /// Requires the entity to be absent at the transaction time.
    #[must_use]
    pub fn match_not_exists(self, entity_id: impl Into<EntityId>) -> Self {
        self.push(Operation::Match {
            entity_id: entity_id.into(),
            expected: None,
            valid_time: None,
        })
    }

    /// Requires the entity to be absent at `valid_time`.
    #[must_use]
    pub fn match_not_exists_at(self, entity_id: impl Into<EntityId>, valid_time: Timestamp) -> Self {
        self.push(Operation::Match {
            entity_id: entity_id.into(),
            expected: None,
            valid_time: Some(valid_time),
        })
    }

    /// Evicts the entity.
    #[must_use]
    pub fn evict(self, entity_id: impl Into<EntityId>) -> Self {
        self.push(Operation::evict(entity_id))
    }

    /// The operations, in order.
    #[must_use]
    pub fn build(self) -> Vec<Operation> {
        self.operations
    }

    fn push(mut self, operation: Operation) -> Self {
        self.operations.push(operation);
        self
    }
}
