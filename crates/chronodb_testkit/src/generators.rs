//! Property-based test generators using proptest.
//!
//! Valid times are kept small (`0..100`) and always explicit, so generated
//! transactions resolve the same way no matter when they are submitted.

use chronodb_core::{Document, EntityId, Operation, Timestamp};
use proptest::prelude::*;
use uuid::Uuid;

/// Entities the transaction strategies write to. Few enough that
/// operations collide.
pub const ENTITIES: [&str; 3] = ["a", "b", "c"];

/// Upper bound (exclusive) of generated valid times.
pub const MAX_VALID_TIME: i64 = 100;

/// Strategy for generating entity ids of every kind.
pub fn entity_id_strategy() -> impl Strategy<Value = EntityId> {
    prop_oneof![
        "[a-z][a-z0-9/-]{0,15}"
            .prop_map(|name| EntityId::keyword(&name).expect("Invalid keyword")),
        "[a-zA-Z0-9 _-]{0,16}".prop_map(EntityId::from),
        any::<i64>().prop_map(EntityId::from),
        any::<[u8; 16]>().prop_map(|bytes| EntityId::from(Uuid::from_bytes(bytes))),
    ]
}

/// Strategy for one of the [`ENTITIES`].
pub fn small_entity_strategy() -> impl Strategy<Value = EntityId> {
    prop::sample::select(ENTITIES.to_vec()).prop_map(EntityId::from)
}

/// Strategy for small documents with a handful of fields.
pub fn document_strategy() -> impl Strategy<Value = Document> {
    prop::collection::btree_map(
        prop::sample::select(vec!["n", "name", "tag", "score"]),
        prop_oneof![
            any::<i32>().prop_map(|n| n.to_string()),
            "[a-z]{0,8}",
        ],
        1..4,
    )
    .prop_map(|fields| {
        fields
            .into_iter()
            .fold(Document::new(), |doc, (field, value)| doc.with(field, value))
    })
}

/// Strategy for a non-empty valid time range `[from, to)`; `to` is `None`
/// for open-ended ranges.
pub fn valid_range_strategy() -> impl Strategy<Value = (Timestamp, Option<Timestamp>)> {
    (0..MAX_VALID_TIME, prop::option::of(1..MAX_VALID_TIME)).prop_map(|(from, len)| {
        (
            Timestamp::from_millis(from),
            len.map(|len| Timestamp::from_millis(from + len)),
        )
    })
}

/// Strategy for puts, deletes and the occasional evict over [`ENTITIES`].
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        6 => (small_entity_strategy(), document_strategy(), valid_range_strategy()).prop_map(
            |(entity_id, document, (from, to))| Operation::Put {
                entity_id,
                document,
                valid_from: Some(from),
                valid_to: to,
            }
        ),
        3 => (small_entity_strategy(), valid_range_strategy()).prop_map(
            |(entity_id, (from, to))| Operation::Delete {
                entity_id,
                valid_from: Some(from),
                valid_to: to,
            }
        ),
        1 => small_entity_strategy().prop_map(Operation::evict),
    ]
}

/// Strategy for one transaction.
pub fn transaction_strategy() -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(operation_strategy(), 1..4)
}

/// Strategy for a sequence of transactions.
pub fn transaction_sequence_strategy(
    min_txs: usize,
    max_txs: usize,
) -> impl Strategy<Value = Vec<Vec<Operation>>> {
    prop::collection::vec(transaction_strategy(), min_txs..max_txs)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}
