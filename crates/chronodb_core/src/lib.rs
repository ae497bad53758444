//! # ChronoDB Core
//!
//! Consistency and query core of a bitemporal document store.
//!
//! Every document revision carries two times: when it was true in the world
//! (valid time) and when it was recorded (transaction time). This crate
//! provides:
//! - an append-only transaction log that orders and persists transactions
//! - a single sequential indexer with blocking, timeout-bounded awaits
//! - snapshots that resolve entities as of a transaction bound and a valid
//!   time
//! - put, delete, match and evict semantics with whole-transaction aborts
//! - entity history with corrections, eagerly or through a lazy cursor
//! - speculative transactions applied to a private copy of a snapshot
//! - notifications for every indexed transaction
//!
//! ```rust,ignore
//! use chronodb_core::{Document, HistoryOptions, Node, TransactionBuilder};
//!
//! let node = Node::open_in_memory()?;
//! node.submit_tx(&TransactionBuilder::new().put("doc-1", Document::new().with("bar", "baz")).build())?;
//! node.sync(None)?;
//! node.submit_tx(&TransactionBuilder::new().delete("doc-1").build())?;
//! node.sync(None)?;
//!
//! let history = node.snapshot().entity_history(&"doc-1".into(), HistoryOptions::new())?;
//! assert_eq!(history.len(), 2);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod document;
mod entity;
mod error;
mod events;
mod history;
mod index;
mod indexer;
mod node;
mod operation;
mod processor;
mod progress;
mod query;
mod snapshot;
mod speculative;
mod stats;
mod txlog;
mod types;

pub use config::Config;
pub use document::{ContentHash, Document, DocumentStore, InMemoryDocumentStore, LogDocumentStore};
pub use entity::EntityId;
pub use error::{CoreError, CoreResult};
pub use events::{EventBus, EventFilter, EventType, IndexedTxEvent, Subscription};
pub use history::{HistoryCursor, HistoryEntry, HistoryOptions, SortOrder};
pub use index::{BitemporalIndex, EntityTimeline, EntityVersion, TxOutcome, VersionContent};
pub use node::{Node, DOCUMENTS_FILE, LOG_FILE};
pub use operation::{Operation, TransactionBuilder, TxOperation};
pub use progress::IndexProgress;
pub use query::{EqualityMatcher, EqualityQuery, Matcher};
pub use snapshot::{EntityTx, Snapshot};
pub use stats::{NodeStats, StatsSnapshot};
pub use txlog::{TransactionRecord, TxLog, TxLogCursor, LOG_MAGIC, LOG_VERSION};
pub use types::{AwaitTarget, BitemporalInstant, Timestamp, TxId};

pub use chronodb_codec::Value;
