//! # ChronoDB Testkit
//!
//! Test utilities for ChronoDB.
//!
//! This crate provides:
//! - Node fixtures over memory or temporary directories that can be
//!   reopened over the same bytes
//! - Property-based test generators using proptest
//! - A brute-force bitemporal model to check the index against
//!
//! The cross-module tests themselves live in `tests/`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chronodb_testkit::prelude::*;
//!
//! #[test]
//! fn puts_are_visible() {
//!     let node = TestNode::manual();
//!     node.commit(&TransactionBuilder::new().put("a", doc(1)).build());
//!     assert_eq!(node.snapshot().entity(&"a".into()).unwrap(), Some(doc(1)));
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod model;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::model::*;
    pub use chronodb_core::{
        BitemporalInstant, CoreError, Document, EntityId, HistoryOptions, Node, Operation,
        Snapshot, SortOrder, Timestamp, TransactionBuilder, TxId, Value,
    };
}

pub use fixtures::*;
pub use generators::*;
pub use model::*;
