//! The bitemporal index.
//!
//! Each entity owns an immutable [`EntityTimeline`]; the
//! [`BitemporalIndex`] maps ids to timelines and records the outcome of
//! every indexed transaction.

mod persistent;
mod store;
mod timeline;
mod version;

pub(crate) use store::EntityChange;
pub use store::{BitemporalIndex, TxOutcome};
pub use timeline::EntityTimeline;
pub use version::{EntityVersion, VersionContent};
