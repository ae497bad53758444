//! # ChronoDB Storage
//!
//! Append-only byte storage for ChronoDB.
//!
//! Backends know nothing about transaction records or documents. The core
//! frames, checksums and interprets everything it writes; a backend only
//! has to hand back the bytes it was given at the offset it reported.
//!
//! ## Backends
//!
//! - [`InMemoryBackend`] - ephemeral, shareable between handles so tests can
//!   simulate a restart over the same bytes
//! - [`FileBackend`] - a single OS file
//!
//! ## Example
//!
//! ```rust
//! use chronodb_storage::{InMemoryBackend, StorageBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"tx-0").unwrap();
//! assert_eq!(backend.read_at(offset, 4).unwrap(), b"tx-0");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
