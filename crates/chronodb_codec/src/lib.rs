//! # ChronoDB Codec
//!
//! Canonical CBOR for document content and log payloads.
//!
//! Documents are content-addressed, so two logically equal documents must
//! encode to the same bytes. The rules enforced here:
//!
//! - integers and lengths use the shortest head
//! - map keys are sorted by encoded form (length first, then bytewise) and
//!   are unique
//! - no floats, tags, `undefined` or indefinite-length items
//! - text is UTF-8
//!
//! ```
//! use chronodb_codec::{from_cbor, to_canonical_cbor, Value};
//!
//! let doc = Value::map(vec![
//!     (Value::text("title"), Value::text("Spectre")),
//!     (Value::text("year"), Value::Integer(2015)),
//! ]);
//! let bytes = to_canonical_cbor(&doc).unwrap();
//! assert_eq!(from_cbor(&bytes).unwrap(), doc);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod interop;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder, MAX_DEPTH};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use interop::{from_value, to_value};
pub use value::Value;
