//! Immutable, content-addressed documents and their storage.

mod log_store;
mod store;

pub use log_store::LogDocumentStore;
pub use store::{DocumentStore, InMemoryDocumentStore};

use crate::error::{CoreError, CoreResult};
use chronodb_codec::{from_cbor, to_canonical_cbor, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// SHA-256 of a document's canonical CBOR encoding.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    /// Length in bytes.
    pub const LEN: usize = 32;

    /// Wraps raw digest bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Builds a hash from a slice, if it has the right length.
    #[must_use]
    pub fn from_slice(slice: &[u8]) -> Option<Self> {
        <[u8; 32]>::try_from(slice).ok().map(Self)
    }

    /// Hashes already-encoded bytes.
    #[must_use]
    pub fn digest(encoded: &[u8]) -> Self {
        Self(Sha256::digest(encoded).into())
    }

    /// Raw digest bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering.
    #[must_use]
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// A document: field name to [`Value`].
///
/// Documents never change once submitted; a new revision is a new document
/// with a new [`ContentHash`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    fields: BTreeMap<String, Value>,
}

impl Document {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, builder style.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    /// Sets a field, returning the previous value.
    pub fn insert(&mut self, field: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(field.into(), value.into())
    }

    /// Looks up a field.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Iterates fields in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Field names in name order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if the document has no fields.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// A document holding only the named fields that are present.
    #[must_use]
    pub fn project(&self, fields: &[&str]) -> Self {
        let fields = fields
            .iter()
            .filter_map(|name| {
                self.fields
                    .get_key_value(*name)
                    .map(|(k, v)| (k.clone(), v.clone()))
            })
            .collect();
        Self { fields }
    }

    /// The document as a canonical map value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        Value::map(
            self.fields
                .iter()
                .map(|(k, v)| (Value::Text(k.clone()), v.clone()))
                .collect(),
        )
    }

    /// Builds a document from a map value with text keys.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] if `value` is not such a map.
    pub fn from_value(value: &Value) -> CoreResult<Self> {
        let pairs = value.as_map().ok_or_else(|| {
            CoreError::invalid_argument(format!("document must be a map, got {}", value.type_name()))
        })?;
        let mut fields = BTreeMap::new();
        for (key, field) in pairs {
            let name = key.as_text().ok_or_else(|| {
                CoreError::invalid_argument(format!(
                    "document field names must be text, got {}",
                    key.type_name()
                ))
            })?;
            fields.insert(name.to_owned(), field.clone());
        }
        Ok(Self { fields })
    }

    /// Converts a serializable struct into a document.
    ///
    /// # Errors
    ///
    /// Fails if `value` does not serialize to a map with text keys, or
    /// contains floats.
    pub fn from_serde<T: Serialize + ?Sized>(value: &T) -> CoreResult<Self> {
        Self::from_value(&chronodb_codec::to_value(value)?)
    }

    /// Rebuilds a typed struct from the document.
    ///
    /// # Errors
    ///
    /// Fails if the fields do not match `T`.
    pub fn to_serde<T: DeserializeOwned>(&self) -> CoreResult<T> {
        Ok(chronodb_codec::from_value(&self.to_value())?)
    }

    /// Canonical CBOR encoding.
    ///
    /// # Errors
    ///
    /// Propagates codec errors.
    pub fn encode(&self) -> CoreResult<Vec<u8>> {
        Ok(to_canonical_cbor(&self.to_value())?)
    }

    /// Decodes a document from canonical CBOR.
    ///
    /// # Errors
    ///
    /// [`CoreError::DocumentCorruption`] if the bytes are not a canonical
    /// map with text keys.
    pub fn decode(bytes: &[u8]) -> CoreResult<Self> {
        let value = from_cbor(bytes)
            .map_err(|e| CoreError::document_corruption(format!("undecodable document: {e}")))?;
        Self::from_value(&value)
            .map_err(|e| CoreError::document_corruption(format!("malformed document: {e}")))
    }

    /// Content hash of the canonical encoding.
    ///
    /// # Errors
    ///
    /// Propagates codec errors.
    pub fn content_hash(&self) -> CoreResult<ContentHash> {
        Ok(ContentHash::digest(&self.encode()?))
    }
}

impl<K: Into<String>, V: Into<Value>> FromIterator<(K, V)> for Document {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            fields: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
