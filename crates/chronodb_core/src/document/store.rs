//! The document store seam.

use super::{ContentHash, Document};
use crate::error::CoreResult;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Content-addressed storage of document bodies.
///
/// Writes are idempotent: putting a document that is already present is a
/// no-op. Once a hash is evicted it is not served again unless the same
/// body is put again. Stores remember evictions so that replaying the log
/// can tell an evicted body from a lost one.
pub trait DocumentStore: Send + Sync {
    /// Stores `document` under `hash`.
    ///
    /// # Errors
    ///
    /// Storage or encoding failures.
    fn put(&self, hash: ContentHash, document: &Document) -> CoreResult<()>;

    /// Fetches a body.
    ///
    /// # Errors
    ///
    /// Storage failures or [`crate::CoreError::DocumentCorruption`].
    fn get(&self, hash: &ContentHash) -> CoreResult<Option<Document>>;

    /// Returns `true` if the body is held.
    ///
    /// # Errors
    ///
    /// Storage failures.
    fn contains(&self, hash: &ContentHash) -> CoreResult<bool>;

    /// Returns `true` if the body was evicted and not put again since.
    ///
    /// # Errors
    ///
    /// Storage failures.
    fn is_evicted(&self, hash: &ContentHash) -> CoreResult<bool>;

    /// Drops a body so its bytes can no longer be read back. Returns `false`
    /// if it was not held.
    ///
    /// # Errors
    ///
    /// Storage failures.
    fn evict(&self, hash: &ContentHash) -> CoreResult<bool>;

    /// Makes previous writes durable.
    ///
    /// # Errors
    ///
    /// Storage failures.
    fn flush(&self) -> CoreResult<()> {
        Ok(())
    }

    /// Hashes and stores `document`, returning its hash.
    ///
    /// # Errors
    ///
    /// Storage or encoding failures.
    fn put_document(&self, document: &Document) -> CoreResult<ContentHash> {
        let hash = document.content_hash()?;
        self.put(hash, document)?;
        Ok(hash)
    }
}

/// Document store held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    /// `None` marks an evicted body.
    documents: RwLock<HashMap<ContentHash, Option<Document>>>,
}

impl InMemoryDocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bodies held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.read().values().flatten().count()
    }

    /// Returns `true` if no bodies are held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for InMemoryDocumentStore {
    fn put(&self, hash: ContentHash, document: &Document) -> CoreResult<()> {
        let mut documents = self.documents.write();
        let slot = documents.entry(hash).or_insert(None);
        if slot.is_none() {
            *slot = Some(document.clone());
        }
        Ok(())
    }

    fn get(&self, hash: &ContentHash) -> CoreResult<Option<Document>> {
        Ok(self.documents.read().get(hash).cloned().flatten())
    }

    fn contains(&self, hash: &ContentHash) -> CoreResult<bool> {
        Ok(self.documents.read().get(hash).is_some_and(Option::is_some))
    }

    fn is_evicted(&self, hash: &ContentHash) -> CoreResult<bool> {
        Ok(self.documents.read().get(hash).is_some_and(Option::is_none))
    }

    fn evict(&self, hash: &ContentHash) -> CoreResult<bool> {
        match self.documents.write().get_mut(hash) {
            Some(slot) => Ok(slot.take().is_some()),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_is_idempotent_and_evict_removes() {
        let store = InMemoryDocumentStore::new();
        let doc = Document::new().with("bar", "baz");
        let hash = store.put_document(&doc).unwrap();
        assert_eq!(store.put_document(&doc).unwrap(), hash);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&hash).unwrap(), Some(doc.clone()));

        assert!(store.evict(&hash).unwrap());
        assert!(!store.evict(&hash).unwrap());
        assert!(!store.contains(&hash).unwrap());
        assert!(store.is_evicted(&hash).unwrap());
        assert!(store.is_empty());

        store.put_document(&doc).unwrap();
        assert!(!store.is_evicted(&hash).unwrap());
        assert_eq!(store.len(), 1);
    }
}
