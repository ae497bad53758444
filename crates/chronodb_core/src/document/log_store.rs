//! Durable document store over an append-only backend.
//!
//! Record layout (little endian):
//!
//! ```text
//! | magic "CDOC" (4) | kind (1) | hash (32) | len (4) | header crc32 (4) | body (len) | crc32 (4) |
//! ```
//!
//! `kind` is 1 for a body and 2 for an eviction marker (with `len` 0). The
//! header CRC covers the fields before it; the trailing CRC covers
//! everything before it. On open the whole file is scanned to rebuild the
//! hash -> offset map. Only a record whose header checks out but whose
//! frame runs past the end counts as torn and is cut off.
//!
//! Eviction appends a marker, then overwrites the body bytes with zeros in
//! place. A zeroed body fails its CRC, which the scan accepts only when a
//! later marker evicts the same hash.

use super::{ContentHash, Document, DocumentStore};
use crate::error::{CoreError, CoreResult};
use chronodb_storage::StorageBackend;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};

const DOC_MAGIC: [u8; 4] = *b"CDOC";
const HEADER_FIELDS: usize = 4 + 1 + ContentHash::LEN + 4;
const HEADER_LEN: usize = HEADER_FIELDS + 4;
const CRC_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum RecordKind {
    Body = 1,
    Evicted = 2,
}

impl RecordKind {
    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Self::Body),
            2 => Some(Self::Evicted),
            _ => None,
        }
    }
}

struct Inner {
    backend: Box<dyn StorageBackend>,
    /// hash -> (body offset, body length)
    locations: HashMap<ContentHash, (u64, usize)>,
    evicted: HashSet<ContentHash>,
}

/// A [`DocumentStore`] persisted in a [`StorageBackend`].
pub struct LogDocumentStore {
    inner: Mutex<Inner>,
    sync_on_write: bool,
}

impl LogDocumentStore {
    /// Opens a store, scanning existing records.
    ///
    /// # Errors
    ///
    /// [`CoreError::DocumentCorruption`] for a damaged header;
    /// [`CoreError::ChecksumMismatch`] for a damaged body that was never
    /// evicted.
    pub fn open(mut backend: Box<dyn StorageBackend>, sync_on_write: bool) -> CoreResult<Self> {
        let mut locations = HashMap::new();
        let mut evicted = HashSet::new();
        // bodies failing their CRC, forgiven by a later eviction marker
        let mut damaged = HashMap::new();
        let size = backend.size()?;
        let mut offset = 0u64;

        while offset < size {
            let remaining = size - offset;
            if remaining < HEADER_LEN as u64 {
                break;
            }
            let header = backend.read_at(offset, HEADER_LEN)?;
            let (kind, hash, len) = parse_header(&header)?;
            let frame_len = (HEADER_LEN + len + CRC_LEN) as u64;
            if remaining < frame_len {
                break;
            }
            let frame = backend.read_at(offset, HEADER_LEN + len + CRC_LEN)?;
            match (kind, verify_crc(&frame)) {
                (RecordKind::Body, Ok(())) => {
                    evicted.remove(&hash);
                    locations.insert(hash, (offset + HEADER_LEN as u64, len));
                }
                (RecordKind::Body, Err(e)) => {
                    damaged.insert(hash, e);
                }
                (RecordKind::Evicted, Ok(())) => {
                    damaged.remove(&hash);
                    locations.remove(&hash);
                    evicted.insert(hash);
                }
                (RecordKind::Evicted, Err(e)) => return Err(e),
            }
            offset += frame_len;
        }
        if let Some(e) = damaged.into_values().next() {
            return Err(e);
        }

        if offset < size {
            tracing::info!(
                offset,
                dropped = size - offset,
                "truncating torn document store tail"
            );
            backend.truncate(offset)?;
        }

        Ok(Self {
            inner: Mutex::new(Inner {
                backend,
                locations,
                evicted,
            }),
            sync_on_write,
        })
    }

    /// Number of live bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().locations.len()
    }

    /// Returns `true` if no bodies are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn append(inner: &mut Inner, kind: RecordKind, hash: &ContentHash, body: &[u8]) -> CoreResult<u64> {
        let len = u32::try_from(body.len())
            .map_err(|_| CoreError::invalid_argument("document body larger than 4 GiB"))?;
        let mut frame = Vec::with_capacity(HEADER_LEN + body.len() + CRC_LEN);
        frame.extend_from_slice(&DOC_MAGIC);
        frame.push(kind as u8);
        frame.extend_from_slice(hash.as_bytes());
        frame.extend_from_slice(&len.to_le_bytes());
        let header_crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&header_crc.to_le_bytes());
        frame.extend_from_slice(body);
        let crc = crc32fast::hash(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        Ok(inner.backend.append(&frame)?)
    }
}

fn parse_header(header: &[u8]) -> CoreResult<(RecordKind, ContentHash, usize)> {
    if header[..4] != DOC_MAGIC {
        return Err(CoreError::document_corruption("bad record magic"));
    }
    let kind = RecordKind::from_byte(header[4])
        .ok_or_else(|| CoreError::document_corruption(format!("unknown record kind {}", header[4])))?;
    let hash = ContentHash::from_slice(&header[5..5 + ContentHash::LEN])
        .ok_or_else(|| CoreError::document_corruption("short content hash"))?;
    let stored = u32::from_le_bytes(array(&header[HEADER_FIELDS..HEADER_LEN]));
    let actual = crc32fast::hash(&header[..HEADER_FIELDS]);
    if stored != actual {
        return Err(CoreError::document_corruption(format!(
            "header checksum mismatch: expected {stored:08x}, got {actual:08x}"
        )));
    }
    let len = u32::from_le_bytes(array(&header[HEADER_FIELDS - 4..HEADER_FIELDS]));
    Ok((kind, hash, len as usize))
}

fn array(bytes: &[u8]) -> [u8; 4] {
    let mut out = [0u8; 4];
    out.copy_from_slice(bytes);
    out
}

fn verify_crc(frame: &[u8]) -> CoreResult<()> {
    let (body, stored) = frame.split_at(frame.len() - CRC_LEN);
    let expected = u32::from_le_bytes(array(stored));
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(CoreError::ChecksumMismatch { expected, actual });
    }
    Ok(())
}

impl DocumentStore for LogDocumentStore {
    fn put(&self, hash: ContentHash, document: &Document) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        if inner.locations.contains_key(&hash) {
            return Ok(());
        }
        let body = document.encode()?;
        let offset = Self::append(&mut inner, RecordKind::Body, &hash, &body)?;
        if self.sync_on_write {
            inner.backend.flush()?;
        }
        inner.evicted.remove(&hash);
        inner
            .locations
            .insert(hash, (offset + HEADER_LEN as u64, body.len()));
        Ok(())
    }

    fn get(&self, hash: &ContentHash) -> CoreResult<Option<Document>> {
        let inner = self.inner.lock();
        let Some(&(offset, len)) = inner.locations.get(hash) else {
            return Ok(None);
        };
        let body = inner.backend.read_at(offset, len)?;
        drop(inner);

        let document = Document::decode(&body)?;
        if document.content_hash()? != *hash {
            return Err(CoreError::document_corruption(format!(
                "body stored under {hash} hashes differently"
            )));
        }
        Ok(Some(document))
    }

    fn contains(&self, hash: &ContentHash) -> CoreResult<bool> {
        Ok(self.inner.lock().locations.contains_key(hash))
    }

    fn is_evicted(&self, hash: &ContentHash) -> CoreResult<bool> {
        Ok(self.inner.lock().evicted.contains(hash))
    }

    fn evict(&self, hash: &ContentHash) -> CoreResult<bool> {
        let mut inner = self.inner.lock();
        let Some(&(offset, len)) = inner.locations.get(hash) else {
            return Ok(false);
        };
        // the marker must be durable before the body it forgives is damaged
        Self::append(&mut inner, RecordKind::Evicted, hash, &[])?;
        inner.backend.flush()?;
        inner.locations.remove(hash);
        inner.evicted.insert(*hash);

        inner.backend.write_at(offset, &vec![0u8; len])?;
        if self.sync_on_write {
            inner.backend.flush()?;
        }
        Ok(true)
    }

    fn flush(&self) -> CoreResult<()> {
        self.inner.lock().backend.flush()?;
        Ok(())
    }
}

impl std::fmt::Debug for LogDocumentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogDocumentStore")
            .field("documents", &self.len())
            .field("sync_on_write", &self.sync_on_write)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronodb_storage::InMemoryBackend;

    fn doc(n: i64) -> Document {
        Document::new().with("n", n)
    }

    #[test]
    fn bodies_survive_reopen_and_evictions_stick() {
        let disk = InMemoryBackend::new();
        let (kept, evicted) = {
            let store = LogDocumentStore::open(Box::new(disk.share()), true).unwrap();
            let kept = store.put_document(&doc(1)).unwrap();
            let evicted = store.put_document(&doc(2)).unwrap();
            assert!(store.evict(&evicted).unwrap());
            (kept, evicted)
        };

        let store = LogDocumentStore::open(Box::new(disk), true).unwrap();
        assert_eq!(store.get(&kept).unwrap(), Some(doc(1)));
        assert_eq!(store.get(&evicted).unwrap(), None);
        assert!(store.is_evicted(&evicted).unwrap());
        assert!(!store.is_evicted(&kept).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn duplicate_put_writes_once() {
        let disk = InMemoryBackend::new();
        let store = LogDocumentStore::open(Box::new(disk.share()), false).unwrap();
        store.put_document(&doc(1)).unwrap();
        let size = disk.data().len();
        store.put_document(&doc(1)).unwrap();
        assert_eq!(disk.data().len(), size);
    }

    #[test]
    fn torn_tail_is_truncated() {
        let disk = InMemoryBackend::new();
        let hash = {
            let store = LogDocumentStore::open(Box::new(disk.share()), true).unwrap();
            let hash = store.put_document(&doc(1)).unwrap();
            store.put_document(&doc(2)).unwrap();
            hash
        };
        let full = disk.data();
        let mut writer = disk.share();
        writer.truncate(full.len() as u64 - 3).unwrap();

        let store = LogDocumentStore::open(Box::new(disk.share()), true).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&hash).unwrap(), Some(doc(1)));
        // the partial second record is gone from disk too
        assert!(disk.data().len() < full.len() - 3);
    }

    #[test]
    fn flipped_bit_is_a_checksum_failure() {
        let disk = InMemoryBackend::new();
        {
            let store = LogDocumentStore::open(Box::new(disk.share()), true).unwrap();
            store.put_document(&doc(1)).unwrap();
        }
        disk.corrupt_byte(HEADER_LEN + 2);
        assert!(matches!(
            LogDocumentStore::open(Box::new(disk), true),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn damaged_length_is_not_mistaken_for_a_torn_tail() {
        let disk = InMemoryBackend::new();
        {
            let store = LogDocumentStore::open(Box::new(disk.share()), true).unwrap();
            store.put_document(&doc(1)).unwrap();
            store.put_document(&doc(2)).unwrap();
        }
        let before = disk.data();
        // high byte of the first record's body length
        disk.corrupt_byte(HEADER_FIELDS - 1);

        assert!(matches!(
            LogDocumentStore::open(Box::new(disk.share()), true),
            Err(CoreError::DocumentCorruption { .. })
        ));
        assert_eq!(disk.data().len(), before.len());
    }

    #[test]
    fn evicted_bodies_are_overwritten() {
        let secret = Document::new().with("ssn", "123-45-6789");
        let disk = InMemoryBackend::new();
        let (hash, kept) = {
            let store = LogDocumentStore::open(Box::new(disk.share()), true).unwrap();
            let hash = store.put_document(&secret).unwrap();
            let kept = store.put_document(&doc(1)).unwrap();
            assert!(contains(&disk.data(), b"123-45-6789"));

            assert!(store.evict(&hash).unwrap());
            assert!(!contains(&disk.data(), b"123-45-6789"));
            (hash, kept)
        };

        let store = LogDocumentStore::open(Box::new(disk.share()), true).unwrap();
        assert!(store.is_evicted(&hash).unwrap());
        assert_eq!(store.get(&hash).unwrap(), None);
        assert_eq!(store.get(&kept).unwrap(), Some(doc(1)));

        // a later put of the same body is live again
        store.put_document(&secret).unwrap();
        drop(store);
        let store = LogDocumentStore::open(Box::new(disk), true).unwrap();
        assert_eq!(store.get(&hash).unwrap(), Some(secret));
        assert!(!store.is_evicted(&hash).unwrap());
    }

    fn contains(haystack: &[u8], needle: &[u8]) -> bool {
        haystack.windows(needle.len()).any(|w| w == needle)
    }
}
