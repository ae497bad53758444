//! In-memory backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A byte store held in memory.
///
/// Handles created with [`share`](Self::share) see the same bytes, which
/// lets a test drop a node and reopen another one over the same "disk".
///
/// ```rust
/// use chronodb_storage::{InMemoryBackend, StorageBackend};
///
/// let mut first = InMemoryBackend::new();
/// let second = first.share();
/// first.append(b"abc").unwrap();
/// assert_eq!(second.size().unwrap(), 3);
/// ```
#[derive(Debug, Default)]
pub struct InMemoryBackend {
    bytes: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store preloaded with `bytes`.
    #[must_use]
    pub fn with_data(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(RwLock::new(bytes)),
        }
    }

    /// Returns another handle over the same bytes.
    #[must_use]
    pub fn share(&self) -> Self {
        Self {
            bytes: Arc::clone(&self.bytes),
        }
    }

    /// Copies out the current contents.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.bytes.read().clone()
    }

    /// Overwrites one byte in place. Used to simulate media corruption.
    pub fn corrupt_byte(&self, offset: usize) {
        let mut bytes = self.bytes.write();
        if let Some(byte) = bytes.get_mut(offset) {
            *byte ^= 0xFF;
        }
    }
}

impl StorageBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let bytes = self.bytes.read();
        let size = bytes.len() as u64;
        let start = usize::try_from(offset).map_err(|_| StorageError::ReadPastEnd {
            offset,
            len,
            size,
        })?;
        match start.checked_add(len) {
            Some(end) if end <= bytes.len() => Ok(bytes[start..end].to_vec()),
            _ => Err(StorageError::ReadPastEnd { offset, len, size }),
        }
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let mut bytes = self.bytes.write();
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(data);
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let mut bytes = self.bytes.write();
        let size = bytes.len() as u64;
        let len = data.len();
        let start = usize::try_from(offset).map_err(|_| StorageError::WritePastEnd { offset, len, size })?;
        match start.checked_add(len) {
            Some(end) if end <= bytes.len() => {
                bytes[start..end].copy_from_slice(data);
                Ok(())
            }
            _ => Err(StorageError::WritePastEnd { offset, len, size }),
        }
    }

    fn flush(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.bytes.read().len() as u64)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let mut bytes = self.bytes.write();
        let size = bytes.len() as u64;
        if new_size > size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size,
            });
        }
        // new_size <= len, so the cast cannot truncate
        bytes.truncate(new_size as usize);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn offsets_follow_appends() {
        let mut backend = InMemoryBackend::new();
        assert!(backend.is_empty().unwrap());
        assert_eq!(backend.append(b"tx").unwrap(), 0);
        assert_eq!(backend.append(b"-log").unwrap(), 2);
        assert_eq!(backend.size().unwrap(), 6);
        assert_eq!(backend.read_at(2, 4).unwrap(), b"-log");
    }

    #[test]
    fn read_past_end_is_rejected() {
        let mut backend = InMemoryBackend::new();
        backend.append(b"abc").unwrap();
        assert!(matches!(
            backend.read_at(2, 5),
            Err(StorageError::ReadPastEnd { size: 3, .. })
        ));
        assert!(matches!(
            backend.read_at(9, 0),
            Err(StorageError::ReadPastEnd { .. })
        ));
        assert!(backend.read_at(3, 0).unwrap().is_empty());
    }

    #[test]
    fn shared_handles_see_the_same_bytes() {
        let mut writer = InMemoryBackend::new();
        let reader = writer.share();
        writer.append(b"shared").unwrap();
        assert_eq!(reader.read_from(0).unwrap(), b"shared");
        writer.truncate(3).unwrap();
        assert_eq!(reader.data(), b"sha");
    }

    #[test]
    fn truncate_cannot_grow() {
        let mut backend = InMemoryBackend::with_data(b"abc".to_vec());
        assert!(matches!(
            backend.truncate(10),
            Err(StorageError::InvalidTruncate {
                requested: 10,
                size: 3
            })
        ));
    }

    #[test]
    fn write_at_overwrites_in_place() {
        let mut backend = InMemoryBackend::with_data(b"secret-tail".to_vec());
        backend.write_at(0, &[0; 6]).unwrap();
        assert_eq!(backend.data(), b"\0\0\0\0\0\0-tail");
        assert!(matches!(
            backend.write_at(8, b"grow"),
            Err(StorageError::WritePastEnd { size: 11, .. })
        ));
        assert_eq!(backend.size().unwrap(), 11);
    }

    #[test]
    fn corrupt_byte_flips_bits() {
        let backend = InMemoryBackend::with_data(vec![0x00, 0x0F]);
        backend.corrupt_byte(1);
        assert_eq!(backend.data(), vec![0x00, 0xF0]);
        backend.corrupt_byte(99);
        assert_eq!(backend.data().len(), 2);
    }

    proptest! {
        #[test]
        fn every_chunk_reads_back_at_its_offset(
            chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 1..16)
        ) {
            let mut backend = InMemoryBackend::new();
            let mut placed = Vec::new();
            for chunk in &chunks {
                placed.push((backend.append(chunk).unwrap(), chunk.clone()));
            }
            for (offset, chunk) in placed {
                prop_assert_eq!(backend.read_at(offset, chunk.len()).unwrap(), chunk);
            }
        }
    }
}
