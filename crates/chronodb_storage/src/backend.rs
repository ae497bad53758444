//! The [`StorageBackend`] trait.

use crate::error::{StorageError, StorageResult};

/// An append-only byte store.
///
/// # Contract
///
/// - `append` writes at the current end and returns that offset
/// - `read_at` returns exactly the bytes written at that range
/// - after `flush` returns, appended bytes survive process exit
/// - `truncate` only ever shrinks; it exists so recovery can drop a torn
///   trailing record
/// - `write_at` only overwrites bytes that already exist; it never grows
///   the store
///
/// Mutation takes `&mut self`; callers serialize writers themselves
/// (typically behind a `parking_lot::Mutex`).
pub trait StorageBackend: Send + Sync {
    /// Reads `len` bytes at `offset`.
    ///
    /// # Errors
    ///
    /// [`StorageError::ReadPastEnd`] when the range is not fully inside the
    /// store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>>;

    /// Appends `data` and returns the offset it was written at.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn append(&mut self, data: &[u8]) -> StorageResult<u64>;

    /// Overwrites `data.len()` existing bytes at `offset`.
    ///
    /// # Errors
    ///
    /// [`StorageError::WritePastEnd`] when the range is not fully inside the
    /// store, or an I/O error.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()>;

    /// Pushes buffered writes to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    fn flush(&mut self) -> StorageResult<()>;

    /// Like [`flush`](Self::flush), but also makes metadata (file length)
    /// durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> StorageResult<()>;

    /// Current size in bytes; the offset of the next append.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> StorageResult<u64>;

    /// Shrinks the store to `new_size` bytes.
    ///
    /// # Errors
    ///
    /// [`StorageError::InvalidTruncate`] if `new_size` exceeds the current
    /// size, or an I/O error.
    fn truncate(&mut self, new_size: u64) -> StorageResult<()>;

    /// Returns `true` if nothing has been appended.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.size()? == 0)
    }

    /// Reads everything from `offset` to the current end.
    ///
    /// # Errors
    ///
    /// Returns an error if `offset` is past the end or the read fails.
    fn read_from(&self, offset: u64) -> StorageResult<Vec<u8>> {
        let size = self.size()?;
        if offset > size {
            return Err(StorageError::ReadPastEnd {
                offset,
                len: 0,
                size,
            });
        }
        let len = usize::try_from(size - offset).map_err(|_| StorageError::ReadPastEnd {
            offset,
            len: usize::MAX,
            size,
        })?;
        self.read_at(offset, len)
    }
}
