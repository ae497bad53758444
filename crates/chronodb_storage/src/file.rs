//! Single-file backend.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

struct Inner {
    file: File,
    size: u64,
}

/// A byte store backed by one OS file.
///
/// `flush` pushes buffered data to the OS; `sync` calls `sync_all`.
///
/// ```no_run
/// use chronodb_storage::{FileBackend, StorageBackend};
/// use std::path::Path;
///
/// let mut backend = FileBackend::open(Path::new("tx.log")).unwrap();
/// backend.append(b"record").unwrap();
/// backend.sync().unwrap();
/// ```
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<Inner>,
}

impl FileBackend {
    /// Opens `path`, creating the file if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened or created.
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with(path, true)
    }

    /// Opens `path` only if it already exists.
    ///
    /// # Errors
    ///
    /// Returns an I/O `NotFound` error if the file is missing.
    pub fn open_existing(path: &Path) -> StorageResult<Self> {
        Self::open_with(path, false)
    }

    /// Opens `path`, creating it and any missing parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory or the file cannot be created.
    pub fn open_with_create_dirs(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Self::open(path)
    }

    fn open_with(path: &Path, create: bool) -> StorageResult<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(create)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();
        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(Inner { file, size }),
        })
    }

    /// Path of the underlying file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for FileBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileBackend")
            .field("path", &self.path)
            .field("size", &self.inner.lock().size)
            .finish()
    }
}

impl StorageBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        let mut inner = self.inner.lock();
        let size = inner.size;
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => {}
            _ => return Err(StorageError::ReadPastEnd { offset, len, size }),
        }
        let mut buffer = vec![0u8; len];
        if len > 0 {
            inner.file.seek(SeekFrom::Start(offset))?;
            inner.file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        let inner = self.inner.get_mut();
        let offset = inner.size;
        if !data.is_empty() {
            inner.file.seek(SeekFrom::Start(offset))?;
            inner.file.write_all(data)?;
            inner.size += data.len() as u64;
        }
        Ok(offset)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        let size = inner.size;
        let len = data.len();
        match offset.checked_add(len as u64) {
            Some(end) if end <= size => {}
            _ => return Err(StorageError::WritePastEnd { offset, len, size }),
        }
        if len > 0 {
            inner.file.seek(SeekFrom::Start(offset))?;
            inner.file.write_all(data)?;
        }
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.flush()?;
        Ok(())
    }

    fn sync(&mut self) -> StorageResult<()> {
        self.inner.get_mut().file.sync_all()?;
        Ok(())
    }

    fn size(&self) -> StorageResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        let inner = self.inner.get_mut();
        if new_size > inner.size {
            return Err(StorageError::InvalidTruncate {
                requested: new_size,
                size: inner.size,
            });
        }
        inner.file.set_len(new_size)?;
        inner.file.sync_all()?;
        inner.size = new_size;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_missing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tx.log");
        let backend = FileBackend::open(&path).unwrap();
        assert!(path.exists());
        assert!(backend.is_empty().unwrap());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn open_existing_requires_file() {
        let dir = tempdir().unwrap();
        let result = FileBackend::open_existing(&dir.path().join("absent.log"));
        assert!(matches!(result, Err(StorageError::Io(_))));
    }

    #[test]
    fn appended_bytes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tx.log");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            assert_eq!(backend.append(b"first").unwrap(), 0);
            assert_eq!(backend.append(b"second").unwrap(), 5);
            backend.sync().unwrap();
        }
        let backend = FileBackend::open_existing(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 11);
        assert_eq!(backend.read_at(5, 6).unwrap(), b"second");
        assert_eq!(backend.read_from(0).unwrap(), b"firstsecond");
    }

    #[test]
    fn truncate_drops_tail_and_next_append_follows() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("tx.log")).unwrap();
        backend.append(b"keep-torn").unwrap();
        backend.truncate(4).unwrap();
        assert_eq!(backend.append(b"!").unwrap(), 4);
        assert_eq!(backend.read_from(0).unwrap(), b"keep!");
        assert!(matches!(
            backend.truncate(64),
            Err(StorageError::InvalidTruncate { .. })
        ));
    }

    #[test]
    fn overwritten_bytes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("docs.bin");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"keep-secret").unwrap();
            backend.write_at(5, b"XXXXXX").unwrap();
            assert!(matches!(
                backend.write_at(9, b"grow"),
                Err(StorageError::WritePastEnd { .. })
            ));
            backend.sync().unwrap();
        }
        let backend = FileBackend::open_existing(&path).unwrap();
        assert_eq!(backend.read_from(0).unwrap(), b"keep-XXXXXX");
    }

    #[test]
    fn nested_directories_are_created() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("node").join("docs").join("store.bin");
        FileBackend::open_with_create_dirs(&path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn read_past_end_is_rejected() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("tx.log")).unwrap();
        backend.append(b"abc").unwrap();
        assert!(matches!(
            backend.read_at(1, 3),
            Err(StorageError::ReadPastEnd { .. })
        ));
    }
}
