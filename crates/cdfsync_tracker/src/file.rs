//! File-backed ledger storage.

use crate::backend::LedgerBackend;
use crate::error::{TrackerError, TrackerResult};
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// A ledger file on local disk.
///
/// Writes go to the end of the file; `sync` calls `File::sync_all`.
/// `replace` writes a sibling staging file and renames it over the ledger.
/// No file lock is taken: concurrent workers on disjoint uuid sets are expected to
/// share one ledger through last-write-wins upserts.
#[derive(Debug)]
pub struct FileBackend {
    path: PathBuf,
    inner: Mutex<FileState>,
}

#[derive(Debug)]
struct FileState {
    file: File,
    size: u64,
}

impl FileBackend {
    /// Opens or creates the ledger file at `path`, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the directories or file cannot be created.
    pub fn open(path: &Path) -> TrackerResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        // A staging file left behind never replaced the ledger.
        let staging = staging_path(path);
        if staging.exists() {
            warn!(path = %staging.display(), "Removing unfinished compaction file");
            std::fs::remove_file(&staging)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let size = file.metadata()?.len();

        Ok(Self {
            path: path.to_path_buf(),
            inner: Mutex::new(FileState { file, size }),
        })
    }

    /// Returns the ledger file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_staging(&self, staging: &Path, data: &[u8]) -> io::Result<()> {
        let mut file = File::create(staging)?;
        file.write_all(data)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(staging, &self.path)?;
        sync_parent_dir(&self.path)
    }
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".compact");
    PathBuf::from(name)
}

#[cfg(unix)]
fn sync_parent_dir(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => File::open(".")?.sync_all(),
    }
}

// NTFS journals the rename.
#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) -> io::Result<()> {
    Ok(())
}

impl LedgerBackend for FileBackend {
    fn read_at(&self, offset: u64, len: usize) -> TrackerResult<Vec<u8>> {
        let mut state = self.inner.lock();
        let size = state.size;
        if offset.saturating_add(len as u64) > size {
            return Err(TrackerError::ReadPastEnd { offset, len, size });
        }
        let mut buffer = vec![0u8; len];
        if len > 0 {
            state.file.seek(SeekFrom::Start(offset))?;
            state.file.read_exact(&mut buffer)?;
        }
        Ok(buffer)
    }

    fn append(&mut self, data: &[u8]) -> TrackerResult<u64> {
        let state = self.inner.get_mut();
        let offset = state.size;
        if !data.is_empty() {
            state.file.seek(SeekFrom::End(0))?;
            state.file.write_all(data)?;
            state.size += data.len() as u64;
        }
        Ok(offset)
    }

    fn size(&self) -> TrackerResult<u64> {
        Ok(self.inner.lock().size)
    }

    fn sync(&mut self) -> TrackerResult<()> {
        let state = self.inner.get_mut();
        state.file.flush()?;
        state.file.sync_all()?;
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> TrackerResult<()> {
        let state = self.inner.get_mut();
        if new_size > state.size {
            return Err(TrackerError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate ledger to {new_size} bytes, it holds {}",
                    state.size
                ),
            )));
        }
        state.file.set_len(new_size)?;
        state.file.sync_all()?;
        state.size = new_size;
        Ok(())
    }

    fn replace(&mut self, data: &[u8]) -> TrackerResult<()> {
        let staging = staging_path(&self.path);
        if let Err(e) = self.write_staging(&staging, data) {
            let _ = std::fs::remove_file(&staging);
            return Err(e.into());
        }
        let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let state = self.inner.get_mut();
        state.file = file;
        state.size = data.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn append_read_and_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.log");

        {
            let mut backend = FileBackend::open(&path).unwrap();
            assert_eq!(backend.append(b"abc").unwrap(), 0);
            assert_eq!(backend.append(b"def").unwrap(), 3);
            backend.sync().unwrap();
        }

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.size().unwrap(), 6);
        assert_eq!(backend.read_at(2, 3).unwrap(), b"cde");
    }

    #[test]
    fn read_past_end_fails() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("l.log")).unwrap();
        backend.append(b"abc").unwrap();

        assert!(matches!(
            backend.read_at(2, 5),
            Err(TrackerError::ReadPastEnd { size: 3, .. })
        ));
    }

    #[test]
    fn creates_parent_dirs() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("ledger.log");

        let backend = FileBackend::open(&path).unwrap();
        assert!(path.exists());
        assert_eq!(backend.path(), path);
    }

    #[test]
    fn truncate_shrinks_only() {
        let dir = tempdir().unwrap();
        let mut backend = FileBackend::open(&dir.path().join("l.log")).unwrap();
        backend.append(b"hello world").unwrap();

        backend.truncate(5).unwrap();
        assert_eq!(backend.size().unwrap(), 5);
        assert!(backend.truncate(50).is_err());
    }

    #[test]
    fn replace_swaps_whole_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("l.log");
        let mut backend = FileBackend::open(&path).unwrap();
        backend.append(b"a long superseded log").unwrap();

        backend.replace(b"short").unwrap();
        assert_eq!(backend.size().unwrap(), 5);
        backend.append(b"!").unwrap();
        assert_eq!(backend.read_at(0, 6).unwrap(), b"short!");
        assert!(!staging_path(&path).exists());

        drop(backend);
        assert_eq!(std::fs::read(&path).unwrap(), b"short!");
    }

    #[test]
    fn unfinished_staging_file_leaves_ledger_intact() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("l.log");
        {
            let mut backend = FileBackend::open(&path).unwrap();
            backend.append(b"original").unwrap();
            backend.sync().unwrap();
        }
        // Crash after writing part of the staging file, before the rename.
        std::fs::write(staging_path(&path), b"orig").unwrap();

        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.read_at(0, 8).unwrap(), b"original");
        assert!(!staging_path(&path).exists());
    }
}
