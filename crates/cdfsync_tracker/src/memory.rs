//! In-memory ledger storage.

use crate::backend::LedgerBackend;
use crate::error::{TrackerError, TrackerResult};
use parking_lot::RwLock;
use std::sync::Arc;

/// A ledger held in memory.
///
/// Clones share the same bytes, which lets tests reopen a ledger over the
/// "same file" or tamper with its tail.
#[derive(Debug, Default, Clone)]
pub struct InMemoryBackend {
    data: Arc<RwLock<Vec<u8>>>,
}

impl InMemoryBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a backend preloaded with `data`.
    #[must_use]
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(RwLock::new(data)),
        }
    }

    /// Returns a copy of the stored bytes.
    #[must_use]
    pub fn data(&self) -> Vec<u8> {
        self.data.read().clone()
    }
}

impl LedgerBackend for InMemoryBackend {
    fn read_at(&self, offset: u64, len: usize) -> TrackerResult<Vec<u8>> {
        let data = self.data.read();
        let size = data.len() as u64;
        if offset.saturating_add(len as u64) > size {
            return Err(TrackerError::ReadPastEnd { offset, len, size });
        }
        let start = offset as usize;
        Ok(data[start..start + len].to_vec())
    }

    fn append(&mut self, bytes: &[u8]) -> TrackerResult<u64> {
        let mut data = self.data.write();
        let offset = data.len() as u64;
        data.extend_from_slice(bytes);
        Ok(offset)
    }

    fn size(&self) -> TrackerResult<u64> {
        Ok(self.data.read().len() as u64)
    }

    fn sync(&mut self) -> TrackerResult<()> {
        Ok(())
    }

    fn truncate(&mut self, new_size: u64) -> TrackerResult<()> {
        let mut data = self.data.write();
        if new_size > data.len() as u64 {
            return Err(TrackerError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!(
                    "cannot truncate ledger to {new_size} bytes, it holds {}",
                    data.len()
                ),
            )));
        }
        data.truncate(new_size as usize);
        Ok(())
    }

    fn replace(&mut self, bytes: &[u8]) -> TrackerResult<()> {
        *self.data.write() = bytes.to_vec();
        Ok(())
    }
}
