//! Byte store underneath the ledger.

use crate::error::TrackerResult;

/// An append-only byte store holding ledger frames.
///
/// Backends know nothing about frames or records. The ledger owns the
/// format; a backend only stores bytes and reports its size.
///
/// # Invariants
///
/// - `append` returns the offset the bytes were written at
/// - `read_at` returns exactly the bytes previously written there
/// - After `sync` returns, appended bytes survive process termination
pub trait LedgerBackend: Send + Sync {
    /// Reads `len` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::TrackerError::ReadPastEnd`] if the range is not fully
    /// inside the store, or an I/O error.
    fn read_at(&self, offset: u64, len: usize) -> TrackerResult<Vec<u8>>;

    /// Appends bytes, returning the offset they were written at.
    ///
    /// # Errors
    ///
    /// Returns an error if an I/O error occurs.
    fn append(&mut self, data: &[u8]) -> TrackerResult<u64>;

    /// Returns the current size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the size cannot be determined.
    fn size(&self) -> TrackerResult<u64>;

    /// Makes all appended bytes durable.
    ///
    /// # Errors
    ///
    /// Returns an error if the sync fails.
    fn sync(&mut self) -> TrackerResult<()>;

    /// Drops every byte at or after `new_size`.
    ///
    /// Used to cut a torn tail and to roll back a frame whose sync failed.
    ///
    /// # Errors
    ///
    /// Returns an error if `new_size` is larger than the current size or the
    /// truncation fails.
    fn truncate(&mut self, new_size: u64) -> TrackerResult<()>;

    /// Replaces the whole store with `data` and makes it durable.
    ///
    /// Readers observe either the old bytes or the new ones. When this
    /// fails, the old bytes are still in place.
    ///
    /// # Errors
    ///
    /// Returns an error if the new contents cannot be written or swapped in.
    fn replace(&mut self, data: &[u8]) -> TrackerResult<()>;
}
