//! CLI command implementations.

pub mod admin;
pub mod compact;
pub mod inspect;
pub mod verify;

use std::path::Path;

/// Fails unless a ledger file exists at `path`.
///
/// Opening a [`cdfsync_tracker::FileBackend`] creates missing files.
pub fn require_ledger(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.is_file() {
        Ok(())
    } else {
        Err(format!("No ledger found at {:?}", path).into())
    }
}
