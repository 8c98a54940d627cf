//! Error types for ledger operations.

use std::io;
use thiserror::Error;

/// Result type for ledger operations.
pub type TrackerResult<T> = Result<T, TrackerError>;

/// Errors that can occur while reading or writing the import ledger.
#[derive(Debug, Error)]
pub enum TrackerError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Attempted to read beyond the end of the ledger.
    #[error("read beyond end of ledger: offset {offset}, len {len}, size {size}")]
    ReadPastEnd {
        /// The requested read offset.
        offset: u64,
        /// The requested read length.
        len: usize,
        /// The current ledger size.
        size: u64,
    },

    /// A complete frame failed validation.
    #[error("ledger corrupted at offset {offset}: {reason}")]
    Corrupted {
        /// Offset of the bad frame.
        offset: u64,
        /// What was wrong with it.
        reason: String,
    },

    /// A record could not be encoded.
    #[error("record encoding failed: {0}")]
    Encode(String),

    /// A record payload could not be decoded.
    #[error("record decoding failed: {0}")]
    Decode(String),
}

impl TrackerError {
    /// Creates a corruption error.
    pub fn corrupted(offset: u64, reason: impl Into<String>) -> Self {
        Self::Corrupted {
            offset,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupted_display() {
        let err = TrackerError::corrupted(42, "crc mismatch");
        assert_eq!(
            err.to_string(),
            "ledger corrupted at offset 42: crc mismatch"
        );
    }
}
