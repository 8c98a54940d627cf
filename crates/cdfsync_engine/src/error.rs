//! Error types for the import engine.

use cdfsync_protocol::{EntityUuid, ProtocolError};
use cdfsync_tracker::TrackerError;
use std::collections::BTreeSet;
use thiserror::Error;

/// Result type for import operations.
pub type ImportResult<T> = Result<T, ImportError>;

/// Coarse classification of an [`ImportError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A uuid failed format validation.
    InvalidIdentifier,
    /// The hub could not supply every required entity.
    IncompleteClosure,
    /// Stub creation could not break a dependency cycle.
    CircularResolutionStalled,
    /// Network failure talking to the hub or an origin.
    Transport,
    /// Malformed hub data.
    Protocol,
    /// The import ledger failed.
    Tracker,
    /// The entity materializer failed.
    Materializer,
    /// A uuid was registered twice in one dependency stack.
    StackConflict,
}

/// Errors that can occur during an import.
#[derive(Error, Debug)]
pub enum ImportError {
    /// A seed or dependency uuid is not a valid uuid.
    #[error("invalid identifier: {uuid:?}")]
    InvalidIdentifier {
        /// The offending input.
        uuid: String,
    },

    /// The hub cannot supply one or more required entities.
    #[error("incomplete closure: {message}")]
    IncompleteClosure {
        /// Uuids the hub could not produce.
        missing_uuids: BTreeSet<EntityUuid>,
        /// Operator-facing description.
        message: String,
    },

    /// Stub creation made no progress within the pass budget.
    #[error("circular resolution stalled after {passes} passes with {} unprocessed entities", .unprocessed.len())]
    CircularResolutionStalled {
        /// Entities that never materialized.
        unprocessed: BTreeSet<EntityUuid>,
        /// Materialize passes attempted.
        passes: u32,
    },

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Malformed hub data.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Ledger error.
    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    /// The materializer failed outright.
    #[error("materializer error: {0}")]
    Materializer(String),

    /// A uuid already resolved in this pass was registered again.
    #[error("entity {uuid} is already resolved in this import")]
    StackConflict {
        /// The duplicated uuid.
        uuid: EntityUuid,
    },
}

impl ImportError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns the kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ImportError::InvalidIdentifier { .. } => ErrorKind::InvalidIdentifier,
            ImportError::IncompleteClosure { .. } => ErrorKind::IncompleteClosure,
            ImportError::CircularResolutionStalled { .. } => ErrorKind::CircularResolutionStalled,
            ImportError::Transport { .. } => ErrorKind::Transport,
            ImportError::Protocol(_) => ErrorKind::Protocol,
            ImportError::Tracker(_) => ErrorKind::Tracker,
            ImportError::Materializer(_) => ErrorKind::Materializer,
            ImportError::StackConflict { .. } => ErrorKind::StackConflict,
        }
    }

    /// Returns true if retrying the same import later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            ImportError::IncompleteClosure { .. } => true,
            ImportError::Transport { retryable, .. } => *retryable,
            ImportError::Tracker(TrackerError::Io(_)) => true,
            _ => false,
        }
    }

    /// Returns the uuids this error names, for operator visibility.
    pub fn uuids(&self) -> Vec<EntityUuid> {
        match self {
            ImportError::IncompleteClosure { missing_uuids, .. } => {
                missing_uuids.iter().copied().collect()
            }
            ImportError::CircularResolutionStalled { unprocessed, .. } => {
                unprocessed.iter().copied().collect()
            }
            ImportError::StackConflict { uuid } => vec![*uuid],
            _ => Vec::new(),
        }
    }
}
