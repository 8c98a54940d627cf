//! Error types for protocol operations.

use crate::id::EntityUuid;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while building or decoding protocol types.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A string is not a canonical hyphenated UUID.
    #[error("invalid uuid: {0:?}")]
    InvalidUuid(String),

    /// A CDF lists its own uuid in its dependency map.
    #[error("entity {0} lists itself as a dependency")]
    SelfDependency(EntityUuid),

    /// JSON encoding or decoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}
