//! Local object references.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Durable identity of a materialized object on this site.
///
/// The id is assigned by the embedding system at save time (an
/// auto-incremented key for content, a machine name for config).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LocalId {
    /// Embedding-system entity type id.
    pub entity_type: String,
    /// Local key within that type.
    pub id: String,
}

impl LocalId {
    /// Creates a local id.
    pub fn new(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

/// A local object that a remote uuid resolves to.
///
/// A stub is a placeholder holding identity fields only. It satisfies
/// forward references but must never be treated as imported content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "local", rename_all = "snake_case")]
pub enum LocalReference {
    /// A fully materialized object.
    Real(LocalId),
    /// A placeholder awaiting its real content.
    Stub(LocalId),
}

impl LocalReference {
    /// Returns the local id regardless of kind.
    #[must_use]
    pub fn local_id(&self) -> &LocalId {
        match self {
            LocalReference::Real(id) | LocalReference::Stub(id) => id,
        }
    }

    /// Returns true for stubs.
    #[must_use]
    pub fn is_stub(&self) -> bool {
        matches!(self, LocalReference::Stub(_))
    }
}
