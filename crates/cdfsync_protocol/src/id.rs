//! Entity identifier.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Length of the canonical hyphenated form (`8-4-4-4-12`).
const HYPHENATED_LEN: usize = 36;

/// Globally unique identity of an entity across all sites.
///
/// Entity uuids are:
/// - Assigned by the authoring site and never change
/// - Exchanged as canonical hyphenated strings
/// - Format-checked before any network call uses them
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityUuid(Uuid);

impl EntityUuid {
    /// Parses a canonical hyphenated uuid.
    ///
    /// Braced, urn and simple (unhyphenated) forms are rejected; hubs and
    /// ledgers only ever exchange the hyphenated form.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidUuid`] carrying the offending input.
    pub fn parse(input: &str) -> ProtocolResult<Self> {
        if input.len() != HYPHENATED_LEN {
            return Err(ProtocolError::InvalidUuid(input.to_string()));
        }
        Uuid::try_parse(input)
            .map(Self)
            .map_err(|_| ProtocolError::InvalidUuid(input.to_string()))
    }

    /// Creates a new random (v4) entity uuid.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an entity uuid from a UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates an entity uuid from its raw bytes.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Debug for EntityUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityUuid({})", self.0.hyphenated())
    }
}

impl fmt::Display for EntityUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for EntityUuid {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityUuid {
    type Error = ProtocolError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<EntityUuid> for String {
    fn from(id: EntityUuid) -> Self {
        id.to_string()
    }
}

impl From<Uuid> for EntityUuid {
    fn from(uuid: Uuid) -> Self {
        Self::from_uuid(uuid)
    }
}
