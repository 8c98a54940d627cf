//! Content hashes.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Content-addressed hash of an entity's serialized form.
///
/// Hashes are used purely for change detection: two equal hashes mean the
/// entity has not changed since it was last imported. They carry no graph
/// structure.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContentHash(String);

impl ContentHash {
    /// Wraps a hash string reported by a publisher or hub.
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    /// Computes the lowercase hex SHA-256 of `bytes`.
    #[must_use]
    pub fn compute(bytes: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(bytes)))
    }

    /// Returns the hash as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.0)
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContentHash {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compute_known_value() {
        let hash = ContentHash::compute(b"abc");
        assert_eq!(
            hash.as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn equality_is_textual() {
        assert_eq!(ContentHash::new("h1"), ContentHash::from("h1"));
        assert_ne!(ContentHash::new("h1"), ContentHash::new("h2"));
    }
}
