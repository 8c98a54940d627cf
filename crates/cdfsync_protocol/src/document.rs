//! In-memory sets of CDFs.

use crate::cdf::Cdf;
use crate::error::ProtocolResult;
use crate::hash::ContentHash;
use crate::id::EntityUuid;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A set of CDFs keyed by uuid.
///
/// # Invariants
///
/// - Never holds two CDFs with the same uuid; a merge overwrites duplicates
/// - Iteration order is by uuid, so encoding is deterministic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CdfDocument {
    entities: BTreeMap<EntityUuid, Cdf>,
}

/// Wire shape of a document: `{"entities": [...]}`.
#[derive(Serialize, Deserialize)]
struct WireDocument {
    #[serde(default)]
    entities: Vec<Cdf>,
}

impl CdfDocument {
    /// Creates an empty document.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a document from a list of CDFs; later duplicates win.
    pub fn from_entities(entities: impl IntoIterator<Item = Cdf>) -> Self {
        let mut document = Self::new();
        for cdf in entities {
            document.insert(cdf);
        }
        document
    }

    /// Inserts a CDF, returning the one it replaced.
    pub fn insert(&mut self, cdf: Cdf) -> Option<Cdf> {
        self.entities.insert(cdf.uuid, cdf)
    }

    /// Merges `other` into this document, overwriting duplicates.
    pub fn merge(&mut self, other: CdfDocument) {
        self.entities.extend(other.entities);
    }

    /// Removes a CDF.
    pub fn remove(&mut self, uuid: &EntityUuid) -> Option<Cdf> {
        self.entities.remove(uuid)
    }

    /// Returns the CDF for `uuid`.
    #[must_use]
    pub fn get(&self, uuid: &EntityUuid) -> Option<&Cdf> {
        self.entities.get(uuid)
    }

    /// Returns true if the document holds `uuid`.
    #[must_use]
    pub fn contains(&self, uuid: &EntityUuid) -> bool {
        self.entities.contains_key(uuid)
    }

    /// Returns the number of CDFs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns true if the document is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Returns the set of uuids in the document.
    #[must_use]
    pub fn uuids(&self) -> BTreeSet<EntityUuid> {
        self.entities.keys().copied().collect()
    }

    /// Iterates over the CDFs in uuid order.
    pub fn entities(&self) -> impl Iterator<Item = &Cdf> {
        self.entities.values()
    }

    /// Consumes the document, returning its CDFs in uuid order.
    #[must_use]
    pub fn into_entities(self) -> Vec<Cdf> {
        self.entities.into_values().collect()
    }

    /// Iterates over every dependency edge as `(owner, dependency, hash)`.
    pub fn dependency_edges(
        &self,
    ) -> impl Iterator<Item = (&EntityUuid, &EntityUuid, &ContentHash)> {
        self.entities.values().flat_map(|cdf| {
            cdf.dependencies()
                .iter()
                .map(move |(dependency, hash)| (&cdf.uuid, dependency, hash))
        })
    }

    /// Returns dependency targets not present in the document, with the hash
    /// the referencing entity reported for them.
    ///
    /// When several owners report different hashes for one target, the
    /// first owner in uuid order wins.
    #[must_use]
    pub fn external_dependencies(&self) -> BTreeMap<EntityUuid, ContentHash> {
        let mut external = BTreeMap::new();
        for (_, dependency, hash) in self.dependency_edges() {
            if !self.contains(dependency) {
                external
                    .entry(*dependency)
                    .or_insert_with(|| hash.clone());
            }
        }
        external
    }

    /// Returns a new document holding only the CDFs matching `predicate`.
    #[must_use]
    pub fn filtered(&self, predicate: impl Fn(&Cdf) -> bool) -> CdfDocument {
        Self::from_entities(self.entities.values().filter(|cdf| predicate(cdf)).cloned())
    }

    /// Encodes the document as hub JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        let wire = WireDocument {
            entities: self.entities.values().cloned().collect(),
        };
        Ok(serde_json::to_vec(&wire)?)
    }

    /// Decodes a document from hub JSON, checking every CDF.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed, a uuid is invalid, or a CDF
    /// depends on itself.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        let wire: WireDocument = serde_json::from_slice(bytes)?;
        for cdf in &wire.entities {
            cdf.check()?;
        }
        Ok(Self::from_entities(wire.entities))
    }
}

impl FromIterator<Cdf> for CdfDocument {
    fn from_iter<I: IntoIterator<Item = Cdf>>(iter: I) -> Self {
        Self::from_entities(iter)
    }
}
