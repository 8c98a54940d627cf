//! Content document fragments.

use crate::error::{ProtocolError, ProtocolResult};
use crate::hash::ContentHash;
use crate::id::EntityUuid;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Coarse classification of an exported object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CdfType {
    /// A content entity (nodes, media, taxonomy terms, ...).
    ContentEntity,
    /// A configuration entity (bundles, field definitions, ...).
    ConfigEntity,
    /// An origin descriptor for a publishing or subscribing site.
    Client,
}

impl CdfType {
    /// Returns the wire name of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            CdfType::ContentEntity => "content_entity",
            CdfType::ConfigEntity => "config_entity",
            CdfType::Client => "client",
        }
    }
}

/// A typed, language-keyed attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CdfAttribute {
    /// Attribute type name (`string`, `boolean`, `array<string>`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Values keyed by language code.
    #[serde(default)]
    pub value: BTreeMap<String, Value>,
}

impl CdfAttribute {
    /// Creates an attribute with a single value in language `lang`.
    pub fn new(kind: impl Into<String>, lang: impl Into<String>, value: Value) -> Self {
        let mut values = BTreeMap::new();
        values.insert(lang.into(), value);
        Self {
            kind: kind.into(),
            value: values,
        }
    }

    /// Returns the value for a language, if present.
    #[must_use]
    pub fn value_for(&self, lang: &str) -> Option<&Value> {
        self.value.get(lang)
    }
}

/// The direct edges of an entity in the dependency graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dependencies {
    /// Referenced entities and the content hash the publisher saw for each.
    #[serde(default)]
    pub entity: BTreeMap<EntityUuid, ContentHash>,
    /// Extensions the subscriber must provide to materialize the entity.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub module: Vec<String>,
}

/// Free-form metadata carried by a CDF.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CdfMetadata {
    /// Dependency edges.
    #[serde(default)]
    pub dependencies: Dependencies,
    /// Embedding-system entity type id (`node`, `media`, `taxonomy_term`, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Default language code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_language: Option<String>,
    /// Translations carried by the CDF.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    /// The entity's own content hash as reported by its publisher.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<ContentHash>,
    /// Entity-specific fields this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A single exported entity plus its dependency edges.
///
/// # Invariants
///
/// - `metadata.dependencies.entity` never contains `uuid` itself
/// - Dependency hashes are used for change detection only
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cdf {
    /// Identity of the entity.
    pub uuid: EntityUuid,
    /// Coarse classification.
    #[serde(rename = "type")]
    pub cdf_type: CdfType,
    /// Site that authored the entity.
    pub origin: EntityUuid,
    /// Creation timestamp (RFC 3339).
    #[serde(default)]
    pub created: String,
    /// Last modification timestamp (RFC 3339).
    #[serde(default)]
    pub modified: String,
    /// Attribute name to typed, language-keyed value.
    #[serde(default)]
    pub attributes: BTreeMap<String, CdfAttribute>,
    /// Metadata, including dependency edges.
    #[serde(default)]
    pub metadata: CdfMetadata,
}

impl Cdf {
    /// Creates an empty CDF.
    pub fn new(uuid: EntityUuid, cdf_type: CdfType, origin: EntityUuid) -> Self {
        Self {
            uuid,
            cdf_type,
            origin,
            created: String::new(),
            modified: String::new(),
            attributes: BTreeMap::new(),
            metadata: CdfMetadata::default(),
        }
    }

    /// Sets the embedding-system entity type id.
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.metadata.entity_type = Some(entity_type.into());
        self
    }

    /// Sets the created and modified timestamps.
    #[must_use]
    pub fn with_timestamps(mut self, created: impl Into<String>, modified: impl Into<String>) -> Self {
        self.created = created.into();
        self.modified = modified.into();
        self
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, name: impl Into<String>, attribute: CdfAttribute) -> Self {
        self.attributes.insert(name.into(), attribute);
        self
    }

    /// Sets the publisher-reported content hash.
    #[must_use]
    pub fn with_hash(mut self, hash: ContentHash) -> Self {
        self.metadata.hash = Some(hash);
        self
    }

    /// Adds a dependency edge.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::SelfDependency`] if `dependency` is this
    /// entity's own uuid.
    pub fn with_dependency(
        mut self,
        dependency: EntityUuid,
        hash: ContentHash,
    ) -> ProtocolResult<Self> {
        if dependency == self.uuid {
            return Err(ProtocolError::SelfDependency(self.uuid));
        }
        self.metadata.dependencies.entity.insert(dependency, hash);
        Ok(self)
    }

    /// Returns the dependency edges.
    #[must_use]
    pub fn dependencies(&self) -> &BTreeMap<EntityUuid, ContentHash> {
        &self.metadata.dependencies.entity
    }

    /// Returns the uuids this entity depends on.
    pub fn dependency_uuids(&self) -> impl Iterator<Item = &EntityUuid> {
        self.metadata.dependencies.entity.keys()
    }

    /// Returns the embedding-system entity type id, if the publisher sent one.
    #[must_use]
    pub fn entity_type(&self) -> Option<&str> {
        self.metadata.entity_type.as_deref()
    }

    /// Returns the entity's current content hash.
    ///
    /// This is the publisher-reported `metadata.hash` when present, otherwise
    /// the SHA-256 of the canonical JSON form of the attributes. Ledgers and
    /// dependency maps use the same scheme, so the two are comparable.
    #[must_use]
    pub fn content_hash(&self) -> ContentHash {
        if let Some(hash) = &self.metadata.hash {
            return hash.clone();
        }
        // BTreeMap keys serialize in sorted order, so this is canonical.
        let bytes = serde_json::to_vec(&self.attributes).unwrap_or_default();
        ContentHash::compute(&bytes)
    }

    /// Checks the structural invariants of the CDF.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::SelfDependency`] if the entity depends on itself.
    pub fn check(&self) -> ProtocolResult<()> {
        if self.metadata.dependencies.entity.contains_key(&self.uuid) {
            return Err(ProtocolError::SelfDependency(self.uuid));
        }
        Ok(())
    }
}
