//! Webhook descriptors and notification payloads.

use crate::cdf::{Cdf, CdfType};
use crate::error::ProtocolResult;
use crate::id::EntityUuid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A callback endpoint registered on the hub by a site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEndpoint {
    /// Webhook registration uuid.
    pub uuid: EntityUuid,
    /// The site (origin) that registered the webhook.
    pub client_uuid: EntityUuid,
    /// Absolute callback url.
    pub url: String,
}

/// The operation a webhook notification carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrudOperation {
    /// Entities were created or updated on the hub.
    Update,
    /// Entities were deleted from the hub.
    Delete,
    /// A subscriber asks the origin to re-export entities.
    Republish,
}

/// An entity as described in a webhook notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescriptor {
    /// Entity uuid.
    pub uuid: EntityUuid,
    /// Coarse classification of the entity.
    #[serde(rename = "type")]
    pub cdf_type: CdfType,
    /// Uuids the entity depends on.
    #[serde(default)]
    pub dependencies: Vec<EntityUuid>,
}

impl EntityDescriptor {
    /// Describes a CDF.
    #[must_use]
    pub fn from_cdf(cdf: &Cdf) -> Self {
        Self {
            uuid: cdf.uuid,
            cdf_type: cdf.cdf_type,
            dependencies: cdf.dependency_uuids().copied().collect(),
        }
    }
}

/// Body of a webhook notification.
///
/// Wire shape:
/// `{status, crud, initiator, entities: {<origin>: [{uuid, type, dependencies}]}}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookPayload {
    /// Notification status.
    pub status: String,
    /// Operation marker.
    pub crud: CrudOperation,
    /// The site that sent the notification.
    pub initiator: EntityUuid,
    /// Affected entities grouped by origin.
    pub entities: BTreeMap<EntityUuid, Vec<EntityDescriptor>>,
}

impl WebhookPayload {
    /// Status sent with every outbound notification.
    pub const STATUS_SUCCESSFUL: &'static str = "successful";

    /// Creates a republish request for one origin's entities.
    #[must_use]
    pub fn republish(
        initiator: EntityUuid,
        origin: EntityUuid,
        entities: Vec<EntityDescriptor>,
    ) -> Self {
        let mut grouped = BTreeMap::new();
        grouped.insert(origin, entities);
        Self {
            status: Self::STATUS_SUCCESSFUL.to_string(),
            crud: CrudOperation::Republish,
            initiator,
            entities: grouped,
        }
    }

    /// Returns the number of entities described.
    #[must_use]
    pub fn entity_count(&self) -> usize {
        self.entities.values().map(Vec::len).sum()
    }

    /// Encodes the payload as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> ProtocolResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decodes a payload from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed.
    pub fn from_json(bytes: &[u8]) -> ProtocolResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;

    fn uuid(n: u8) -> EntityUuid {
        EntityUuid::from_bytes([n; 16])
    }

    #[test]
    fn republish_wire_shape() {
        let cdf = Cdf::new(uuid(1), CdfType::ContentEntity, uuid(9))
            .with_dependency(uuid(2), ContentHash::new("h"))
            .unwrap();
        let payload =
            WebhookPayload::republish(uuid(5), uuid(9), vec![EntityDescriptor::from_cdf(&cdf)]);

        let json: serde_json::Value = serde_json::from_slice(&payload.to_json().unwrap()).unwrap();
        assert_eq!(json["status"], "successful");
        assert_eq!(json["crud"], "republish");
        assert_eq!(json["initiator"], uuid(5).to_string());

        let listed = &json["entities"][uuid(9).to_string()][0];
        assert_eq!(listed["uuid"], uuid(1).to_string());
        assert_eq!(listed["type"], "content_entity");
        assert_eq!(listed["dependencies"][0], uuid(2).to_string());
    }

    #[test]
    fn entity_count_sums_origins() {
        let mut payload = WebhookPayload::republish(uuid(5), uuid(9), vec![]);
        payload.entities.insert(
            uuid(8),
            vec![EntityDescriptor {
                uuid: uuid(1),
                cdf_type: CdfType::ConfigEntity,
                dependencies: vec![],
            }],
        );
        assert_eq!(payload.entity_count(), 1);

        let decoded = WebhookPayload::from_json(&payload.to_json().unwrap()).unwrap();
        assert_eq!(decoded, payload);
    }
}
