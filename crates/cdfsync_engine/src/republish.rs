//! Republish requests to origins whose dependencies vanished from the hub.

use crate::source::RemoteCdfSource;
use cdfsync_protocol::{EntityDescriptor, EntityUuid, WebhookPayload};
use std::collections::BTreeMap;
use tracing::{info, warn};

/// Per-origin result of a republish batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepublishSummary {
    /// Origins that accepted a request.
    pub sent: Vec<EntityUuid>,
    /// Origins with no registered webhook.
    pub skipped: Vec<EntityUuid>,
    /// Origins whose lookup or delivery failed.
    pub failed: Vec<EntityUuid>,
}

/// Asks origins to re-export entities so a later retry can succeed.
///
/// Best effort: a missing webhook or a failed delivery for one origin is
/// logged and never stops the others, and never fails the import.
pub struct RepublishCoordinator<'a, S: RemoteCdfSource + ?Sized> {
    source: &'a S,
    initiator: EntityUuid,
}

impl<'a, S: RemoteCdfSource + ?Sized> RepublishCoordinator<'a, S> {
    /// Creates a coordinator sending requests as site `initiator`.
    pub fn new(source: &'a S, initiator: EntityUuid) -> Self {
        Self { source, initiator }
    }

    /// Sends one republish request per origin.
    pub fn request_republish(
        &self,
        entities_by_origin: &BTreeMap<EntityUuid, Vec<EntityDescriptor>>,
    ) -> RepublishSummary {
        let mut summary = RepublishSummary::default();

        for (origin, entities) in entities_by_origin {
            if entities.is_empty() {
                continue;
            }
            let endpoint = match self.source.webhook_for(origin) {
                Ok(Some(endpoint)) => endpoint,
                Ok(None) => {
                    info!(%origin, "No webhook registered for origin, skipping republish");
                    summary.skipped.push(*origin);
                    continue;
                }
                Err(e) => {
                    warn!(%origin, error = %e, "Webhook lookup failed");
                    summary.failed.push(*origin);
                    continue;
                }
            };

            let payload = WebhookPayload::republish(self.initiator, *origin, entities.clone());
            match self.source.request_republish(&endpoint, &payload) {
                Ok(response) if response.is_success() => {
                    info!(
                        %origin,
                        entities = entities.len(),
                        url = %endpoint.url,
                        "Republish requested"
                    );
                    summary.sent.push(*origin);
                }
                Ok(response) => {
                    warn!(
                        %origin,
                        status = response.status_code,
                        "Origin refused republish request"
                    );
                    summary.failed.push(*origin);
                }
                Err(e) => {
                    warn!(%origin, error = %e, "Republish delivery failed");
                    summary.failed.push(*origin);
                }
            }
        }

        summary
    }
}
