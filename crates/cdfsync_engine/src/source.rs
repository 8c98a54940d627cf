//! Remote CDF source abstraction.

use crate::error::{ImportError, ImportResult};
use cdfsync_protocol::{Cdf, CdfDocument, EntityUuid, WebhookEndpoint, WebhookPayload};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

/// Response to an outbound republish request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl RemoteResponse {
    /// Returns true for 2xx responses.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// The hub, as seen by the import engine.
///
/// Transport failures surface as [`ImportError::Transport`]. A fetch never
/// hides a failure behind an empty document; an empty document means the hub
/// holds none of the requested entities.
pub trait RemoteCdfSource: Send + Sync {
    /// Fetches CDFs for `uuids`. Uuids the hub does not hold are absent from
    /// the returned document.
    fn fetch_by_uuids(&self, uuids: &BTreeSet<EntityUuid>) -> ImportResult<CdfDocument>;

    /// Returns the webhook registered by `origin`, if any.
    fn webhook_for(&self, origin: &EntityUuid) -> ImportResult<Option<WebhookEndpoint>>;

    /// Sends a republish request to an origin's webhook.
    fn request_republish(
        &self,
        endpoint: &WebhookEndpoint,
        payload: &WebhookPayload,
    ) -> ImportResult<RemoteResponse>;
}

/// A recorded republish request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentRepublish {
    /// Target webhook.
    pub endpoint: WebhookEndpoint,
    /// Payload sent.
    pub payload: WebhookPayload,
}

#[derive(Debug, Default)]
struct MockState {
    entities: BTreeMap<EntityUuid, Cdf>,
    webhooks: BTreeMap<EntityUuid, WebhookEndpoint>,
    unreachable_origins: BTreeSet<EntityUuid>,
    fetch_failures: u32,
    fetch_calls: Vec<BTreeSet<EntityUuid>>,
    republished: Vec<SentRepublish>,
}

/// An in-memory hub for tests.
///
/// Records every fetch request and republish request it receives.
#[derive(Debug, Default)]
pub struct MockRemoteSource {
    state: Mutex<MockState>,
}

impl MockRemoteSource {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a hub holding `entities`.
    pub fn with_entities(entities: impl IntoIterator<Item = Cdf>) -> Self {
        let source = Self::new();
        for cdf in entities {
            source.publish(cdf);
        }
        source
    }

    /// Adds or replaces an entity on the hub.
    pub fn publish(&self, cdf: Cdf) {
        self.state.lock().entities.insert(cdf.uuid, cdf);
    }

    /// Removes an entity from the hub.
    pub fn unpublish(&self, uuid: &EntityUuid) -> Option<Cdf> {
        self.state.lock().entities.remove(uuid)
    }

    /// Registers a webhook for `origin` at `url`.
    pub fn register_webhook(&self, origin: EntityUuid, url: impl Into<String>) {
        let endpoint = WebhookEndpoint {
            uuid: EntityUuid::new_v4(),
            client_uuid: origin,
            url: url.into(),
        };
        self.state.lock().webhooks.insert(origin, endpoint);
    }

    /// Makes republish requests to `origin` fail with a transport error.
    pub fn set_unreachable(&self, origin: EntityUuid) {
        self.state.lock().unreachable_origins.insert(origin);
    }

    /// Makes the next `count` fetches fail with a retryable transport error.
    pub fn fail_next_fetches(&self, count: u32) {
        self.state.lock().fetch_failures = count;
    }

    /// Returns the uuid sets of every fetch request, in order.
    pub fn fetch_calls(&self) -> Vec<BTreeSet<EntityUuid>> {
        self.state.lock().fetch_calls.clone()
    }

    /// Returns every republish request sent, in order.
    pub fn republished(&self) -> Vec<SentRepublish> {
        self.state.lock().republished.clone()
    }
}

impl RemoteCdfSource for MockRemoteSource {
    fn fetch_by_uuids(&self, uuids: &BTreeSet<EntityUuid>) -> ImportResult<CdfDocument> {
        let mut state = self.state.lock();
        state.fetch_calls.push(uuids.clone());
        if state.fetch_failures > 0 {
            state.fetch_failures -= 1;
            return Err(ImportError::transport_retryable("connection reset by hub"));
        }
        Ok(uuids
            .iter()
            .filter_map(|uuid| state.entities.get(uuid).cloned())
            .collect())
    }

    fn webhook_for(&self, origin: &EntityUuid) -> ImportResult<Option<WebhookEndpoint>> {
        Ok(self.state.lock().webhooks.get(origin).cloned())
    }

    fn request_republish(
        &self,
        endpoint: &WebhookEndpoint,
        payload: &WebhookPayload,
    ) -> ImportResult<RemoteResponse> {
        let mut state = self.state.lock();
        if state.unreachable_origins.contains(&endpoint.client_uuid) {
            return Err(ImportError::transport_retryable(format!(
                "{} unreachable",
                endpoint.url
            )));
        }
        state.republished.push(SentRepublish {
            endpoint: endpoint.clone(),
            payload: payload.clone(),
        });
        Ok(RemoteResponse {
            status_code: 200,
            body: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdfsync_protocol::{CdfType, EntityDescriptor};

    fn uuid(n: u8) -> EntityUuid {
        EntityUuid::from_bytes([n; 16])
    }

    #[test]
    fn fetch_returns_only_held_entities() {
        let source = MockRemoteSource::with_entities([Cdf::new(
            uuid(1),
            CdfType::ContentEntity,
            uuid(9),
        )]);

        let doc = source
            .fetch_by_uuids(&BTreeSet::from([uuid(1), uuid(2)]))
            .unwrap();
        assert_eq!(doc.uuids(), BTreeSet::from([uuid(1)]));
        assert_eq!(source.fetch_calls().len(), 1);
    }

    #[test]
    fn injected_fetch_failure_is_retryable() {
        let source = MockRemoteSource::new();
        source.fail_next_fetches(1);

        let err = source.fetch_by_uuids(&BTreeSet::new()).unwrap_err();
        assert!(err.is_retryable());
        assert!(source.fetch_by_uuids(&BTreeSet::new()).is_ok());
    }

    #[test]
    fn republish_recorded_or_refused() {
        let source = MockRemoteSource::new();
        source.register_webhook(uuid(9), "https://origin.example/webhook");
        let endpoint = source.webhook_for(&uuid(9)).unwrap().unwrap();
        let payload = WebhookPayload::republish(
            uuid(5),
            uuid(9),
            vec![EntityDescriptor::from_cdf(&Cdf::new(
                uuid(1),
                CdfType::ContentEntity,
                uuid(9),
            ))],
        );

        assert!(source.request_republish(&endpoint, &payload).unwrap().is_success());
        assert_eq!(source.republished().len(), 1);

        source.set_unreachable(uuid(9));
        assert!(source.request_republish(&endpoint, &payload).is_err());
        assert!(source.webhook_for(&uuid(8)).unwrap().is_none());
    }
}
