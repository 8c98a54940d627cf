//! In-process hub speaking the HTTP contract.
//!
//! [`MemoryHub`] answers the hub endpoints and also plays every origin's
//! webhook receiver, so one [`LoopbackClient`] covers all traffic of an
//! [`HttpRemoteSource`].

use cdfsync_engine::{
    HttpRemoteSource, HttpRequest, HttpResponse, HubConfig, LoopbackClient, LoopbackServer,
    Method, RetryConfig,
};
use cdfsync_protocol::{
    Cdf, CdfDocument, EntityUuid, RequestSigner, WebhookEndpoint, WebhookPayload,
    SIGNATURE_SCHEME,
};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Hub base url used by [`MemoryHub::source`].
pub const HUB_BASE_URL: &str = "https://hub.test/api";
/// Api key accepted by the hub.
pub const HUB_API_KEY: &str = "subscriber-key";
/// Signing secret shared with the hub.
pub const HUB_SECRET: &[u8] = b"subscriber-secret";

/// Hub client type produced by [`MemoryHub::source`].
pub type HubSource = HttpRemoteSource<LoopbackClient<Arc<MemoryHub>>>;

#[derive(Debug, Default)]
struct HubState {
    entities: BTreeMap<EntityUuid, Cdf>,
    webhooks: BTreeMap<EntityUuid, WebhookEndpoint>,
    down_urls: BTreeSet<String>,
    unavailable: u32,
    requests: Vec<HttpRequest>,
    fetched: Vec<BTreeSet<EntityUuid>>,
    republished: Vec<WebhookPayload>,
}

/// An in-memory hub.
#[derive(Debug)]
pub struct MemoryHub {
    base_url: String,
    signer: RequestSigner,
    state: Mutex<HubState>,
}

impl Default for MemoryHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHub {
    /// Creates an empty hub at [`HUB_BASE_URL`].
    pub fn new() -> Self {
        Self {
            base_url: HUB_BASE_URL.to_string(),
            signer: RequestSigner::new(HUB_API_KEY, HUB_SECRET),
            state: Mutex::new(HubState::default()),
        }
    }

    /// Creates a shared hub holding `entities`.
    pub fn shared(entities: impl IntoIterator<Item = Cdf>) -> Arc<Self> {
        let hub = Self::new();
        for cdf in entities {
            hub.publish(cdf);
        }
        Arc::new(hub)
    }

    /// Returns a hub client for `hub` that never retries.
    pub fn source(hub: &Arc<Self>) -> HubSource {
        let config = HubConfig::new(HUB_BASE_URL, EntityUuid::new_v4(), HUB_API_KEY, HUB_SECRET)
            .with_retry(RetryConfig::no_retry());
        HttpRemoteSource::new(config, LoopbackClient::new(Arc::clone(hub)))
    }

    /// Adds or replaces an entity.
    pub fn publish(&self, cdf: Cdf) {
        self.state.lock().entities.insert(cdf.uuid, cdf);
    }

    /// Removes an entity.
    pub fn unpublish(&self, uuid: &EntityUuid) -> Option<Cdf> {
        self.state.lock().entities.remove(uuid)
    }

    /// Registers a webhook for `origin`, returning its url.
    pub fn register_webhook(&self, origin: EntityUuid) -> String {
        let url = format!("https://{origin}.origin.test/webhook");
        let endpoint = WebhookEndpoint {
            uuid: EntityUuid::new_v4(),
            client_uuid: origin,
            url: url.clone(),
        };
        self.state.lock().webhooks.insert(origin, endpoint);
        url
    }

    /// Makes the webhook of `origin` answer 503.
    pub fn take_down(&self, origin: &EntityUuid) {
        let mut state = self.state.lock();
        if let Some(url) = state.webhooks.get(origin).map(|w| w.url.clone()) {
            state.down_urls.insert(url);
        }
    }

    /// Makes the next `count` hub requests answer 503.
    pub fn fail_next(&self, count: u32) {
        self.state.lock().unavailable = count;
    }

    /// Returns every request received, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.state.lock().requests.clone()
    }

    /// Returns the uuid sets of every served entity fetch.
    pub fn fetch_calls(&self) -> Vec<BTreeSet<EntityUuid>> {
        self.state.lock().fetched.clone()
    }

    /// Returns every republish payload delivered to a webhook.
    pub fn republished(&self) -> Vec<WebhookPayload> {
        self.state.lock().republished.clone()
    }

    fn authorized(&self, request: &HttpRequest) -> bool {
        let (Some(date), Some(header)) = (request.header("Date"), request.header("Authorization"))
        else {
            return false;
        };
        let Some(credentials) = header
            .strip_prefix(SIGNATURE_SCHEME)
            .map(str::trim_start)
        else {
            return false;
        };
        match credentials.split_once(':') {
            Some((key_id, signature)) if key_id == self.signer.key_id() => self.signer.verify(
                request.method.as_str(),
                &request.url,
                date,
                &request.body,
                signature,
            ),
            _ => false,
        }
    }

    fn serve_entities(&self, state: &mut HubState, query: &str) -> HttpResponse {
        let Some(list) = query.strip_prefix("uuids=") else {
            return HttpResponse::new(400, "missing uuids");
        };
        let mut uuids = BTreeSet::new();
        for raw in list.split(',').filter(|s| !s.is_empty()) {
            match EntityUuid::parse(raw) {
                Ok(uuid) => {
                    uuids.insert(uuid);
                }
                Err(_) => return HttpResponse::new(400, format!("bad uuid {raw}")),
            }
        }
        let document: CdfDocument = uuids
            .iter()
            .filter_map(|uuid| state.entities.get(uuid).cloned())
            .collect();
        state.fetched.push(uuids);
        match document.to_json() {
            Ok(body) => HttpResponse::new(200, body),
            Err(e) => HttpResponse::new(500, e.to_string()),
        }
    }

    fn serve_webhook(&self, state: &HubState, path: &str) -> HttpResponse {
        let origin = path
            .strip_prefix("/clients/")
            .and_then(|rest| rest.strip_suffix("/webhook"))
            .and_then(|raw| EntityUuid::parse(raw).ok());
        let Some(origin) = origin else {
            return HttpResponse::new(404, "not found");
        };
        match state.webhooks.get(&origin) {
            Some(endpoint) => match serde_json::to_vec(endpoint) {
                Ok(body) => HttpResponse::new(200, body),
                Err(e) => HttpResponse::new(500, e.to_string()),
            },
            None => HttpResponse::new(404, "no webhook"),
        }
    }

    fn receive_republish(&self, state: &mut HubState, request: &HttpRequest) -> HttpResponse {
        if state.down_urls.contains(&request.url) {
            return HttpResponse::new(503, "origin down");
        }
        match WebhookPayload::from_json(&request.body) {
            Ok(payload) => {
                state.republished.push(payload);
                HttpResponse::new(200, "queued")
            }
            Err(e) => HttpResponse::new(400, e.to_string()),
        }
    }
}

impl LoopbackServer for MemoryHub {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        if let Some(path) = request.url.strip_prefix(&self.base_url) {
            if state.unavailable > 0 {
                state.unavailable -= 1;
                return HttpResponse::new(503, "hub unavailable");
            }
            if !self.authorized(request) {
                return HttpResponse::new(401, "bad signature");
            }
            let (path, query) = path.split_once('?').unwrap_or((path, ""));
            return match (request.method, path) {
                (Method::Get, "/entities") => self.serve_entities(&mut state, query),
                (Method::Get, _) => self.serve_webhook(&state, path),
                _ => HttpResponse::new(405, "method not allowed"),
            };
        }

        let is_webhook = state.webhooks.values().any(|w| w.url == request.url);
        if request.method == Method::Post && is_webhook {
            return self.receive_republish(&mut state, request);
        }
        HttpResponse::new(404, "not found")
    }
}
