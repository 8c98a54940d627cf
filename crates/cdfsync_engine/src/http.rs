//! HTTP hub client.
//!
//! Requests go through the [`HttpClient`] trait. The engine is synchronous,
//! so any blocking HTTP library can implement it.
//!
//! ## Endpoints
//!
//! - `GET {base}/entities?uuids=a,b` returns `{"entities": [...]}`
//! - `GET {base}/clients/{origin}/webhook` returns a webhook or 404
//! - republish requests `POST` the payload JSON to the webhook url
//!
//! Every request carries a `Date` header and an HMAC-SHA256 `Authorization`
//! header over `METHOD\nURL\nDATE\nBODY`.

use crate::config::{HubConfig, RetryConfig};
use crate::error::{ImportError, ImportResult};
use crate::source::{RemoteCdfSource, RemoteResponse};
use cdfsync_protocol::{
    CdfDocument, EntityUuid, RequestSigner, WebhookEndpoint, WebhookPayload,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

/// HTTP request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
}

impl Method {
    /// Returns the method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// An outbound HTTP request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method.
    pub method: Method,
    /// Absolute url.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Returns the first header named `name` (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// An HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Creates a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// HTTP client abstraction.
///
/// `Err` means the request never produced a response (connect failure,
/// timeout, reset). Non-2xx responses are returned as `Ok`.
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the response.
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, String>;
}

/// [`RemoteCdfSource`] talking to a hub over HTTP with JSON bodies.
pub struct HttpRemoteSource<C: HttpClient> {
    config: HubConfig,
    signer: RequestSigner,
    client: C,
}

impl<C: HttpClient> HttpRemoteSource<C> {
    /// Creates a hub client.
    pub fn new(config: HubConfig, client: C) -> Self {
        let signer = config.signer();
        Self {
            config,
            signer,
            client,
        }
    }

    /// Returns the hub base url.
    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    fn signed(&self, method: Method, url: String, body: Vec<u8>) -> HttpRequest {
        let date = unix_date();
        let authorization = self
            .signer
            .authorization_header(method.as_str(), &url, &date, &body);
        let mut headers = vec![
            ("Date".to_string(), date),
            ("Authorization".to_string(), authorization),
            ("X-Client-Uuid".to_string(), self.config.client_uuid.to_string()),
        ];
        if method == Method::Post {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        HttpRequest {
            method,
            url,
            headers,
            body,
        }
    }

    /// Sends a request, retrying retryable failures per the retry policy.
    fn send_with_retry(&self, request: &HttpRequest) -> ImportResult<HttpResponse> {
        let retry: &RetryConfig = &self.config.retry;
        let mut attempt = 0;
        loop {
            let delay = retry.delay_for_attempt(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            let result = self
                .client
                .send(request)
                .map_err(ImportError::transport_retryable)
                .and_then(|response| {
                    if response.status >= 500 {
                        Err(ImportError::transport_retryable(format!(
                            "{} {} returned {}",
                            request.method.as_str(),
                            request.url,
                            response.status
                        )))
                    } else {
                        Ok(response)
                    }
                });

            match result {
                Ok(response) => return Ok(response),
                Err(err) if err.is_retryable() && attempt + 1 < retry.max_attempts => {
                    attempt += 1;
                    warn!(url = %request.url, attempt, error = %err, "Retrying hub request");
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl<C: HttpClient> RemoteCdfSource for HttpRemoteSource<C> {
    fn fetch_by_uuids(&self, uuids: &BTreeSet<EntityUuid>) -> ImportResult<CdfDocument> {
        if uuids.is_empty() {
            return Ok(CdfDocument::new());
        }
        let list = uuids
            .iter()
            .map(EntityUuid::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let url = format!("{}/entities?uuids={}", self.config.base_url, list);
        let request = self.signed(Method::Get, url, Vec::new());

        let response = self.send_with_retry(&request)?;
        match response.status {
            200 => {
                let document = CdfDocument::from_json(&response.body)?;
                debug!(requested = uuids.len(), received = document.len(), "Fetched CDFs");
                Ok(document)
            }
            404 => Ok(CdfDocument::new()),
            status => Err(ImportError::transport_fatal(format!(
                "hub rejected entity fetch with status {status}"
            ))),
        }
    }

    fn webhook_for(&self, origin: &EntityUuid) -> ImportResult<Option<WebhookEndpoint>> {
        let url = format!("{}/clients/{}/webhook", self.config.base_url, origin);
        let request = self.signed(Method::Get, url, Vec::new());

        let response = self.send_with_retry(&request)?;
        match response.status {
            200 => {
                let endpoint = serde_json::from_slice(&response.body)
                    .map_err(|e| ImportError::Protocol(e.into()))?;
                Ok(Some(endpoint))
            }
            404 => Ok(None),
            status => Err(ImportError::transport_fatal(format!(
                "hub rejected webhook lookup for {origin} with status {status}"
            ))),
        }
    }

    fn request_republish(
        &self,
        endpoint: &WebhookEndpoint,
        payload: &WebhookPayload,
    ) -> ImportResult<RemoteResponse> {
        let body = payload.to_json()?;
        let request = self.signed(Method::Post, endpoint.url.clone(), body);

        let response = self.send_with_retry(&request)?;
        Ok(RemoteResponse {
            status_code: response.status,
            body: response.body,
        })
    }
}

/// Request date as Unix seconds.
fn unix_date() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        .to_string()
}

/// Servers that can answer loopback requests in-process.
pub trait LoopbackServer: Send + Sync {
    /// Handles a request.
    fn handle(&self, request: &HttpRequest) -> HttpResponse;
}

impl<S: LoopbackServer + ?Sized> LoopbackServer for Arc<S> {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        (**self).handle(request)
    }
}

/// An HTTP client that routes requests straight to an in-process server.
///
/// Useful for testing without actual network overhead.
pub struct LoopbackClient<S: LoopbackServer> {
    server: S,
}

impl<S: LoopbackServer> LoopbackClient<S> {
    /// Creates a client connected to `server`.
    pub fn new(server: S) -> Self {
        Self { server }
    }

    /// Returns the server.
    pub fn server(&self) -> &S {
        &self.server
    }
}

impl<S: LoopbackServer> HttpClient for LoopbackClient<S> {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, String> {
        Ok(self.server.handle(request))
    }
}
