//! Configuration for imports and the hub client.

use cdfsync_protocol::{EntityUuid, RequestSigner};
use std::collections::BTreeSet;
use std::time::Duration;

/// Configuration for import operations.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// This site's uuid, sent as the initiator of republish requests.
    pub site_uuid: EntityUuid,
    /// Maximum materialize passes before cycle breaking gives up.
    pub stub_pass_budget: u32,
    /// Consecutive fetch rounds without progress before the resolver
    /// escalates to the validator failure path.
    pub fetch_stall_limit: u32,
    /// Entity type ids materialized before general cycle breaking.
    pub high_priority_types: BTreeSet<String>,
}

impl ImportConfig {
    /// Creates a configuration for site `site_uuid`.
    pub fn new(site_uuid: EntityUuid) -> Self {
        Self {
            site_uuid,
            stub_pass_budget: 5,
            fetch_stall_limit: 2,
            high_priority_types: BTreeSet::new(),
        }
    }

    /// Sets the materialize pass budget.
    pub fn with_stub_pass_budget(mut self, budget: u32) -> Self {
        self.stub_pass_budget = budget.max(1);
        self
    }

    /// Sets the fetch stall limit.
    pub fn with_fetch_stall_limit(mut self, limit: u32) -> Self {
        self.fetch_stall_limit = limit.max(1);
        self
    }

    /// Adds an entity type id to the high-priority set.
    pub fn with_high_priority_type(mut self, entity_type: impl Into<String>) -> Self {
        self.high_priority_types.insert(entity_type.into());
        self
    }

    /// Returns true if `entity_type` is materialized first.
    pub fn is_high_priority(&self, entity_type: Option<&str>) -> bool {
        entity_type.is_some_and(|t| self.high_priority_types.contains(t))
    }
}

/// Connection settings for the hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub base URL (e.g., "https://hub.example.com/api").
    pub base_url: String,
    /// This site's client uuid on the hub.
    pub client_uuid: EntityUuid,
    /// API key id sent with every signed request.
    pub api_key: String,
    /// Shared secret for HMAC request signing.
    pub secret: Vec<u8>,
    /// Request timeout handed to the HTTP client.
    pub timeout: Duration,
    /// Retry policy for transport failures.
    pub retry: RetryConfig,
}

impl HubConfig {
    /// Creates a hub configuration.
    pub fn new(
        base_url: impl Into<String>,
        client_uuid: EntityUuid,
        api_key: impl Into<String>,
        secret: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client_uuid,
            api_key: api_key.into(),
            secret: secret.into(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
        }
    }

    /// Sets the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Returns a request signer for this configuration.
    pub fn signer(&self) -> RequestSigner {
        RequestSigner::new(self.api_key.clone(), self.secret.clone())
    }
}

/// Configuration for retrying transport failures.
///
/// Only failures the transport marks retryable are retried. Queue-level
/// retries of whole imports are left to the queue infrastructure.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% jitter to delays.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates a retry configuration with `max_attempts` attempts.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Disables jitter.
    pub fn without_jitter(mut self) -> Self {
        self.add_jitter = false;
        self
    }

    /// Returns the delay before `attempt` (0-indexed; attempt 0 never waits).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let secs = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter {
            Duration::from_secs_f64(secs + secs * 0.25 * time_jitter())
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Cheap pseudo-random value in `[0, 1)` taken from the clock.
fn time_jitter() -> f64 {
    use std::time::SystemTime;
    let nanos = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos();
    f64::from(nanos % 1000) / 1000.0
}
