//! HMAC-SHA256 request signing for hub and webhook calls.
//!
//! ## Signed String
//!
//! The signature covers four newline-separated fields:
//!
//! ```text
//! METHOD\nURL\nDATE\nBODY
//! ```
//!
//! The method is upper-cased. The result is hex-encoded and sent as
//! `Authorization: HMAC-SHA256 <key_id>:<hex>`.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Authorization scheme name.
pub const SIGNATURE_SCHEME: &str = "HMAC-SHA256";

/// Signs outbound requests with a shared secret.
#[derive(Clone)]
pub struct RequestSigner {
    key_id: String,
    secret: Vec<u8>,
}

impl RequestSigner {
    /// Creates a signer for API key `key_id`.
    pub fn new(key_id: impl Into<String>, secret: impl Into<Vec<u8>>) -> Self {
        Self {
            key_id: key_id.into(),
            secret: secret.into(),
        }
    }

    /// Returns the API key id.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns the hex signature of a request.
    #[must_use]
    pub fn sign(&self, method: &str, url: &str, date: &str, body: &[u8]) -> String {
        hex::encode(self.mac(method, url, date, body).finalize().into_bytes())
    }

    /// Returns the `Authorization` header value for a request.
    #[must_use]
    pub fn authorization_header(&self, method: &str, url: &str, date: &str, body: &[u8]) -> String {
        format!(
            "{SIGNATURE_SCHEME} {}:{}",
            self.key_id,
            self.sign(method, url, date, body)
        )
    }

    /// Verifies a hex signature in constant time.
    #[must_use]
    pub fn verify(&self, method: &str, url: &str, date: &str, body: &[u8], signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        self.mac(method, url, date, body)
            .verify_slice(&expected)
            .is_ok()
    }

    fn mac(&self, method: &str, url: &str, date: &str, body: &[u8]) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC can take key of any size");
        mac.update(method.to_ascii_uppercase().as_bytes());
        mac.update(b"\n");
        mac.update(url.as_bytes());
        mac.update(b"\n");
        mac.update(date.as_bytes());
        mac.update(b"\n");
        mac.update(body);
        mac
    }
}

impl std::fmt::Debug for RequestSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestSigner")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}
