//! Inbound webhook authentication.
//!
//! Bitbucket can prove a delivery two ways:
//! - `X-Hub-Signature: sha256=<hex>`, an HMAC-SHA256 of the raw body keyed
//!   with the shared secret
//! - a `?secret=<shared secret>` query parameter on the webhook URL
//!
//! Verification only looks at raw bytes; the body is parsed after it passes.

use axum::http::HeaderMap;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the HMAC signature of the body.
pub const SIGNATURE_HEADER: &str = "x-hub-signature";

/// Header naming the Bitbucket event (e.g. `pullrequest:created`).
pub const EVENT_KEY_HEADER: &str = "x-event-key";

/// Query parameter carrying the shared secret.
pub const SECRET_QUERY_PARAM: &str = "secret";

const SIGNATURE_PREFIX: &str = "sha256=";

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum WebhookError {
    #[error("webhook delivery carries no signature or secret")]
    Missing,

    #[error("unsupported webhook signature scheme '{0}'")]
    UnsupportedScheme(String),

    #[error("webhook signature is not valid hex")]
    Malformed,

    #[error("webhook signature does not match")]
    Mismatch,

    #[error("webhook secret cannot be used as an HMAC key")]
    InvalidKey,
}

/// Proof of origin supplied by the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookCredential {
    Signature(String),
    QuerySecret(String),
}

#[derive(Deserialize)]
struct SecretQuery {
    secret: Option<String>,
}

impl WebhookCredential {
    /// Picks the credential out of a request.
    ///
    /// A signature header wins over the query parameter, so a bad signature
    /// cannot be rescued by also appending the secret to the URL.
    pub fn from_request(headers: &HeaderMap, query: Option<&str>) -> Option<Self> {
        if let Some(value) = headers.get(SIGNATURE_HEADER) {
            let signature = value.to_str().unwrap_or_default().trim().to_string();
            return Some(Self::Signature(signature));
        }

        let secret = query
            .and_then(|q| serde_urlencoded::from_str::<SecretQuery>(q).ok())
            .and_then(|q| q.secret)?;
        Some(Self::QuerySecret(secret))
    }
}

/// Checks deliveries against the configured shared secret.
pub struct WebhookVerifier<'a> {
    secret: &'a str,
}

impl<'a> WebhookVerifier<'a> {
    pub fn new(secret: &'a str) -> Self {
        Self { secret }
    }

    fn mac(&self) -> Result<HmacSha256, WebhookError> {
        HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|_| WebhookError::InvalidKey)
    }

    /// Signature header value for `body`, as a sender would compute it.
    pub fn sign(&self, body: &[u8]) -> Result<String, WebhookError> {
        let mut mac = self.mac()?;
        mac.update(body);
        Ok(format!(
            "{}{}",
            SIGNATURE_PREFIX,
            hex::encode(mac.finalize().into_bytes())
        ))
    }

    /// Verifies `credential` for `body`. All comparisons are constant-time.
    pub fn verify(
        &self,
        body: &[u8],
        credential: Option<&WebhookCredential>,
    ) -> Result<(), WebhookError> {
        match credential {
            None => Err(WebhookError::Missing),
            Some(WebhookCredential::Signature(signature)) => self.verify_signature(body, signature),
            Some(WebhookCredential::QuerySecret(secret)) => {
                if bool::from(secret.as_bytes().ct_eq(self.secret.as_bytes())) {
                    Ok(())
                } else {
                    Err(WebhookError::Mismatch)
                }
            }
        }
    }

    fn verify_signature(&self, body: &[u8], signature: &str) -> Result<(), WebhookError> {
        let Some(hex_digest) = signature.strip_prefix(SIGNATURE_PREFIX) else {
            let scheme = signature.split('=').next().unwrap_or_default();
            return Err(WebhookError::UnsupportedScheme(scheme.to_string()));
        };

        let expected = hex::decode(hex_digest).map_err(|_| WebhookError::Malformed)?;

        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(&expected)
            .map_err(|_| WebhookError::Mismatch)
    }
}
