//! HMAC signature generation and verification.
//!
//! Deliveries are signed with HMAC-SHA256 over the raw JSON body, keyed by the
//! subscriber's secret. The signature travels as `X-Signature: sha256=<hex>`
//! next to an `X-Timestamp` header that receivers check for replay.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Algorithm tag used as the signature header prefix.
pub const SIGNATURE_ALGORITHM: &str = "sha256";

/// Default replay window for delivery timestamps.
pub const DEFAULT_TIMESTAMP_TOLERANCE_SECS: u64 = 300;

/// Default validity window for callback URL tokens.
pub const DEFAULT_URL_TOKEN_TOLERANCE_SECS: u64 = 3600;

/// Default number of random bytes in a generated secret.
pub const DEFAULT_SECRET_BYTES: usize = 32;

const MIN_SECRET_BYTES: usize = 16;

/// Generates a random secret for webhook authentication.
///
/// The bytes come from the OS CSPRNG and are encoded as URL-safe base64
/// without padding. Requests below 16 bytes are raised to 16.
pub fn generate_secret(byte_length: usize) -> String {
    let mut bytes = vec![0u8; byte_length.max(MIN_SECRET_BYTES)];
    OsRng.fill_bytes(&mut bytes);
    let secret = URL_SAFE_NO_PAD.encode(&bytes);
    tracing::debug!(length = bytes.len(), "Generated webhook secret");
    secret
}

/// Checks a unix timestamp against the current time.
pub fn verify_timestamp(timestamp: i64, tolerance_secs: u64) -> bool {
    verify_timestamp_at(timestamp, chrono::Utc::now().timestamp(), tolerance_secs)
}

/// Checks a unix timestamp against an explicit `now`; the boundary is inclusive.
pub fn verify_timestamp_at(timestamp: i64, now: i64, tolerance_secs: u64) -> bool {
    let drift = now.abs_diff(timestamp);
    let valid = drift <= tolerance_secs;

    if !valid {
        tracing::warn!(
            drift_secs = drift,
            tolerance_secs,
            "Webhook timestamp outside tolerance"
        );
    }

    valid
}

/// Signature errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SignatureError {
    /// The secret could not be used as an HMAC key.
    #[error("Invalid signing key")]
    InvalidKey,
    /// The signature is not lowercase hex or lacks the `sha256=` prefix.
    #[error("Malformed signature")]
    Malformed,
}

/// Webhook signer for generating and verifying signatures.
#[derive(Clone)]
pub struct WebhookSigner {
    secret: String,
}

impl std::fmt::Debug for WebhookSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookSigner").field("secret", &"***").finish()
    }
}

impl WebhookSigner {
    /// Creates a new signer with the given secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Returns the lowercase hex HMAC-SHA256 of `payload`.
    pub fn sign(&self, payload: &str) -> Result<String, SignatureError> {
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Returns the `X-Signature` header value, `sha256=<hex>`.
    pub fn sign_header(&self, payload: &str) -> Result<String, SignatureError> {
        Ok(format!("{}={}", SIGNATURE_ALGORITHM, self.sign(payload)?))
    }

    /// Verifies a hex signature in constant time.
    ///
    /// A well-formed signature that does not match yields `Ok(false)`.
    pub fn verify(&self, payload: &str, signature: &str) -> Result<bool, SignatureError> {
        let expected = decode_signature(signature)?;
        let mut mac = self.mac()?;
        mac.update(payload.as_bytes());

        let valid = mac.verify_slice(&expected).is_ok();
        if valid {
            tracing::debug!("Webhook signature verified");
        } else {
            tracing::warn!("Webhook signature verification failed");
        }
        Ok(valid)
    }

    /// Verifies a `sha256=<hex>` header value.
    pub fn verify_header(&self, payload: &str, header: &str) -> Result<bool, SignatureError> {
        let signature = header
            .strip_prefix(SIGNATURE_ALGORITHM)
            .and_then(|rest| rest.strip_prefix('='))
            .ok_or(SignatureError::Malformed)?;
        self.verify(payload, signature)
    }

    /// Issues a callback URL token of the form `<unix ts>:<hmac(webhook_id:ts)>`.
    pub fn issue_url_token(&self, webhook_id: &str) -> Result<String, SignatureError> {
        self.issue_url_token_at(webhook_id, chrono::Utc::now().timestamp())
    }

    /// Issues a URL token for an explicit timestamp.
    pub fn issue_url_token_at(
        &self,
        webhook_id: &str,
        timestamp: i64,
    ) -> Result<String, SignatureError> {
        let token = self.sign(&format!("{}:{}", webhook_id, timestamp))?;
        Ok(format!("{}:{}", timestamp, token))
    }

    /// Verifies a URL token for `webhook_id`. Any malformed token is rejected.
    pub fn verify_url_token(&self, token: &str, webhook_id: &str, tolerance_secs: u64) -> bool {
        let Some((timestamp_str, signature)) = token.split_once(':') else {
            return false;
        };
        let Ok(timestamp) = timestamp_str.parse::<i64>() else {
            return false;
        };

        if !verify_timestamp(timestamp, tolerance_secs) {
            return false;
        }

        self.verify(&format!("{}:{}", webhook_id, timestamp_str), signature)
            .unwrap_or(false)
    }

    fn mac(&self) -> Result<HmacSha256, SignatureError> {
        HmacSha256::new_from_slice(self.secret.as_bytes()).map_err(|_| SignatureError::InvalidKey)
    }
}

/// Decodes a lowercase hex signature.
fn decode_signature(signature: &str) -> Result<Vec<u8>, SignatureError> {
    let lowercase_hex = signature
        .bytes()
        .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
    if !lowercase_hex {
        return Err(SignatureError::Malformed);
    }
    hex::decode(signature).map_err(|_| SignatureError::Malformed)
}
