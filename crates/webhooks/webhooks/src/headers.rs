//! Delivery header names and construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::signature::{SignatureError, WebhookSigner};

/// Webhook ID header.
pub const WEBHOOK_ID: &str = "X-Webhook-ID";
/// Event type header.
pub const EVENT_TYPE: &str = "X-Event-Type";
/// Unix timestamp header (seconds).
pub const TIMESTAMP: &str = "X-Timestamp";
/// Signature header, `sha256=<hex>`.
pub const SIGNATURE: &str = "X-Signature";
/// Protocol version header.
pub const VERSION: &str = "X-ADCC-Version";

/// Wire protocol and envelope schema version.
pub const PROTOCOL_VERSION: &str = "0.6.0";

/// User agent sent with every delivery.
pub const USER_AGENT: &str = "ADCC-Analysis-Engine/0.6.0";

/// An ordered header set with case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookHeaders(BTreeMap<String, String>);

impl WebhookHeaders {
    /// Creates an empty header set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a header, replacing any value stored under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|existing, _| !existing.eq_ignore_ascii_case(&name));
        self.0.insert(name, value.into());
    }

    /// Looks up a header ignoring ASCII case.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Iterates over `(name, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for WebhookHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = WebhookHeaders::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Builds the signed header set for one delivery, stamped with the current time.
pub fn build_headers(
    payload: &str,
    secret: &str,
    event_type: &str,
    webhook_id: &str,
) -> Result<WebhookHeaders, SignatureError> {
    build_headers_at(
        payload,
        secret,
        event_type,
        webhook_id,
        chrono::Utc::now().timestamp(),
    )
}

/// Builds the signed header set with an explicit timestamp.
pub fn build_headers_at(
    payload: &str,
    secret: &str,
    event_type: &str,
    webhook_id: &str,
    timestamp: i64,
) -> Result<WebhookHeaders, SignatureError> {
    let signature = WebhookSigner::new(secret).sign_header(payload)?;

    let mut headers = WebhookHeaders::new();
    headers.insert("Content-Type", "application/json");
    headers.insert("User-Agent", USER_AGENT);
    headers.insert(WEBHOOK_ID, webhook_id);
    headers.insert(EVENT_TYPE, event_type);
    headers.insert(TIMESTAMP, timestamp.to_string());
    headers.insert(SIGNATURE, signature);
    headers.insert(VERSION, PROTOCOL_VERSION);

    tracing::debug!(event_type, webhook_id, "Created webhook headers");
    Ok(headers)
}
