//! Webhook registration records and their validation rules.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{WebhookError, WebhookResult};
use crate::events;

/// A webhook secret. `Debug` output is redacted.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WebhookSecret(String);

impl WebhookSecret {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The raw secret, for signing.
    pub(crate) fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for WebhookSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WebhookSecret(***)")
    }
}

/// A registered webhook subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookRegistration {
    /// Unique identifier, immutable once assigned.
    pub id: String,
    /// Target URL.
    pub url: String,
    /// Subscribed event types.
    pub events: BTreeSet<String>,
    /// Secret for signing payloads.
    pub(crate) secret: WebhookSecret,
    /// Human-readable description.
    #[serde(default)]
    pub description: String,
    /// Whether deliveries are sent to this webhook.
    pub active: bool,
    /// When the webhook was registered.
    pub created_at: DateTime<Utc>,
    /// When the last delivery attempt finished.
    #[serde(default)]
    pub last_delivery: Option<DateTime<Utc>>,
    #[serde(default)]
    pub delivery_count: u64,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
    #[serde(default)]
    pub retry_count: u64,
}

impl WebhookRegistration {
    /// Checks if this webhook should receive an event.
    pub fn should_receive(&self, event_type: &str) -> bool {
        self.active && self.events.contains(event_type)
    }

    /// Delivery counters for this webhook.
    pub fn stats(&self) -> WebhookStats {
        WebhookStats {
            delivery_count: self.delivery_count,
            success_count: self.success_count,
            failure_count: self.failure_count,
            retry_count: self.retry_count,
            success_rate: if self.delivery_count > 0 {
                self.success_count as f64 / self.delivery_count as f64
            } else {
                0.0
            },
            last_delivery: self.last_delivery,
        }
    }

    pub(crate) fn record_attempt(&mut self, attempt_number: u32, succeeded: bool, at: DateTime<Utc>) {
        self.delivery_count += 1;
        if succeeded {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        if attempt_number > 1 {
            self.retry_count += 1;
        }
        self.last_delivery = Some(at);
    }
}

/// Read-only view of a registration, without its secret.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WebhookInfo {
    pub id: String,
    pub url: String,
    pub events: BTreeSet<String>,
    pub description: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub last_delivery: Option<DateTime<Utc>>,
    pub delivery_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
}

impl From<&WebhookRegistration> for WebhookInfo {
    fn from(webhook: &WebhookRegistration) -> Self {
        Self {
            id: webhook.id.clone(),
            url: webhook.url.clone(),
            events: webhook.events.clone(),
            description: webhook.description.clone(),
            active: webhook.active,
            created_at: webhook.created_at,
            last_delivery: webhook.last_delivery,
            delivery_count: webhook.delivery_count,
            success_count: webhook.success_count,
            failure_count: webhook.failure_count,
            retry_count: webhook.retry_count,
        }
    }
}

/// Per-webhook delivery counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookStats {
    pub delivery_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub retry_count: u64,
    pub success_rate: f64,
    pub last_delivery: Option<DateTime<Utc>>,
}

/// Parameters for registering a webhook.
#[derive(Debug, Clone)]
pub struct NewWebhook {
    pub url: String,
    pub events: Vec<String>,
    pub secret: Option<String>,
    pub description: String,
    pub active: bool,
}

impl NewWebhook {
    /// Starts an active registration for `url` with no events.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            events: Vec::new(),
            secret: None,
            description: String::new(),
            active: true,
        }
    }

    /// Subscribes to specific events.
    pub fn events(mut self, events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.events = events.into_iter().map(Into::into).collect();
        self
    }

    /// Uses a caller-provided secret instead of generating one.
    pub fn secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    /// Sets the description.
    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    /// Registers the webhook in the inactive state.
    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }
}

/// Returned from registration; the only place a secret leaves the registry.
#[derive(Clone)]
pub struct RegisteredWebhook {
    pub id: String,
    pub secret: String,
}

impl std::fmt::Debug for RegisteredWebhook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredWebhook")
            .field("id", &self.id)
            .field("secret", &"***")
            .finish()
    }
}

/// Partial update; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct WebhookPatch {
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub description: Option<String>,
    pub active: Option<bool>,
}

impl WebhookPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn events(mut self, events: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.events = Some(events.into_iter().map(Into::into).collect());
        self
    }

    pub fn description(mut self, desc: impl Into<String>) -> Self {
        self.description = Some(desc.into());
        self
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.url.is_none() && self.events.is_none() && self.description.is_none() && self.active.is_none()
    }
}

/// Accepts `http`/`https` URLs with a host.
pub fn validate_url(url: &str) -> WebhookResult<()> {
    let parsed = url::Url::parse(url)
        .map_err(|e| WebhookError::Validation(format!("Invalid webhook URL {}: {}", url, e)))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(WebhookError::Validation(format!(
            "Invalid webhook URL {}: scheme must be http or https",
            url
        )));
    }

    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(WebhookError::Validation(format!(
            "Invalid webhook URL {}: missing host",
            url
        )));
    }

    Ok(())
}

/// Checks a subscription list against the vocabulary and deduplicates it.
pub fn validate_events(events: &[String]) -> WebhookResult<BTreeSet<String>> {
    if events.is_empty() {
        return Err(WebhookError::Validation(
            "At least one event type is required".to_string(),
        ));
    }

    let unsupported: Vec<&str> = events
        .iter()
        .map(String::as_str)
        .filter(|e| !events::is_supported(e))
        .collect();
    if !unsupported.is_empty() {
        return Err(WebhookError::Validation(format!(
            "Unsupported events: {:?}",
            unsupported
        )));
    }

    Ok(events.iter().cloned().collect())
}
