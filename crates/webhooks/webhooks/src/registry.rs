//! Webhook registry.
//!
//! Owns the subscriber records. Every mutation writes a full snapshot to the
//! storage backend while the write lock is held; a failed write is logged
//! and the in-memory state stays authoritative.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::delivery::SubscriberDirectory;
use crate::error::WebhookResult;
use crate::events;
use crate::registration::{
    NewWebhook, RegisteredWebhook, WebhookInfo, WebhookPatch, WebhookRegistration,
    WebhookSecret, WebhookStats, validate_events, validate_url,
};
use crate::signature::{DEFAULT_SECRET_BYTES, generate_secret};
use crate::storage::{RegistrationMap, WebhookStorage};

/// Registered webhook subscribers.
pub struct WebhookRegistry {
    webhooks: RwLock<RegistrationMap>,
    storage: Arc<dyn WebhookStorage>,
}

impl WebhookRegistry {
    /// Loads the registry from storage. A load failure starts empty.
    pub async fn open(storage: Arc<dyn WebhookStorage>) -> Self {
        let webhooks = match storage.load_registrations().await {
            Ok(webhooks) => {
                tracing::info!(count = webhooks.len(), "Loaded webhook registrations");
                webhooks
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to load webhook registrations");
                RegistrationMap::new()
            }
        };

        Self {
            webhooks: RwLock::new(webhooks),
            storage,
        }
    }

    /// Registers a webhook and returns its id and secret.
    ///
    /// The secret is generated when none (or an empty one) is given. Nothing
    /// is stored when validation fails.
    pub async fn register(&self, new: NewWebhook) -> WebhookResult<RegisteredWebhook> {
        validate_url(&new.url)?;
        let subscribed = validate_events(&new.events)?;

        let secret = match new.secret {
            Some(secret) if !secret.is_empty() => secret,
            _ => generate_secret(DEFAULT_SECRET_BYTES),
        };

        let mut webhooks = self.webhooks.write().await;
        let id = loop {
            let candidate = format!("wh_{}", Uuid::new_v4().simple());
            if !webhooks.contains_key(&candidate) {
                break candidate;
            }
        };

        tracing::info!(
            webhook_id = %id,
            url = %new.url,
            events = ?subscribed,
            "Registered webhook"
        );

        webhooks.insert(
            id.clone(),
            WebhookRegistration {
                id: id.clone(),
                url: new.url,
                events: subscribed,
                secret: WebhookSecret::new(secret.clone()),
                description: new.description,
                active: new.active,
                created_at: Utc::now(),
                last_delivery: None,
                delivery_count: 0,
                success_count: 0,
                failure_count: 0,
                retry_count: 0,
            },
        );
        self.persist(&webhooks).await;

        Ok(RegisteredWebhook { id, secret })
    }

    /// Removes a webhook. Returns false when the id is unknown.
    pub async fn unregister(&self, webhook_id: &str) -> bool {
        let mut webhooks = self.webhooks.write().await;
        if webhooks.remove(webhook_id).is_none() {
            return false;
        }

        self.persist(&webhooks).await;
        tracing::info!(webhook_id, "Unregistered webhook");
        true
    }

    pub async fn get_webhook(&self, webhook_id: &str) -> Option<WebhookInfo> {
        self.webhooks.read().await.get(webhook_id).map(WebhookInfo::from)
    }

    /// All registrations, ordered by id.
    pub async fn list_webhooks(&self) -> Vec<WebhookInfo> {
        self.webhooks.read().await.values().map(WebhookInfo::from).collect()
    }

    /// Active registrations subscribed to `event_type`, oldest first.
    pub async fn webhooks_for_event(&self, event_type: &str) -> Vec<WebhookInfo> {
        self.subscribers(event_type)
            .await
            .iter()
            .map(WebhookInfo::from)
            .collect()
    }

    /// Like [`webhooks_for_event`](Self::webhooks_for_event), with secrets.
    pub(crate) async fn subscribers(&self, event_type: &str) -> Vec<WebhookRegistration> {
        let mut matching: Vec<WebhookRegistration> = self
            .webhooks
            .read()
            .await
            .values()
            .filter(|webhook| webhook.should_receive(event_type))
            .cloned()
            .collect();

        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        matching
    }

    /// Applies a partial update. Returns `Ok(false)` when the id is unknown.
    pub async fn update(&self, webhook_id: &str, patch: WebhookPatch) -> WebhookResult<bool> {
        if let Some(url) = &patch.url {
            validate_url(url)?;
        }
        let subscribed = match &patch.events {
            Some(events) => Some(validate_events(events)?),
            None => None,
        };

        let mut webhooks = self.webhooks.write().await;
        let Some(webhook) = webhooks.get_mut(webhook_id) else {
            return Ok(false);
        };
        if patch.is_empty() {
            return Ok(true);
        }

        if let Some(url) = patch.url {
            webhook.url = url;
        }
        if let Some(subscribed) = subscribed {
            webhook.events = subscribed;
        }
        if let Some(description) = patch.description {
            webhook.description = description;
        }
        if let Some(active) = patch.active {
            webhook.active = active;
        }

        self.persist(&webhooks).await;
        tracing::info!(webhook_id, "Updated webhook");
        Ok(true)
    }

    /// The event types a webhook can subscribe to.
    pub fn supported_events() -> BTreeSet<&'static str> {
        events::supported_events()
    }

    /// Removes inactive webhooks registered more than `days_inactive` days ago.
    pub async fn cleanup_inactive(&self, days_inactive: u32) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days_inactive));

        let mut webhooks = self.webhooks.write().await;
        let before = webhooks.len();
        webhooks.retain(|_, webhook| webhook.active || webhook.created_at >= cutoff);
        let removed = before - webhooks.len();

        if removed > 0 {
            self.persist(&webhooks).await;
            tracing::info!(removed, "Cleaned up inactive webhooks");
        }
        removed
    }

    pub async fn webhook_stats(&self, webhook_id: &str) -> Option<WebhookStats> {
        self.webhooks
            .read()
            .await
            .get(webhook_id)
            .map(WebhookRegistration::stats)
    }

    pub async fn len(&self) -> usize {
        self.webhooks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.webhooks.read().await.is_empty()
    }

    async fn persist(&self, webhooks: &RegistrationMap) {
        if let Err(e) = self.storage.save_registrations(webhooks).await {
            tracing::error!(error = %e, "Failed to save webhook registrations");
        }
    }
}

#[async_trait]
impl SubscriberDirectory for WebhookRegistry {
    async fn secret_for(&self, webhook_id: &str) -> Option<WebhookSecret> {
        self.webhooks
            .read()
            .await
            .get(webhook_id)
            .map(|webhook| webhook.secret.clone())
    }

    async fn record_attempt(&self, webhook_id: &str, attempt_number: u32, succeeded: bool) {
        let mut webhooks = self.webhooks.write().await;
        let Some(webhook) = webhooks.get_mut(webhook_id) else {
            return;
        };

        webhook.record_attempt(attempt_number, succeeded, Utc::now());
        self.persist(&webhooks).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EVENT_PROCESSED, MEDAL_AWARDED, TEST_EVENT};
    use crate::storage::InMemoryWebhookStorage;

    async fn registry() -> (WebhookRegistry, Arc<InMemoryWebhookStorage>) {
        let storage = Arc::new(InMemoryWebhookStorage::new());
        (WebhookRegistry::open(storage.clone()).await, storage)
    }

    #[tokio::test]
    async fn test_register() {
        let (registry, storage) = registry().await;

        let registered = registry
            .register(
                NewWebhook::new("https://example.com/hook")
                    .events([EVENT_PROCESSED])
                    .description("results feed"),
            )
            .await
            .unwrap();

        assert!(registered.id.starts_with("wh_"));
        assert!(registered.secret.len() >= 43);
        assert_eq!(registry.len().await, 1);

        let stored = storage.load_registrations().await.unwrap();
        let webhook = &stored[&registered.id];
        assert_eq!(webhook.description, "results feed");
        assert_eq!(webhook.secret.expose(), registered.secret);
        assert!(webhook.active);
    }

    #[tokio::test]
    async fn test_register_keeps_provided_secret() {
        let (registry, _) = registry().await;

        let registered = registry
            .register(NewWebhook::new("https://example.com/hook").events([TEST_EVENT]).secret("mine"))
            .await
            .unwrap();
        assert_eq!(registered.secret, "mine");
    }

    #[tokio::test]
    async fn test_register_rejects_invalid_input() {
        let (registry, storage) = registry().await;

        let err = registry
            .register(NewWebhook::new("not-a-url").events([TEST_EVENT]))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = registry
            .register(NewWebhook::new("https://example.com/hook").events(["bogus.event"]))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = registry
            .register(NewWebhook::new("https://example.com/hook"))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        assert!(registry.is_empty().await);
        assert!(storage.load_registrations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_twice() {
        let (registry, _) = registry().await;
        let registered = registry
            .register(NewWebhook::new("https://example.com/hook").events([TEST_EVENT]))
            .await
            .unwrap();

        assert!(registry.unregister(&registered.id).await);
        assert!(!registry.unregister(&registered.id).await);
        assert!(registry.get_webhook(&registered.id).await.is_none());
    }

    #[tokio::test]
    async fn test_webhooks_for_event() {
        let (registry, _) = registry().await;

        let first = registry
            .register(NewWebhook::new("https://a.example.com").events([EVENT_PROCESSED]))
            .await
            .unwrap();
        let second = registry
            .register(
                NewWebhook::new("https://b.example.com").events([EVENT_PROCESSED, MEDAL_AWARDED]),
            )
            .await
            .unwrap();
        registry
            .register(NewWebhook::new("https://c.example.com").events([EVENT_PROCESSED]).inactive())
            .await
            .unwrap();

        let ids: Vec<String> = registry
            .webhooks_for_event(EVENT_PROCESSED)
            .await
            .into_iter()
            .map(|w| w.id)
            .collect();
        assert_eq!(ids, vec![first.id, second.id.clone()]);

        let medal = registry.webhooks_for_event(MEDAL_AWARDED).await;
        assert_eq!(medal.len(), 1);
        assert_eq!(medal[0].id, second.id);

        assert!(registry.webhooks_for_event("bogus.event").await.is_empty());
    }

    #[tokio::test]
    async fn test_update() {
        let (registry, _) = registry().await;
        let registered = registry
            .register(NewWebhook::new("https://example.com/hook").events([TEST_EVENT]))
            .await
            .unwrap();

        let updated = registry
            .update(
                &registered.id,
                WebhookPatch::new().events([MEDAL_AWARDED]).active(false),
            )
            .await
            .unwrap();
        assert!(updated);

        let webhook = registry.get_webhook(&registered.id).await.unwrap();
        assert!(!webhook.active);
        assert!(webhook.events.contains(MEDAL_AWARDED));
        assert!(!webhook.events.contains(TEST_EVENT));
        assert_eq!(webhook.url, "https://example.com/hook");

        assert!(!registry.update("wh_missing", WebhookPatch::new().active(true)).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_validation_leaves_record_untouched() {
        let (registry, _) = registry().await;
        let registered = registry
            .register(NewWebhook::new("https://example.com/hook").events([TEST_EVENT]))
            .await
            .unwrap();

        let err = registry
            .update(
                &registered.id,
                WebhookPatch::new().url("ftp://example.com").description("changed"),
            )
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let webhook = registry.get_webhook(&registered.id).await.unwrap();
        assert_eq!(webhook.url, "https://example.com/hook");
        assert_eq!(webhook.description, "");
    }

    #[tokio::test]
    async fn test_cleanup_inactive() {
        let storage = Arc::new(InMemoryWebhookStorage::new());
        {
            let registry = WebhookRegistry::open(storage.clone()).await;
            registry
                .register(NewWebhook::new("https://old.example.com").events([TEST_EVENT]).inactive())
                .await
                .unwrap();
            registry
                .register(NewWebhook::new("https://live.example.com").events([TEST_EVENT]))
                .await
                .unwrap();
        }

        // Age every registration by 60 days.
        let mut stored = storage.load_registrations().await.unwrap();
        for webhook in stored.values_mut() {
            webhook.created_at -= chrono::Duration::days(60);
        }
        storage.save_registrations(&stored).await.unwrap();

        let registry = WebhookRegistry::open(storage.clone()).await;
        assert_eq!(registry.cleanup_inactive(30).await, 1);
        assert_eq!(registry.len().await, 1);
        assert!(registry.list_webhooks().await[0].active);
        assert_eq!(registry.cleanup_inactive(30).await, 0);
    }

    #[tokio::test]
    async fn test_directory_bookkeeping() {
        let (registry, _) = registry().await;
        let registered = registry
            .register(NewWebhook::new("https://example.com/hook").events([TEST_EVENT]))
            .await
            .unwrap();

        let secret = registry.secret_for(&registered.id).await.unwrap();
        assert_eq!(secret.expose(), registered.secret);
        assert!(registry.secret_for("wh_missing").await.is_none());

        registry.record_attempt(&registered.id, 1, false).await;
        registry.record_attempt(&registered.id, 2, true).await;
        registry.record_attempt("wh_missing", 1, true).await;

        let stats = registry.webhook_stats(&registered.id).await.unwrap();
        assert_eq!(stats.delivery_count, 2);
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.retry_count, 1);
        assert!(stats.last_delivery.is_some());
    }

    #[tokio::test]
    async fn test_read_api_never_yields_secret() {
        let (registry, _) = registry().await;
        let registered = registry
            .register(NewWebhook::new("https://example.com/hook").events([TEST_EVENT]))
            .await
            .unwrap();

        let single = serde_json::to_string(&registry.get_webhook(&registered.id).await).unwrap();
        let listed = serde_json::to_string(&registry.list_webhooks().await).unwrap();
        let routed = serde_json::to_string(&registry.webhooks_for_event(TEST_EVENT).await).unwrap();
        for json in [single, listed, routed] {
            assert!(json.contains(&registered.id));
            assert!(!json.contains(&registered.secret));
        }

        let subscribers = registry.subscribers(TEST_EVENT).await;
        assert_eq!(subscribers[0].secret.expose(), registered.secret);
    }

    #[test]
    fn test_supported_events() {
        assert_eq!(WebhookRegistry::supported_events().len(), 13);
    }
}
