//! Webhook system - main entry point.

use std::sync::Arc;

use crate::config::WebhookConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::WebhookResult;
use crate::queue::DeliveryQueue;
use crate::receiver::WebhookReceiver;
use crate::registry::WebhookRegistry;
use crate::storage::WebhookStorage;
use crate::transport::DeliveryTransport;

/// What a housekeeping pass removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    pub removed_webhooks: usize,
    pub removed_attempts: usize,
}

/// Registry, queue and dispatcher wired together over one storage backend.
pub struct WebhookSystem {
    config: WebhookConfig,
    registry: Arc<WebhookRegistry>,
    queue: Arc<DeliveryQueue>,
    dispatcher: EventDispatcher,
}

impl WebhookSystem {
    /// Opens a system backed by JSON files in `config.data_dir`, delivering over HTTP.
    #[cfg(feature = "http-client")]
    pub async fn open(config: WebhookConfig) -> WebhookResult<Self> {
        let storage = Arc::new(crate::storage::JsonFileStorage::new(&config.data_dir));
        let transport = Arc::new(crate::transport::HttpTransport::new());
        Self::with_parts(config, storage, transport).await
    }

    /// Creates a system with custom storage and transport.
    pub async fn with_parts(
        config: WebhookConfig,
        storage: Arc<dyn WebhookStorage>,
        transport: Arc<dyn DeliveryTransport>,
    ) -> WebhookResult<Self> {
        config.validate()?;

        let registry = Arc::new(WebhookRegistry::open(storage.clone()).await);
        let queue = Arc::new(
            DeliveryQueue::open(&config, storage, transport, Some(registry.clone())).await,
        );
        let dispatcher =
            EventDispatcher::new(registry.clone(), queue.clone(), config.event_history_capacity);

        Ok(Self {
            config,
            registry,
            queue,
            dispatcher,
        })
    }

    /// Starts the delivery workers.
    pub async fn start(&self) {
        self.queue.start().await;
    }

    /// Stops the delivery workers and flushes delivery state.
    pub async fn stop(&self) {
        self.queue.stop().await;
    }

    /// Drops stale inactive webhooks and old delivery records.
    pub async fn housekeeping(&self, inactive_days: u32, history_days: u32) -> HousekeepingReport {
        HousekeepingReport {
            removed_webhooks: self.registry.cleanup_inactive(inactive_days).await,
            removed_attempts: self.queue.cleanup_old_history(history_days).await,
        }
    }

    /// A receiver for `secret` using the configured timestamp tolerance.
    pub fn receiver(&self, secret: impl Into<String>) -> WebhookReceiver {
        WebhookReceiver::new(secret).with_tolerance(self.config.timestamp_tolerance_secs)
    }

    pub fn registry(&self) -> &Arc<WebhookRegistry> {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<DeliveryQueue> {
        &self.queue
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn config(&self) -> &WebhookConfig {
        &self.config
    }
}
