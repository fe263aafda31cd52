//! Webhook storage trait for persistence.
//!
//! Every document is written as a full snapshot; there is no append log.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::RwLock;

use crate::delivery::DeliveryAttempt;
use crate::error::WebhookResult;
use crate::registration::WebhookRegistration;

/// Registrations keyed by webhook id.
pub type RegistrationMap = BTreeMap<String, WebhookRegistration>;

/// Failed attempts keyed by webhook id.
pub type FailureIndex = BTreeMap<String, Vec<DeliveryAttempt>>;

/// Trait for webhook storage backends.
#[async_trait]
pub trait WebhookStorage: Send + Sync {
    // ==================== Registrations ====================

    /// Loads all registrations. A missing document yields an empty map.
    async fn load_registrations(&self) -> WebhookResult<RegistrationMap>;

    /// Replaces the stored registrations.
    async fn save_registrations(&self, registrations: &RegistrationMap) -> WebhookResult<()>;

    // ==================== Delivery history ====================

    /// Loads the delivery history, most recent last.
    async fn load_history(&self) -> WebhookResult<Vec<DeliveryAttempt>>;

    /// Replaces the stored delivery history.
    async fn save_history(&self, history: &[DeliveryAttempt]) -> WebhookResult<()>;

    // ==================== Failure index ====================

    /// Loads the per-webhook failed attempts.
    async fn load_failed(&self) -> WebhookResult<FailureIndex>;

    /// Replaces the stored failure index.
    async fn save_failed(&self, failed: &FailureIndex) -> WebhookResult<()>;
}

/// In-memory webhook storage for tests and ephemeral deployments.
#[derive(Default)]
pub struct InMemoryWebhookStorage {
    registrations: RwLock<RegistrationMap>,
    history: RwLock<Vec<DeliveryAttempt>>,
    failed: RwLock<FailureIndex>,
}

impl InMemoryWebhookStorage {
    /// Creates a new in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl WebhookStorage for InMemoryWebhookStorage {
    async fn load_registrations(&self) -> WebhookResult<RegistrationMap> {
        Ok(self.registrations.read().await.clone())
    }

    async fn save_registrations(&self, registrations: &RegistrationMap) -> WebhookResult<()> {
        *self.registrations.write().await = registrations.clone();
        Ok(())
    }

    async fn load_history(&self) -> WebhookResult<Vec<DeliveryAttempt>> {
        Ok(self.history.read().await.clone())
    }

    async fn save_history(&self, history: &[DeliveryAttempt]) -> WebhookResult<()> {
        *self.history.write().await = history.to_vec();
        Ok(())
    }

    async fn load_failed(&self) -> WebhookResult<FailureIndex> {
        Ok(self.failed.read().await.clone())
    }

    async fn save_failed(&self, failed: &FailureIndex) -> WebhookResult<()> {
        *self.failed.write().await = failed.clone();
        Ok(())
    }
}

/// Stores each document as a JSON file inside one directory.
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    dir: PathBuf,
}

impl JsonFileStorage {
    pub const REGISTRATIONS_FILE: &'static str = "webhooks.json";
    pub const HISTORY_FILE: &'static str = "webhook_delivery_history.json";
    pub const FAILED_FILE: &'static str = "webhook_failed_deliveries.json";

    /// Creates a store rooted at `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read<T: DeserializeOwned + Default>(&self, name: &str) -> WebhookResult<T> {
        let path = self.dir.join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> WebhookResult<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let content = serde_json::to_string_pretty(value)?;
        let path = self.dir.join(name);
        let tmp = self.dir.join(format!("{}.tmp", name));

        tokio::fs::write(&tmp, content).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl WebhookStorage for JsonFileStorage {
    async fn load_registrations(&self) -> WebhookResult<RegistrationMap> {
        self.read(Self::REGISTRATIONS_FILE).await
    }

    async fn save_registrations(&self, registrations: &RegistrationMap) -> WebhookResult<()> {
        self.write(Self::REGISTRATIONS_FILE, registrations).await
    }

    async fn load_history(&self) -> WebhookResult<Vec<DeliveryAttempt>> {
        self.read(Self::HISTORY_FILE).await
    }

    async fn save_history(&self, history: &[DeliveryAttempt]) -> WebhookResult<()> {
        self.write(Self::HISTORY_FILE, history).await
    }

    async fn load_failed(&self) -> WebhookResult<FailureIndex> {
        self.read(Self::FAILED_FILE).await
    }

    async fn save_failed(&self, failed: &FailureIndex) -> WebhookResult<()> {
        self.write(Self::FAILED_FILE, failed).await
    }
}
