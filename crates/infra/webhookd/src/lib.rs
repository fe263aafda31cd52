//! # ADCC Webhook Daemon
//!
//! Runs the webhook delivery workers as a standalone service and prunes
//! stale subscribers and delivery records on a fixed interval.

mod config;

pub use config::{ConfigError, DaemonConfig, HousekeepingConfig, ServerConfig, load_config, parse_config};

use std::future::Future;
use std::time::Duration;

use adcc_webhooks::{HousekeepingReport, WebhookError, WebhookSystem};

/// Daemon error.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

/// The webhook daemon.
pub struct WebhookDaemon {
    config: DaemonConfig,
    system: WebhookSystem,
}

impl WebhookDaemon {
    /// Opens the webhook system described by `config`.
    pub async fn new(config: DaemonConfig) -> Result<Self, DaemonError> {
        let system = WebhookSystem::open(config.webhooks.clone()).await?;
        Ok(Self { config, system })
    }

    /// Creates a daemon around an already built system.
    pub fn with_system(config: DaemonConfig, system: WebhookSystem) -> Self {
        Self { config, system }
    }

    pub fn system(&self) -> &WebhookSystem {
        &self.system
    }

    /// Runs one housekeeping pass.
    pub async fn housekeeping(&self) -> HousekeepingReport {
        let settings = &self.config.housekeeping;
        let report = self
            .system
            .housekeeping(settings.inactive_days, settings.history_days)
            .await;
        tracing::info!(
            removed_webhooks = report.removed_webhooks,
            removed_attempts = report.removed_attempts,
            "Housekeeping finished"
        );
        report
    }

    /// Starts delivery and runs until `shutdown` resolves, then stops the
    /// workers and flushes delivery state.
    pub async fn run(&self, shutdown: impl Future<Output = ()>) {
        tracing::info!(
            data_dir = %self.config.webhooks.data_dir.display(),
            workers = self.config.webhooks.worker_count,
            webhooks = self.system.registry().len().await,
            "Starting webhook daemon"
        );
        self.system.start().await;

        let mut interval =
            tokio::time::interval(Duration::from_secs(self.config.housekeeping.interval_secs));
        // The first tick completes immediately.
        interval.tick().await;

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.housekeeping().await;
                }
            }
        }

        tracing::info!("Shutting down webhook daemon");
        self.system.stop().await;
    }
}
