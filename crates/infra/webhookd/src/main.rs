//! ADCC webhook daemon binary.
//!
//! Usage: `adcc-webhookd [config.toml]`. Without an argument the path is read
//! from `ADCC_WEBHOOKD_CONFIG`; without either, defaults are used.

use adcc_webhookd::{DaemonConfig, WebhookDaemon, load_config};
use tracing_subscriber::EnvFilter;

const CONFIG_ENV: &str = "ADCC_WEBHOOKD_CONFIG";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok());

    let config = match &config_path {
        Some(path) => load_config(path)?,
        None => DaemonConfig::default(),
    };

    // RUST_LOG wins over the configured level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.server.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match &config_path {
        Some(path) => tracing::info!(path = %path, "Loaded configuration"),
        None => tracing::info!("No configuration file given, using defaults"),
    }

    let daemon = WebhookDaemon::new(config).await?;
    daemon
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await;

    Ok(())
}
