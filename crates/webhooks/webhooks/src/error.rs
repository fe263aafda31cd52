//! Webhook error types.

use thiserror::Error;

use crate::signature::SignatureError;

/// Result type for webhook operations.
pub type WebhookResult<T> = Result<T, WebhookError>;

/// Error type for webhook operations.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// A registration or update was rejected before any state changed.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Webhook not found.
    #[error("Webhook not found: {0}")]
    NotFound(String),

    /// Signing or verification failed.
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    /// A delivery job carried no usable secret.
    #[error("No secret available for webhook {0}")]
    MissingSecret(String),

    /// Network-level delivery failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Timeout.
    #[error("Request timeout")]
    Timeout,

    /// Payload could not be serialized or parsed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Storage error.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WebhookError {
    /// Returns true for errors raised by input validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, WebhookError::Validation(_))
    }
}

impl From<serde_json::Error> for WebhookError {
    fn from(err: serde_json::Error) -> Self {
        WebhookError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for WebhookError {
    fn from(err: std::io::Error) -> Self {
        WebhookError::Storage(err.to_string())
    }
}

#[cfg(feature = "http-client")]
impl From<reqwest::Error> for WebhookError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            WebhookError::Timeout
        } else {
            WebhookError::Transport(err.to_string())
        }
    }
}
