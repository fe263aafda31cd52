//! Delivery jobs, attempt records and the subscriber lookup used by the queue.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::registration::WebhookSecret;

/// Longest response body kept in an attempt record.
pub const MAX_RESPONSE_TEXT: usize = 1024;

/// One payload to deliver to one subscriber.
#[derive(Debug, Clone)]
pub struct DeliveryJob {
    /// Target webhook.
    pub webhook_id: String,
    /// Event type, sent as `X-Event-Type`.
    pub event_type: String,
    /// Body to send.
    pub payload: Value,
    /// Target URL.
    pub url: String,
    /// Signing secret.
    pub secret: WebhookSecret,
}

impl DeliveryJob {
    /// Creates a new delivery job.
    pub fn new(
        webhook_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: Value,
        url: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            webhook_id: webhook_id.into(),
            event_type: event_type.into(),
            payload,
            url: url.into(),
            secret: WebhookSecret::new(secret),
        }
    }
}

/// Log entry for one HTTP attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryAttempt {
    /// Webhook ID.
    pub webhook_id: String,
    /// Event type.
    pub event_type: String,
    /// Serialized body exactly as sent.
    pub payload: String,
    /// Target URL.
    pub url: String,
    /// 1-based attempt number within the job.
    pub attempt_number: u32,
    /// When the attempt finished.
    pub timestamp: DateTime<Utc>,
    /// HTTP status code (if received).
    pub status_code: Option<u16>,
    /// Response body (truncated).
    pub response_text: Option<String>,
    /// Error message (if failed).
    pub error_message: Option<String>,
    /// Duration in milliseconds.
    pub duration_ms: Option<f64>,
}

impl DeliveryAttempt {
    pub(crate) fn started(job: &DeliveryJob, payload: &str, attempt_number: u32) -> Self {
        Self {
            webhook_id: job.webhook_id.clone(),
            event_type: job.event_type.clone(),
            payload: payload.to_string(),
            url: job.url.clone(),
            attempt_number,
            timestamp: Utc::now(),
            status_code: None,
            response_text: None,
            error_message: None,
            duration_ms: None,
        }
    }

    /// True when the subscriber answered with a 2xx status.
    pub fn succeeded(&self) -> bool {
        matches!(self.status_code, Some(status) if (200..300).contains(&status))
    }
}

/// How a job left the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// A 2xx response was received.
    Delivered { attempts: u32 },
    /// Every attempt failed.
    Exhausted { attempts: u32 },
    /// The job was dropped before finishing, e.g. on shutdown or a signing error.
    Abandoned { attempts: u32 },
}

impl JobOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, JobOutcome::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match *self {
            JobOutcome::Delivered { attempts }
            | JobOutcome::Exhausted { attempts }
            | JobOutcome::Abandoned { attempts } => attempts,
        }
    }
}

/// Lookup the queue uses to reach live subscriber state.
#[async_trait]
pub trait SubscriberDirectory: Send + Sync {
    /// Current secret of a registered webhook.
    async fn secret_for(&self, webhook_id: &str) -> Option<WebhookSecret>;

    /// Records the result of one attempt on the webhook's counters.
    async fn record_attempt(&self, webhook_id: &str, attempt_number: u32, succeeded: bool);
}

pub(crate) fn truncate_response(mut text: String) -> String {
    if text.len() > MAX_RESPONSE_TEXT {
        let mut end = MAX_RESPONSE_TEXT;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        text.truncate(end);
    }
    text
}
