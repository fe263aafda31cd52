//! Webhook subsystem configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{WebhookError, WebhookResult};
use crate::retry::{Backoff, RetryPolicy};
use crate::signature::DEFAULT_TIMESTAMP_TOLERANCE_SECS;

/// Configuration for the registry, queue and dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Directory holding the JSON documents.
    pub data_dir: PathBuf,
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Base delay between attempts.
    pub retry_delay_ms: u64,
    pub backoff: Backoff,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
    /// How often idle workers recheck their queue.
    pub poll_interval_ms: u64,
    /// Number of delivery workers. Jobs for one webhook always share a worker.
    pub worker_count: usize,
    /// Attempt records kept in memory.
    pub history_limit: usize,
    /// Dispatched events kept for history queries.
    pub event_history_capacity: usize,
    /// Clock skew accepted when validating inbound requests.
    pub timestamp_tolerance_secs: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("datastore"),
            max_retries: 3,
            retry_delay_ms: 60_000,
            backoff: Backoff::Fixed,
            request_timeout_ms: 30_000,
            poll_interval_ms: 1_000,
            worker_count: 1,
            history_limit: 1_000,
            event_history_capacity: 1_000,
            timestamp_tolerance_secs: DEFAULT_TIMESTAMP_TOLERANCE_SECS,
        }
    }
}

impl WebhookConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn worker_count(mut self, workers: usize) -> Self {
        self.worker_count = workers;
        self
    }

    pub fn history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit;
        self
    }

    pub fn event_history_capacity(mut self, capacity: usize) -> Self {
        self.event_history_capacity = capacity;
        self
    }

    pub fn timestamp_tolerance_secs(mut self, secs: u64) -> Self {
        self.timestamp_tolerance_secs = secs;
        self
    }

    /// Retry policy derived from the retry settings.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::fixed(self.max_retries, Duration::from_millis(self.retry_delay_ms))
            .backoff(self.backoff)
    }

    pub fn request_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval_duration(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Rejects settings the queue cannot run with.
    pub fn validate(&self) -> WebhookResult<()> {
        if self.worker_count == 0 {
            return Err(WebhookError::Config("worker_count must be at least 1".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(WebhookError::Config("poll_interval_ms must be positive".to_string()));
        }
        if self.request_timeout_ms == 0 {
            return Err(WebhookError::Config(
                "request_timeout_ms must be positive".to_string(),
            ));
        }
        if self.history_limit == 0 || self.event_history_capacity == 0 {
            return Err(WebhookError::Config("history limits must be positive".to_string()));
        }
        Ok(())
    }
}
