//! Asynchronous delivery queue.
//!
//! Jobs are sharded by webhook id so that deliveries to one subscriber stay
//! in FIFO order while different subscribers can proceed in parallel. Each
//! shard is drained by one background worker that retries failed attempts
//! according to the configured [`RetryPolicy`].

use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;

use crate::config::WebhookConfig;
use crate::delivery::{
    DeliveryAttempt, DeliveryJob, JobOutcome, SubscriberDirectory, truncate_response,
};
use crate::error::{WebhookError, WebhookResult};
use crate::headers::build_headers;
use crate::retry::RetryPolicy;
use crate::storage::{FailureIndex, WebhookStorage};
use crate::transport::DeliveryTransport;

/// Queue counters and sizes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryStats {
    /// HTTP attempts made since the queue was opened.
    pub total_deliveries: u64,
    /// Attempts answered with a 2xx status.
    pub successful_deliveries: u64,
    /// Jobs that ended without a 2xx response.
    pub failed_deliveries: u64,
    /// Attempts that did not get a 2xx response.
    pub failed_attempts: u64,
    /// `successful_deliveries / total_deliveries`, 0 when nothing was sent.
    pub success_rate: f64,
    pub pending_deliveries: usize,
    pub in_flight_deliveries: usize,
    /// Webhooks with at least one recorded failed attempt.
    pub failed_webhook_count: usize,
    pub history_size: usize,
    pub running: bool,
}

struct Shard {
    jobs: Mutex<VecDeque<DeliveryJob>>,
    notify: Notify,
}

#[derive(Default)]
struct Ledger {
    history: VecDeque<DeliveryAttempt>,
    failed: FailureIndex,
    total_attempts: u64,
    successful_attempts: u64,
    failed_attempts: u64,
    failed_jobs: u64,
}

impl Ledger {
    fn push_history(&mut self, attempt: DeliveryAttempt, limit: usize) {
        self.history.push_back(attempt);
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    fn push_failure(&mut self, attempt: DeliveryAttempt, limit: usize) {
        let attempts = self.failed.entry(attempt.webhook_id.clone()).or_default();
        attempts.push(attempt);
        if attempts.len() > limit {
            let excess = attempts.len() - limit;
            attempts.drain(..excess);
        }
    }
}

struct QueueInner {
    shards: Vec<Shard>,
    ledger: Mutex<Ledger>,
    in_flight: AtomicUsize,
    retry: RetryPolicy,
    request_timeout: Duration,
    poll_interval: Duration,
    history_limit: usize,
    transport: Arc<dyn DeliveryTransport>,
    storage: Arc<dyn WebhookStorage>,
    directory: Option<Arc<dyn SubscriberDirectory>>,
    shutdown: watch::Sender<bool>,
}

/// Delivery queue with background workers.
pub struct DeliveryQueue {
    inner: Arc<QueueInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl DeliveryQueue {
    /// Opens the queue, loading persisted history and the failure index.
    ///
    /// Unreadable documents are logged and replaced by empty state. When a
    /// `directory` is given, attempt results are reported to it and
    /// [`retry_failed_deliveries`](Self::retry_failed_deliveries) can look up
    /// current secrets.
    pub async fn open(
        config: &WebhookConfig,
        storage: Arc<dyn WebhookStorage>,
        transport: Arc<dyn DeliveryTransport>,
        directory: Option<Arc<dyn SubscriberDirectory>>,
    ) -> Self {
        let history_limit = config.history_limit.max(1);

        let mut ledger = Ledger::default();
        match storage.load_history().await {
            Ok(history) => {
                let skip = history.len().saturating_sub(history_limit);
                ledger.history = history.into_iter().skip(skip).collect();
            }
            Err(e) => tracing::error!(error = %e, "Failed to load delivery history"),
        }
        match storage.load_failed().await {
            Ok(failed) => ledger.failed = failed,
            Err(e) => tracing::error!(error = %e, "Failed to load failed deliveries"),
        }

        let shards = (0..config.worker_count.max(1))
            .map(|_| Shard {
                jobs: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            })
            .collect();
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(QueueInner {
                shards,
                ledger: Mutex::new(ledger),
                in_flight: AtomicUsize::new(0),
                retry: config.retry_policy(),
                request_timeout: config.request_timeout_duration(),
                poll_interval: config.poll_interval_duration(),
                history_limit,
                transport,
                storage,
                directory,
                shutdown,
            }),
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Adds a job to its webhook's shard. Never blocks on delivery.
    pub async fn enqueue(&self, job: DeliveryJob) -> WebhookResult<()> {
        if job.secret.is_empty() {
            return Err(WebhookError::MissingSecret(job.webhook_id));
        }

        let shard = self.inner.shard_for(&job.webhook_id);
        tracing::debug!(
            webhook_id = %job.webhook_id,
            event_type = %job.event_type,
            shard,
            "Queued webhook delivery"
        );

        self.inner.shards[shard].jobs.lock().await.push_back(job);
        self.inner.shards[shard].notify.notify_one();
        Ok(())
    }

    /// Spawns one worker per shard. A second call only logs a warning.
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            tracing::warn!("Delivery queue already running");
            return;
        }

        self.inner.shutdown.send_replace(false);
        for shard in 0..self.inner.shards.len() {
            let inner = Arc::clone(&self.inner);
            let shutdown = self.inner.shutdown.subscribe();
            workers.push(tokio::spawn(run_worker(inner, shard, shutdown)));
        }

        tracing::info!(workers = workers.len(), "Delivery queue started");
    }

    /// Stops the workers and flushes history and the failure index.
    ///
    /// An attempt already on the wire finishes; a job waiting for its next
    /// retry is abandoned. Jobs still queued stay in memory.
    pub async fn stop(&self) {
        let handles = std::mem::take(&mut *self.workers.lock().await);
        if handles.is_empty() {
            tracing::warn!("Delivery queue is not running");
            return;
        }

        self.inner.shutdown.send_replace(true);
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Delivery worker terminated abnormally");
            }
        }

        self.inner.persist().await;
        tracing::info!("Delivery queue stopped");
    }

    pub async fn is_running(&self) -> bool {
        !self.workers.lock().await.is_empty()
    }

    /// Delivers the next queued job on the calling task.
    pub async fn process_next(&self) -> Option<JobOutcome> {
        for shard in 0..self.inner.shards.len() {
            if let Some(job) = self.inner.pop(shard).await {
                let mut shutdown = self.inner.shutdown.subscribe();
                return Some(self.inner.process(job, &mut shutdown).await);
            }
        }
        None
    }

    /// Drains every shard on the calling task. Returns the number of jobs processed.
    pub async fn run_until_idle(&self) -> usize {
        let mut processed = 0;
        while self.process_next().await.is_some() {
            processed += 1;
        }
        processed
    }

    pub async fn delivery_stats(&self) -> DeliveryStats {
        let mut pending = 0;
        for shard in &self.inner.shards {
            pending += shard.jobs.lock().await.len();
        }
        let running = self.is_running().await;

        let ledger = self.inner.ledger.lock().await;
        DeliveryStats {
            total_deliveries: ledger.total_attempts,
            successful_deliveries: ledger.successful_attempts,
            failed_deliveries: ledger.failed_jobs,
            failed_attempts: ledger.failed_attempts,
            success_rate: if ledger.total_attempts > 0 {
                ledger.successful_attempts as f64 / ledger.total_attempts as f64
            } else {
                0.0
            },
            pending_deliveries: pending,
            in_flight_deliveries: self.inner.in_flight.load(Ordering::SeqCst),
            failed_webhook_count: ledger.failed.len(),
            history_size: ledger.history.len(),
            running,
        }
    }

    /// Most recent attempts, oldest first.
    pub async fn history(&self, limit: usize) -> Vec<DeliveryAttempt> {
        let ledger = self.inner.ledger.lock().await;
        let skip = ledger.history.len().saturating_sub(limit);
        ledger.history.iter().skip(skip).cloned().collect()
    }

    /// Failed attempts for one webhook, or for all of them.
    pub async fn failed_deliveries(&self, webhook_id: Option<&str>) -> Vec<DeliveryAttempt> {
        let ledger = self.inner.ledger.lock().await;
        match webhook_id {
            Some(id) => ledger.failed.get(id).cloned().unwrap_or_default(),
            None => ledger.failed.values().flatten().cloned().collect(),
        }
    }

    /// Requeues each distinct failed payload once, signed with the webhook's
    /// current secret. Webhooks that are no longer registered are skipped.
    pub async fn retry_failed_deliveries(&self, webhook_id: Option<&str>) -> usize {
        let Some(directory) = self.inner.directory.clone() else {
            tracing::warn!("No subscriber directory attached, cannot retry failed deliveries");
            return 0;
        };

        let candidates = self.failed_deliveries(webhook_id).await;
        let mut seen = BTreeSet::new();
        let mut requeued = 0;

        for attempt in candidates {
            if !seen.insert((attempt.webhook_id.clone(), attempt.payload.clone())) {
                continue;
            }

            let Some(secret) = directory.secret_for(&attempt.webhook_id).await else {
                tracing::warn!(webhook_id = %attempt.webhook_id, "Skipping retry for unknown webhook");
                continue;
            };

            let payload: Value = match serde_json::from_str(&attempt.payload) {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(webhook_id = %attempt.webhook_id, error = %e, "Skipping unparseable payload");
                    continue;
                }
            };

            let job = DeliveryJob {
                webhook_id: attempt.webhook_id,
                event_type: attempt.event_type,
                payload,
                url: attempt.url,
                secret,
            };
            match self.enqueue(job).await {
                Ok(()) => requeued += 1,
                Err(e) => tracing::warn!(error = %e, "Failed to requeue delivery"),
            }
        }

        tracing::info!(requeued, "Requeued failed deliveries");
        requeued
    }

    /// Drops history and failure records older than `days`. Returns the
    /// number of history entries removed.
    pub async fn cleanup_old_history(&self, days: u32) -> usize {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days));

        let removed = {
            let mut ledger = self.inner.ledger.lock().await;
            let before = ledger.history.len();
            ledger.history.retain(|attempt| attempt.timestamp >= cutoff);
            let removed = before - ledger.history.len();

            for attempts in ledger.failed.values_mut() {
                attempts.retain(|attempt| attempt.timestamp >= cutoff);
            }
            ledger.failed.retain(|_, attempts| !attempts.is_empty());
            removed
        };

        self.inner.persist().await;
        tracing::info!(removed, days, "Cleaned up delivery history");
        removed
    }
}

impl QueueInner {
    fn shard_for(&self, webhook_id: &str) -> usize {
        shard_index(webhook_id, self.shards.len())
    }

    async fn pop(&self, shard: usize) -> Option<DeliveryJob> {
        let mut jobs = self.shards[shard].jobs.lock().await;
        let job = jobs.pop_front()?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(job)
    }

    async fn process(&self, job: DeliveryJob, shutdown: &mut watch::Receiver<bool>) -> JobOutcome {
        let outcome = self.deliver(job, shutdown).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.persist().await;
        outcome
    }

    async fn deliver(&self, job: DeliveryJob, shutdown: &mut watch::Receiver<bool>) -> JobOutcome {
        let payload = job.payload.to_string();
        let max_attempts = self.retry.max_attempts();

        for attempt_number in 1..=max_attempts {
            let mut attempt = DeliveryAttempt::started(&job, &payload, attempt_number);

            // Signed per attempt so X-Timestamp stays inside the receiver's tolerance.
            let headers = match build_headers(
                &payload,
                job.secret.expose(),
                &job.event_type,
                &job.webhook_id,
            ) {
                Ok(headers) => headers,
                Err(e) => {
                    tracing::error!(webhook_id = %job.webhook_id, error = %e, "Failed to sign webhook payload");
                    attempt.error_message = Some(e.to_string());
                    self.record(attempt, true).await;
                    return JobOutcome::Abandoned {
                        attempts: attempt_number,
                    };
                }
            };

            let started = Instant::now();
            let result = self
                .transport
                .post(&job.url, &headers, &payload, self.request_timeout)
                .await;
            attempt.duration_ms = Some(started.elapsed().as_secs_f64() * 1000.0);
            attempt.timestamp = Utc::now();

            match result {
                Ok(response) => {
                    attempt.status_code = Some(response.status);
                    let body = truncate_response(response.body);
                    if !attempt.succeeded() {
                        attempt.error_message = Some(format!("HTTP {}: {}", response.status, body));
                    }
                    attempt.response_text = Some(body);
                }
                Err(e) => attempt.error_message = Some(e.to_string()),
            }

            if attempt.succeeded() {
                tracing::info!(
                    webhook_id = %job.webhook_id,
                    event_type = %job.event_type,
                    attempt = attempt_number,
                    "Webhook delivered"
                );
                self.record(attempt, true).await;
                return JobOutcome::Delivered {
                    attempts: attempt_number,
                };
            }

            tracing::warn!(
                webhook_id = %job.webhook_id,
                attempt = attempt_number,
                max_attempts,
                error = attempt.error_message.as_deref().unwrap_or_default(),
                "Webhook delivery attempt failed"
            );
            self.record(attempt, attempt_number == max_attempts).await;

            if let Some(delay) = self.retry.delay_after(attempt_number) {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => {
                        tracing::warn!(
                            webhook_id = %job.webhook_id,
                            attempt = attempt_number,
                            "Shutdown during retry wait, abandoning delivery"
                        );
                        self.ledger.lock().await.failed_jobs += 1;
                        return JobOutcome::Abandoned {
                            attempts: attempt_number,
                        };
                    }
                }
            }
        }

        tracing::error!(
            webhook_id = %job.webhook_id,
            event_type = %job.event_type,
            max_attempts,
            "Webhook delivery failed after all retries"
        );
        JobOutcome::Exhausted {
            attempts: max_attempts,
        }
    }

    /// Books one attempt. `job_finished` marks the last attempt of its job.
    async fn record(&self, attempt: DeliveryAttempt, job_finished: bool) {
        let succeeded = attempt.succeeded();
        let webhook_id = attempt.webhook_id.clone();
        let attempt_number = attempt.attempt_number;

        {
            let mut ledger = self.ledger.lock().await;
            ledger.total_attempts += 1;
            if succeeded {
                ledger.successful_attempts += 1;
                ledger.failed.remove(&webhook_id);
            } else {
                ledger.failed_attempts += 1;
                if job_finished {
                    ledger.failed_jobs += 1;
                }
                ledger.push_failure(attempt.clone(), self.history_limit);
            }
            ledger.push_history(attempt, self.history_limit);
        }

        if let Some(directory) = &self.directory {
            directory
                .record_attempt(&webhook_id, attempt_number, succeeded)
                .await;
        }
    }

    async fn persist(&self) {
        let mut ledger = self.ledger.lock().await;
        if let Err(e) = self.storage.save_history(ledger.history.make_contiguous()).await {
            tracing::error!(error = %e, "Failed to save delivery history");
        }
        if let Err(e) = self.storage.save_failed(&ledger.failed).await {
            tracing::error!(error = %e, "Failed to save failed deliveries");
        }
    }
}

fn shard_index(webhook_id: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    webhook_id.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

async fn run_worker(inner: Arc<QueueInner>, shard: usize, mut shutdown: watch::Receiver<bool>) {
    tracing::debug!(shard, "Delivery worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        if let Some(job) = inner.pop(shard).await {
            inner.process(job, &mut shutdown).await;
            continue;
        }

        tokio::select! {
            _ = inner.shards[shard].notify.notified() => {}
            _ = tokio::time::sleep(inner.poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    tracing::debug!(shard, "Delivery worker stopped");
}
