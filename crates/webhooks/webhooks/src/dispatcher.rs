//! Event dispatcher: turns application events into queued deliveries.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::RwLock;

use crate::delivery::DeliveryJob;
use crate::envelope::{EventEnvelope, EventPriority};
use crate::error::WebhookError;
use crate::events;
use crate::queue::DeliveryQueue;
use crate::registry::WebhookRegistry;

/// Default number of records returned by [`EventDispatcher::event_history`].
pub const DEFAULT_HISTORY_QUERY_LIMIT: usize = 100;

/// Summary of one dispatched event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_type: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    pub priority: EventPriority,
    /// Subscribers the event was queued for.
    pub webhook_count: usize,
    /// Scalars verbatim; arrays as `list[N]`, objects as `dict[N]`.
    pub data_summary: Map<String, Value>,
}

/// Per-subscriber enqueue failure.
#[derive(Debug)]
pub struct DispatchFailure {
    pub webhook_id: String,
    pub error: WebhookError,
}

/// Result of a dispatch, split by subscriber.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Webhook ids a job was queued for.
    pub queued: Vec<String>,
    pub failed: Vec<DispatchFailure>,
}

impl DispatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Filter for [`EventDispatcher::event_history`].
#[derive(Debug, Clone)]
pub struct EventHistoryQuery {
    pub event_type: Option<String>,
    pub source: Option<String>,
    pub limit: usize,
}

impl Default for EventHistoryQuery {
    fn default() -> Self {
        Self {
            event_type: None,
            source: None,
            limit: DEFAULT_HISTORY_QUERY_LIMIT,
        }
    }
}

impl EventHistoryQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    fn matches(&self, record: &EventRecord) -> bool {
        self.event_type.as_deref().is_none_or(|t| t == record.event_type)
            && self.source.as_deref().is_none_or(|s| s == record.source)
    }
}

/// Counts over the retained event history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStats {
    pub total_events: usize,
    pub events_by_type: BTreeMap<String, usize>,
    pub events_by_source: BTreeMap<String, usize>,
    pub events_by_priority: BTreeMap<String, usize>,
}

/// Rating change carried by `athlete.rating_updated`.
#[derive(Debug, Clone, Serialize)]
pub struct RatingChange {
    pub athlete_id: String,
    pub athlete_name: String,
    pub age_class: String,
    pub old_rating: f64,
    pub new_rating: f64,
    pub match_count: u32,
}

/// Medal carried by `medal.awarded`.
#[derive(Debug, Clone, Serialize)]
pub struct MedalAward {
    pub athlete_id: String,
    pub athlete_name: String,
    pub event_id: String,
    pub event_name: String,
    pub medal_type: String,
    pub division: String,
}

/// Builds envelopes and fans them out to subscribers.
pub struct EventDispatcher {
    registry: Arc<WebhookRegistry>,
    queue: Arc<DeliveryQueue>,
    history: RwLock<VecDeque<EventRecord>>,
    capacity: usize,
}

impl EventDispatcher {
    pub fn new(registry: Arc<WebhookRegistry>, queue: Arc<DeliveryQueue>, capacity: usize) -> Self {
        Self {
            registry,
            queue,
            history: RwLock::new(VecDeque::new()),
            capacity: capacity.max(1),
        }
    }

    /// Queues `event_type` for every active subscriber and returns the ids
    /// that were queued. Subscribers that could not be queued are logged and
    /// skipped. Events nobody subscribes to are not recorded in the history.
    pub async fn dispatch_event(
        &self,
        event_type: &str,
        data: Map<String, Value>,
        source: &str,
        priority: EventPriority,
    ) -> Vec<String> {
        self.dispatch_event_detailed(event_type, data, source, priority)
            .await
            .queued
    }

    /// Like [`dispatch_event`](Self::dispatch_event), returning the failures too.
    pub async fn dispatch_event_detailed(
        &self,
        event_type: &str,
        data: Map<String, Value>,
        source: &str,
        priority: EventPriority,
    ) -> DispatchOutcome {
        let data_summary = summarize(&data);
        let envelope = EventEnvelope::new(event_type, data, source, priority);
        let mut outcome = DispatchOutcome::default();

        let payload = match envelope.to_value() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(event_type, error = %e, "Failed to serialize event envelope");
                return outcome;
            }
        };

        let subscribers = self.registry.subscribers(event_type).await;
        if subscribers.is_empty() {
            tracing::debug!(event_type, "No webhooks subscribed to event");
            return outcome;
        }

        for webhook in subscribers {
            let job = DeliveryJob {
                webhook_id: webhook.id.clone(),
                event_type: event_type.to_string(),
                payload: payload.clone(),
                url: webhook.url,
                secret: webhook.secret,
            };

            match self.queue.enqueue(job).await {
                Ok(()) => outcome.queued.push(webhook.id),
                Err(error) => {
                    tracing::error!(webhook_id = %webhook.id, event_type, error = %error, "Failed to queue webhook delivery");
                    outcome.failed.push(DispatchFailure {
                        webhook_id: webhook.id,
                        error,
                    });
                }
            }
        }

        self.record(EventRecord {
            event_type: event_type.to_string(),
            timestamp: envelope.timestamp,
            source: source.to_string(),
            priority,
            webhook_count: outcome.queued.len(),
            data_summary,
        })
        .await;

        tracing::info!(
            event_type,
            source,
            priority = %priority,
            webhook_count = outcome.queued.len(),
            "Dispatched event"
        );
        outcome
    }

    /// Dispatches with source `system` and normal priority.
    pub async fn dispatch(&self, event_type: &str, data: Map<String, Value>) -> Vec<String> {
        self.dispatch_event(event_type, data, "system", EventPriority::Normal)
            .await
    }

    // ==================== Typed events ====================

    pub async fn event_processed(
        &self,
        event_id: &str,
        event_name: &str,
        processing_time: f64,
        athlete_count: u64,
        match_count: u64,
    ) -> Vec<String> {
        let data = object(json!({
            "event_id": event_id,
            "event_name": event_name,
            "processing_time": processing_time,
            "athlete_count": athlete_count,
            "match_count": match_count,
            "status": "completed",
        }));
        self.dispatch_event(events::EVENT_PROCESSED, data, "data_processing", EventPriority::Normal)
            .await
    }

    pub async fn event_failed(
        &self,
        event_id: &str,
        event_name: &str,
        error_message: &str,
        error_type: &str,
    ) -> Vec<String> {
        let data = object(json!({
            "event_id": event_id,
            "event_name": event_name,
            "error_message": error_message,
            "error_type": error_type,
            "status": "failed",
        }));
        self.dispatch_event(events::EVENT_FAILED, data, "data_processing", EventPriority::High)
            .await
    }

    /// Adds `rating_change` (new minus old) to the payload.
    pub async fn athlete_rating_updated(&self, change: &RatingChange) -> Vec<String> {
        let mut data = to_object(change);
        data.insert(
            "rating_change".to_string(),
            json!(change.new_rating - change.old_rating),
        );
        self.dispatch_event(events::ATHLETE_RATING_UPDATED, data, "analytics", EventPriority::Normal)
            .await
    }

    pub async fn medal_awarded(&self, award: &MedalAward) -> Vec<String> {
        self.dispatch_event(events::MEDAL_AWARDED, to_object(award), "analytics", EventPriority::Normal)
            .await
    }

    pub async fn report_generated(
        &self,
        report_type: &str,
        report_name: &str,
        file_path: &str,
        record_count: u64,
        generation_time: f64,
    ) -> Vec<String> {
        let data = object(json!({
            "report_type": report_type,
            "report_name": report_name,
            "file_path": file_path,
            "record_count": record_count,
            "generation_time": generation_time,
        }));
        self.dispatch_event(events::REPORT_GENERATED, data, "reporting", EventPriority::Low)
            .await
    }

    pub async fn system_error(
        &self,
        error_message: &str,
        error_type: &str,
        component: &str,
        severity: &str,
    ) -> Vec<String> {
        let data = object(json!({
            "error_message": error_message,
            "error_type": error_type,
            "component": component,
            "severity": severity,
        }));
        self.dispatch_event(events::SYSTEM_ERROR, data, "system", EventPriority::High)
            .await
    }

    pub async fn system_warning(&self, message: &str, component: &str) -> Vec<String> {
        let data = object(json!({
            "message": message,
            "component": component,
        }));
        self.dispatch_event(events::SYSTEM_WARNING, data, "system", EventPriority::Normal)
            .await
    }

    pub async fn user_login(
        &self,
        username: &str,
        user_role: &str,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> Vec<String> {
        let data = object(json!({
            "username": username,
            "user_role": user_role,
            "ip_address": ip_address,
            "user_agent": user_agent,
            "action": "login",
        }));
        self.dispatch_event(events::USER_LOGIN, data, "authentication", EventPriority::Low)
            .await
    }

    pub async fn user_logout(&self, username: &str, session_duration_secs: u64) -> Vec<String> {
        let data = object(json!({
            "username": username,
            "session_duration": session_duration_secs,
            "action": "logout",
        }));
        self.dispatch_event(events::USER_LOGOUT, data, "authentication", EventPriority::Low)
            .await
    }

    pub async fn data_imported(&self, dataset: &str, record_count: u64, source_file: &str) -> Vec<String> {
        let data = object(json!({
            "dataset": dataset,
            "record_count": record_count,
            "source_file": source_file,
        }));
        self.dispatch_event(events::DATA_IMPORTED, data, "data_pipeline", EventPriority::Low)
            .await
    }

    pub async fn data_exported(&self, dataset: &str, record_count: u64, destination: &str) -> Vec<String> {
        let data = object(json!({
            "dataset": dataset,
            "record_count": record_count,
            "destination": destination,
        }));
        self.dispatch_event(events::DATA_EXPORTED, data, "data_pipeline", EventPriority::Low)
            .await
    }

    /// Health-check event for subscribers.
    pub async fn test_event(&self, message: &str) -> Vec<String> {
        let data = object(json!({ "message": message }));
        self.dispatch_event(events::TEST_EVENT, data, "system", EventPriority::Low)
            .await
    }

    // ==================== History ====================

    /// Most recent matching records, oldest first. A limit of 0 returns
    /// every match.
    pub async fn event_history(&self, query: &EventHistoryQuery) -> Vec<EventRecord> {
        let limit = match query.limit {
            0 => usize::MAX,
            limit => limit,
        };
        let history = self.history.read().await;
        let mut matching: Vec<EventRecord> = history
            .iter()
            .rev()
            .filter(|record| query.matches(record))
            .take(limit)
            .cloned()
            .collect();
        matching.reverse();
        matching
    }

    pub async fn event_stats(&self) -> EventStats {
        let history = self.history.read().await;
        let mut stats = EventStats {
            total_events: history.len(),
            ..EventStats::default()
        };

        for record in history.iter() {
            *stats.events_by_type.entry(record.event_type.clone()).or_default() += 1;
            *stats.events_by_source.entry(record.source.clone()).or_default() += 1;
            *stats
                .events_by_priority
                .entry(record.priority.as_str().to_string())
                .or_default() += 1;
        }
        stats
    }

    async fn record(&self, record: EventRecord) {
        let mut history = self.history.write().await;
        history.push_back(record);
        while history.len() > self.capacity {
            history.pop_front();
        }
    }
}

fn summarize(data: &Map<String, Value>) -> Map<String, Value> {
    data.iter()
        .map(|(key, value)| {
            let summary = match value {
                Value::Array(items) => Value::String(format!("list[{}]", items.len())),
                Value::Object(fields) => Value::String(format!("dict[{}]", fields.len())),
                scalar => scalar.clone(),
            };
            (key.clone(), summary)
        })
        .collect()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn to_object<T: Serialize>(value: &T) -> Map<String, Value> {
    match serde_json::to_value(value) {
        Ok(value) => object(value),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to serialize event data");
            Map::new()
        }
    }
}
