//! End-to-end tests for registration, dispatch and queued delivery.
//!
//! Tests cover:
//! - Input validation and subscription routing
//! - Retry accounting with a scripted transport
//! - Background workers and per-webhook ordering
//! - Persistence across restarts with the JSON file store

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value, json};

use adcc_webhooks::{
    DeliveryTransport, InMemoryWebhookStorage, JsonFileStorage, NewWebhook, SubscriberDirectory,
    TransportResponse, WebhookConfig, WebhookHeaders, WebhookRegistry, WebhookResult,
    WebhookSecret, WebhookSystem, events,
};

/// Replies with scripted statuses and records every request.
struct MockTransport {
    statuses: Mutex<VecDeque<u16>>,
    fallback: u16,
    requests: Mutex<Vec<(String, String)>>,
}

impl MockTransport {
    fn always(status: u16) -> Arc<Self> {
        Self::scripted(&[], status)
    }

    fn scripted(statuses: &[u16], fallback: u16) -> Arc<Self> {
        Arc::new(Self {
            statuses: Mutex::new(statuses.iter().copied().collect()),
            fallback,
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn bodies_by_url(&self) -> BTreeMap<String, Vec<Value>> {
        let mut by_url: BTreeMap<String, Vec<Value>> = BTreeMap::new();
        for (url, body) in self.requests.lock().unwrap().iter() {
            by_url
                .entry(url.clone())
                .or_default()
                .push(serde_json::from_str(body).unwrap());
        }
        by_url
    }
}

#[async_trait]
impl DeliveryTransport for MockTransport {
    async fn post(
        &self,
        url: &str,
        _headers: &WebhookHeaders,
        body: &str,
        _timeout: Duration,
    ) -> WebhookResult<TransportResponse> {
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), body.to_string()));
        let status = self
            .statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.fallback);
        Ok(TransportResponse::new(status, ""))
    }
}

fn config(max_retries: u32) -> WebhookConfig {
    WebhookConfig::new()
        .max_retries(max_retries)
        .retry_delay(Duration::from_millis(1))
        .poll_interval(Duration::from_millis(10))
}

async fn create_system(config: WebhookConfig, transport: Arc<MockTransport>) -> WebhookSystem {
    WebhookSystem::with_parts(config, Arc::new(InMemoryWebhookStorage::new()), transport)
        .await
        .unwrap()
}

fn data(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

async fn wait_until_drained(system: &WebhookSystem) {
    let drained = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let stats = system.queue().delivery_stats().await;
            if stats.pending_deliveries == 0 && stats.in_flight_deliveries == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "queue did not drain");
}

mod registration_tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_url_is_rejected() {
        let system = create_system(config(3), MockTransport::always(200)).await;

        let result = system
            .registry()
            .register(NewWebhook::new("not-a-url").events([events::TEST_EVENT]))
            .await;

        assert!(result.unwrap_err().is_validation());
        assert_eq!(system.registry().len().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_event_is_rejected_and_known_event_routes() {
        let system = create_system(config(3), MockTransport::always(200)).await;

        let result = system
            .registry()
            .register(NewWebhook::new("https://example.com/hook").events(["bogus.event"]))
            .await;
        assert!(result.unwrap_err().is_validation());

        let registered = system
            .registry()
            .register(NewWebhook::new("https://example.com/hook").events([events::EVENT_PROCESSED]))
            .await
            .unwrap();

        for event_type in WebhookRegistry::supported_events() {
            let subscribers = system.registry().webhooks_for_event(event_type).await;
            if event_type == events::EVENT_PROCESSED {
                assert_eq!(subscribers.len(), 1);
                assert_eq!(subscribers[0].id, registered.id);
            } else {
                assert!(subscribers.is_empty(), "{} should have no subscribers", event_type);
            }
        }
    }

    #[tokio::test]
    async fn test_lookups_do_not_reveal_secret() {
        let system = create_system(config(3), MockTransport::always(200)).await;
        let registered = system
            .registry()
            .register(NewWebhook::new("https://example.com/hook").events([events::USER_LOGIN]))
            .await
            .unwrap();

        let webhook = system.registry().get_webhook(&registered.id).await.unwrap();
        assert_eq!(webhook.url, "https://example.com/hook");

        let listed = serde_json::to_string(&system.registry().list_webhooks().await).unwrap();
        let routed = serde_json::to_string(
            &system.registry().webhooks_for_event(events::USER_LOGIN).await,
        )
        .unwrap();
        assert!(!serde_json::to_string(&webhook).unwrap().contains(&registered.secret));
        assert!(!listed.contains(&registered.secret));
        assert!(!routed.contains(&registered.secret));
    }

    #[tokio::test]
    async fn test_unregister_twice() {
        let system = create_system(config(3), MockTransport::always(200)).await;
        let registered = system
            .registry()
            .register(NewWebhook::new("https://example.com/hook").events([events::TEST_EVENT]))
            .await
            .unwrap();

        assert!(system.registry().unregister(&registered.id).await);
        assert!(!system.registry().unregister(&registered.id).await);
    }
}

mod delivery_tests {
    use super::*;

    #[tokio::test]
    async fn test_always_failing_endpoint_exhausts_retries() {
        let transport = MockTransport::always(500);
        let system = create_system(config(3), transport.clone()).await;
        system
            .registry()
            .register(NewWebhook::new("https://example.com/hook").events([events::TEST_EVENT]))
            .await
            .unwrap();

        system.dispatcher().test_event("ping").await;
        system.queue().run_until_idle().await;

        assert_eq!(transport.calls(), 4);
        let stats = system.queue().delivery_stats().await;
        assert_eq!(stats.total_deliveries, 4);
        assert_eq!(stats.successful_deliveries, 0);
        assert!(stats.failed_deliveries >= 1);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let transport = MockTransport::always(200);
        let system = create_system(config(3), transport.clone()).await;
        let registered = system
            .registry()
            .register(NewWebhook::new("https://example.com/hook").events([events::TEST_EVENT]))
            .await
            .unwrap();

        system.dispatcher().test_event("ping").await;
        system.queue().run_until_idle().await;

        assert_eq!(transport.calls(), 1);
        let stats = system.queue().delivery_stats().await;
        assert_eq!(stats.total_deliveries, 1);
        assert_eq!(stats.successful_deliveries, 1);
        assert_eq!(stats.failed_attempts, 0);

        let webhook = system.registry().webhook_stats(&registered.id).await.unwrap();
        assert_eq!(webhook.retry_count, 0);
        assert_eq!(webhook.success_rate, 1.0);
    }

    #[tokio::test]
    async fn test_end_to_end_with_workers() {
        let transport = MockTransport::always(200);
        let system = create_system(config(3), transport.clone()).await;
        let registered = system
            .registry()
            .register(NewWebhook::new("https://example.com/hook").events([events::TEST_EVENT]))
            .await
            .unwrap();

        system.start().await;
        let ids = system
            .dispatcher()
            .dispatch(events::TEST_EVENT, data(json!({"k": 1})))
            .await;
        assert_eq!(ids, vec![registered.id]);

        wait_until_drained(&system).await;
        system.stop().await;

        let bodies = transport.bodies_by_url();
        let sent = &bodies["https://example.com/hook"];
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["data"], json!({"k": 1}));
        assert_eq!(sent[0]["event_type"], events::TEST_EVENT);
    }

    #[tokio::test]
    async fn test_sharded_workers_keep_per_webhook_order() {
        let transport = MockTransport::scripted(&[500, 500], 200);
        let system = create_system(config(3).worker_count(4), transport.clone()).await;

        for i in 0..3 {
            system
                .registry()
                .register(
                    NewWebhook::new(format!("https://hooks{}.example.com", i))
                        .events([events::SYSTEM_WARNING]),
                )
                .await
                .unwrap();
        }

        system.start().await;
        for seq in 0..5 {
            system
                .dispatcher()
                .system_warning(&format!("warning {}", seq), "scheduler")
                .await;
        }
        wait_until_drained(&system).await;
        system.stop().await;

        let stats = system.queue().delivery_stats().await;
        assert_eq!(stats.successful_deliveries, 15);

        for (url, bodies) in transport.bodies_by_url() {
            let mut messages: Vec<String> = bodies
                .iter()
                .map(|b| b["data"]["message"].as_str().unwrap().to_string())
                .collect();
            messages.dedup();
            let expected: Vec<String> = (0..5).map(|seq| format!("warning {}", seq)).collect();
            assert_eq!(messages, expected, "out of order deliveries to {}", url);
        }
    }
}

mod persistence_tests {
    use super::*;

    #[tokio::test]
    async fn test_state_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(0).data_dir(dir.path());

        let registered = {
            let system = WebhookSystem::with_parts(
                config.clone(),
                Arc::new(JsonFileStorage::new(dir.path())),
                MockTransport::always(500),
            )
            .await
            .unwrap();

            let registered = system
                .registry()
                .register(NewWebhook::new("https://example.com/hook").events([events::USER_LOGIN]))
                .await
                .unwrap();
            system.dispatcher().user_login("alice", "admin", Some("10.0.0.1"), None).await;
            system.queue().run_until_idle().await;
            registered
        };

        assert!(dir.path().join(JsonFileStorage::REGISTRATIONS_FILE).exists());
        assert!(dir.path().join(JsonFileStorage::HISTORY_FILE).exists());
        assert!(dir.path().join(JsonFileStorage::FAILED_FILE).exists());

        let system = WebhookSystem::with_parts(
            config,
            Arc::new(JsonFileStorage::new(dir.path())),
            MockTransport::always(200),
        )
        .await
        .unwrap();

        let webhook = system.registry().get_webhook(&registered.id).await.unwrap();
        assert_eq!(
            system.registry().secret_for(&registered.id).await,
            Some(WebhookSecret::new(registered.secret.clone()))
        );
        assert_eq!(webhook.failure_count, 1);
        assert_eq!(system.queue().history(10).await.len(), 1);

        assert_eq!(system.queue().retry_failed_deliveries(None).await, 1);
        system.queue().run_until_idle().await;
        assert!(system.queue().failed_deliveries(None).await.is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_registrations_start_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(JsonFileStorage::REGISTRATIONS_FILE), "[oops").unwrap();

        let system = WebhookSystem::with_parts(
            config(0),
            Arc::new(JsonFileStorage::new(dir.path())),
            MockTransport::always(200),
        )
        .await
        .unwrap();

        assert_eq!(system.registry().len().await, 0);
    }
}
