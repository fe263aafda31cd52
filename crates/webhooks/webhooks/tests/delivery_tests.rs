//! HTTP delivery tests against a wiremock server.
//!
//! These exercise the reqwest transport end to end: signed headers, retry on
//! server errors, request timeouts and requeueing after an endpoint recovers.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, json};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

use adcc_webhooks::{
    EventEnvelope, HttpTransport, InMemoryWebhookStorage, NewWebhook, WebhookConfig,
    WebhookHeaders, WebhookSystem, events, headers, validate_inbound_request,
};

// =============================================================================
// Test Helpers
// =============================================================================

fn fast_config() -> WebhookConfig {
    WebhookConfig::new()
        .max_retries(2)
        .retry_delay(Duration::from_millis(10))
        .request_timeout(Duration::from_secs(5))
}

async fn create_system(config: WebhookConfig) -> WebhookSystem {
    WebhookSystem::with_parts(
        config,
        Arc::new(InMemoryWebhookStorage::new()),
        Arc::new(HttpTransport::new()),
    )
    .await
    .expect("config should be valid")
}

fn data(value: serde_json::Value) -> Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn request_headers(request: &Request) -> WebhookHeaders {
    request
        .headers
        .iter()
        .map(|(name, value)| {
            (
                name.as_str().to_string(),
                value.to_str().unwrap_or_default().to_string(),
            )
        })
        .collect()
}

// =============================================================================
// Delivery Tests
// =============================================================================

#[tokio::test]
async fn test_delivery_is_signed_and_verifiable() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(header("content-type", "application/json"))
        .and(header("x-event-type", "test.event"))
        .and(header("x-adcc-version", headers::PROTOCOL_VERSION))
        .and(header("user-agent", headers::USER_AGENT))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .expect(1)
        .mount(&server)
        .await;

    let system = create_system(fast_config()).await;
    let registered = system
        .registry()
        .register(NewWebhook::new(format!("{}/hook", server.uri())).events([events::TEST_EVENT]))
        .await
        .unwrap();

    let ids = system
        .dispatcher()
        .dispatch(events::TEST_EVENT, data(json!({"k": 1})))
        .await;
    assert_eq!(ids, vec![registered.id.clone()]);

    assert_eq!(system.queue().run_until_idle().await, 1);

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);

    let body = String::from_utf8(requests[0].body.clone()).unwrap();
    let headers = request_headers(&requests[0]);
    let validation = validate_inbound_request(&body, &headers, &registered.secret);
    assert!(validation.valid, "errors: {:?}", validation.errors);
    assert_eq!(validation.webhook_id.as_deref(), Some(registered.id.as_str()));

    let envelope: EventEnvelope = serde_json::from_str(&body).unwrap();
    assert_eq!(envelope.event_type, events::TEST_EVENT);
    assert_eq!(envelope.source, "system");
    assert_eq!(serde_json::Value::Object(envelope.data), json!({"k": 1}));

    let history = system.queue().history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status_code, Some(200));
    assert_eq!(history[0].response_text.as_deref(), Some("ok"));
    assert!(history[0].duration_ms.is_some());
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .expect(3)
        .mount(&server)
        .await;

    let system = create_system(fast_config()).await;
    let registered = system
        .registry()
        .register(NewWebhook::new(format!("{}/hook", server.uri())).events([events::SYSTEM_ERROR]))
        .await
        .unwrap();

    system
        .dispatcher()
        .system_error("disk full", "IOError", "storage", "error")
        .await;
    system.queue().run_until_idle().await;

    let stats = system.queue().delivery_stats().await;
    assert_eq!(stats.total_deliveries, 3);
    assert_eq!(stats.successful_deliveries, 0);
    assert_eq!(stats.failed_deliveries, 1);

    let failed = system.queue().failed_deliveries(Some(&registered.id)).await;
    assert_eq!(failed.len(), 3);
    assert_eq!(
        failed[0].error_message.as_deref(),
        Some("HTTP 500: Internal Server Error")
    );

    let webhook_stats = system.registry().webhook_stats(&registered.id).await.unwrap();
    assert_eq!(webhook_stats.failure_count, 3);
    assert_eq!(webhook_stats.retry_count, 2);
}

#[tokio::test]
async fn test_request_timeout_is_recorded() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let config = fast_config()
        .max_retries(0)
        .request_timeout(Duration::from_millis(50));
    let system = create_system(config).await;
    system
        .registry()
        .register(NewWebhook::new(server.uri()).events([events::TEST_EVENT]))
        .await
        .unwrap();

    system.dispatcher().test_event("ping").await;
    system.queue().run_until_idle().await;

    let history = system.queue().history(10).await;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status_code, None);
    assert_eq!(history[0].error_message.as_deref(), Some("Request timeout"));
}

#[tokio::test]
async fn test_retry_after_endpoint_recovers() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(202))
        .mount(&server)
        .await;

    let system = create_system(fast_config().max_retries(0)).await;
    let registered = system
        .registry()
        .register(NewWebhook::new(server.uri()).events([events::DATA_IMPORTED]))
        .await
        .unwrap();

    system
        .dispatcher()
        .data_imported("athletes", 42, "athletes.csv")
        .await;
    system.queue().run_until_idle().await;
    assert_eq!(system.queue().failed_deliveries(None).await.len(), 1);

    assert_eq!(system.queue().retry_failed_deliveries(Some(&registered.id)).await, 1);
    system.queue().run_until_idle().await;

    assert!(system.queue().failed_deliveries(None).await.is_empty());

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].body, requests[1].body);
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    // Nothing listens on the discard port.
    let system = create_system(fast_config().max_retries(1)).await;
    system
        .registry()
        .register(NewWebhook::new("http://127.0.0.1:9/hook").events([events::TEST_EVENT]))
        .await
        .unwrap();

    system.dispatcher().test_event("ping").await;
    system.queue().run_until_idle().await;

    let stats = system.queue().delivery_stats().await;
    assert_eq!(stats.total_deliveries, 2);
    assert_eq!(stats.failed_attempts, 2);

    let history = system.queue().history(10).await;
    assert!(history.iter().all(|a| a.status_code.is_none()));
    assert!(history.iter().all(|a| a.error_message.is_some()));
}
