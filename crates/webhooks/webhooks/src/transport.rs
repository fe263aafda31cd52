//! HTTP transport used by the delivery queue.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::WebhookResult;
use crate::headers::WebhookHeaders;

/// Status and body of a subscriber response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Sends one signed POST. Any received response is `Ok`, whatever its status;
/// `Err` is reserved for network failures and timeouts.
#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        headers: &WebhookHeaders,
        body: &str,
        timeout: Duration,
    ) -> WebhookResult<TransportResponse>;
}

/// reqwest-backed transport.
#[cfg(feature = "http-client")]
#[derive(Debug, Clone, Default)]
pub struct HttpTransport {
    client: reqwest::Client,
}

#[cfg(feature = "http-client")]
impl HttpTransport {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }

    /// Uses a preconfigured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[cfg(feature = "http-client")]
#[async_trait]
impl DeliveryTransport for HttpTransport {
    async fn post(
        &self,
        url: &str,
        headers: &WebhookHeaders,
        body: &str,
        timeout: Duration,
    ) -> WebhookResult<TransportResponse> {
        let mut request = self.client.post(url).timeout(timeout);
        for (name, value) in headers.iter() {
            request = request.header(name, value);
        }

        let response = request.body(body.to_string()).send().await?;
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();

        Ok(TransportResponse { status, body })
    }
}
