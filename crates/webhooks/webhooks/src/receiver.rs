//! Inbound webhook validation for receivers.

use serde::{Deserialize, Serialize};

use crate::envelope::EventEnvelope;
use crate::error::{WebhookError, WebhookResult};
use crate::headers::{self, WebhookHeaders};
use crate::signature::{self, WebhookSigner, SIGNATURE_ALGORITHM};

/// Outcome of validating an inbound delivery.
///
/// Every violated rule is listed in `errors`, so a receiver can report the
/// full diagnosis instead of only the first problem.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundValidation {
    pub valid: bool,
    pub errors: Vec<String>,
    pub event_type: Option<String>,
    pub webhook_id: Option<String>,
    pub timestamp: Option<i64>,
}

/// Webhook receiver for verifying incoming webhooks.
#[derive(Debug, Clone)]
pub struct WebhookReceiver {
    signer: WebhookSigner,
    /// Tolerance for timestamp validation (in seconds).
    tolerance_secs: u64,
}

impl WebhookReceiver {
    /// Creates a new webhook receiver with a five minute replay window.
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            signer: WebhookSigner::new(secret),
            tolerance_secs: signature::DEFAULT_TIMESTAMP_TOLERANCE_SECS,
        }
    }

    /// Sets the timestamp tolerance.
    pub fn with_tolerance(mut self, tolerance_secs: u64) -> Self {
        self.tolerance_secs = tolerance_secs;
        self
    }

    /// Validates headers and signature against the current time.
    pub fn validate(&self, payload: &str, headers: &WebhookHeaders) -> InboundValidation {
        self.validate_at(payload, headers, chrono::Utc::now().timestamp())
    }

    /// Validates headers and signature against an explicit `now`.
    pub fn validate_at(
        &self,
        payload: &str,
        headers: &WebhookHeaders,
        now: i64,
    ) -> InboundValidation {
        let mut result = InboundValidation::default();

        let required = [
            headers::SIGNATURE,
            headers::TIMESTAMP,
            headers::EVENT_TYPE,
            headers::WEBHOOK_ID,
        ];
        for name in required {
            if headers.get(name).map_or(true, str::is_empty) {
                result.errors.push(format!("Missing {} header", name));
            }
        }
        if !result.errors.is_empty() {
            return result;
        }

        let signature_header = headers.get(headers::SIGNATURE).unwrap_or_default();
        let timestamp_str = headers.get(headers::TIMESTAMP).unwrap_or_default();
        result.event_type = headers.get(headers::EVENT_TYPE).map(str::to_string);
        result.webhook_id = headers.get(headers::WEBHOOK_ID).map(str::to_string);

        let Ok(timestamp) = timestamp_str.trim().parse::<i64>() else {
            result.errors.push("Invalid timestamp format".to_string());
            return result;
        };
        result.timestamp = Some(timestamp);

        if !signature::verify_timestamp_at(timestamp, now, self.tolerance_secs) {
            result.errors.push("Timestamp out of tolerance".to_string());
        }

        let prefix = format!("{}=", SIGNATURE_ALGORITHM);
        let Some(signature) = signature_header.strip_prefix(&prefix) else {
            result.errors.push("Invalid signature format".to_string());
            return result;
        };

        if !matches!(self.signer.verify(payload, signature), Ok(true)) {
            result.errors.push("Invalid signature".to_string());
        }

        result.valid = result.errors.is_empty();
        if result.valid {
            tracing::info!(
                webhook_id = ?result.webhook_id,
                event_type = ?result.event_type,
                "Webhook request validated"
            );
        } else {
            tracing::warn!(
                webhook_id = ?result.webhook_id,
                errors = ?result.errors,
                "Webhook request validation failed"
            );
        }
        result
    }

    /// Validates the request and parses the event envelope.
    pub fn receive(&self, payload: &str, headers: &WebhookHeaders) -> WebhookResult<EventEnvelope> {
        let validation = self.validate(payload, headers);
        if !validation.valid {
            return Err(WebhookError::Validation(validation.errors.join("; ")));
        }
        Ok(serde_json::from_str(payload)?)
    }
}

/// Validates an inbound request with the default replay window.
pub fn validate_inbound_request(
    payload: &str,
    headers: &WebhookHeaders,
    secret: &str,
) -> InboundValidation {
    WebhookReceiver::new(secret).validate(payload, headers)
}
