//! The canonical event envelope sent as every webhook body.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::WebhookResult;
use crate::headers::PROTOCOL_VERSION;

/// Event priority tag.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum EventPriority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl EventPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventPriority::Low => "low",
            EventPriority::Normal => "normal",
            EventPriority::High => "high",
            EventPriority::Critical => "critical",
        }
    }
}

impl std::fmt::Display for EventPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Event type, e.g. `medal.awarded`.
    pub event_type: String,
    /// When the envelope was built.
    pub timestamp: DateTime<Utc>,
    /// Subsystem that raised the event.
    pub source: String,
    /// Priority tag.
    pub priority: EventPriority,
    /// Envelope schema version.
    pub version: String,
    /// Application-defined payload.
    pub data: Map<String, Value>,
}

impl EventEnvelope {
    /// Builds an envelope stamped with the current time.
    pub fn new(
        event_type: impl Into<String>,
        data: Map<String, Value>,
        source: impl Into<String>,
        priority: EventPriority,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            source: source.into(),
            priority,
            version: PROTOCOL_VERSION.to_string(),
            data,
        }
    }

    /// Converts the envelope into a JSON value for queueing.
    pub fn to_value(&self) -> WebhookResult<Value> {
        Ok(serde_json::to_value(self)?)
    }
}
