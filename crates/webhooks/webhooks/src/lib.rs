//! # ADCC Webhooks
//!
//! Outbound webhook notifications for the ADCC analysis engine:
//! - Subscriber registry with persisted registrations
//! - HMAC-SHA256 signed deliveries
//! - Asynchronous delivery queue with bounded retry
//! - Event dispatch with a queryable event history
//! - Inbound request validation for receivers
//!
//! ## Example
//!
//! ```rust,ignore
//! use adcc_webhooks::{NewWebhook, WebhookConfig, WebhookSystem, events};
//!
//! let system = WebhookSystem::open(WebhookConfig::default()).await?;
//! system.start().await;
//!
//! let registered = system
//!     .registry()
//!     .register(NewWebhook::new("https://example.com/webhook").events([events::MEDAL_AWARDED]))
//!     .await?;
//!
//! system.dispatcher().test_event("hello").await;
//! system.stop().await;
//! ```

mod config;
mod delivery;
mod dispatcher;
mod envelope;
mod error;
mod queue;
mod receiver;
mod registration;
mod registry;
mod retry;
mod signature;
mod storage;
mod system;
mod transport;
pub mod events;
pub mod headers;

pub use config::WebhookConfig;
pub use delivery::{DeliveryAttempt, DeliveryJob, JobOutcome, SubscriberDirectory};
pub use dispatcher::{
    DispatchFailure, DispatchOutcome, EventDispatcher, EventHistoryQuery, EventRecord, EventStats,
    MedalAward, RatingChange,
};
pub use envelope::{EventEnvelope, EventPriority};
pub use error::{WebhookError, WebhookResult};
pub use headers::{WebhookHeaders, build_headers};
pub use queue::{DeliveryQueue, DeliveryStats};
pub use receiver::{InboundValidation, WebhookReceiver, validate_inbound_request};
pub use registration::{
    NewWebhook, RegisteredWebhook, WebhookInfo, WebhookPatch, WebhookRegistration, WebhookSecret,
    WebhookStats,
};
pub use registry::WebhookRegistry;
pub use retry::{Backoff, RetryPolicy};
pub use signature::{
    DEFAULT_TIMESTAMP_TOLERANCE_SECS, DEFAULT_URL_TOKEN_TOLERANCE_SECS, SignatureError,
    WebhookSigner, generate_secret, verify_timestamp, verify_timestamp_at,
};
pub use storage::{FailureIndex, InMemoryWebhookStorage, JsonFileStorage, RegistrationMap, WebhookStorage};
pub use system::{HousekeepingReport, WebhookSystem};
pub use transport::{DeliveryTransport, TransportResponse};

#[cfg(feature = "http-client")]
pub use transport::HttpTransport;
