//! The closed vocabulary of event types a webhook can subscribe to.

use std::collections::BTreeSet;

/// Event emitted when a competition event finished processing.
pub const EVENT_PROCESSED: &str = "event.processed";
/// Event emitted when processing a competition event failed.
pub const EVENT_FAILED: &str = "event.failed";
/// Event emitted when an athlete's rating changes.
pub const ATHLETE_RATING_UPDATED: &str = "athlete.rating_updated";
/// Event emitted when an athlete's record changes.
pub const ATHLETE_RECORD_UPDATED: &str = "athlete.record_updated";
/// Event emitted when a medal is awarded.
pub const MEDAL_AWARDED: &str = "medal.awarded";
/// Event emitted when a report has been generated.
pub const REPORT_GENERATED: &str = "report.generated";
/// Event emitted on system errors.
pub const SYSTEM_ERROR: &str = "system.error";
/// Event emitted on system warnings.
pub const SYSTEM_WARNING: &str = "system.warning";
/// Event emitted when a user signs in.
pub const USER_LOGIN: &str = "user.login";
/// Event emitted when a user signs out.
pub const USER_LOGOUT: &str = "user.logout";
/// Event emitted after a data import.
pub const DATA_IMPORTED: &str = "data.imported";
/// Event emitted after a data export.
pub const DATA_EXPORTED: &str = "data.exported";
/// Sentinel used for subscriber health checks.
pub const TEST_EVENT: &str = "test.event";

const SUPPORTED: [&str; 13] = [
    EVENT_PROCESSED,
    EVENT_FAILED,
    ATHLETE_RATING_UPDATED,
    ATHLETE_RECORD_UPDATED,
    MEDAL_AWARDED,
    REPORT_GENERATED,
    SYSTEM_ERROR,
    SYSTEM_WARNING,
    USER_LOGIN,
    USER_LOGOUT,
    DATA_IMPORTED,
    DATA_EXPORTED,
    TEST_EVENT,
];

/// Returns the set of supported event types.
pub fn supported_events() -> BTreeSet<&'static str> {
    SUPPORTED.into_iter().collect()
}

/// Checks whether an event type is part of the vocabulary.
pub fn is_supported(event_type: &str) -> bool {
    SUPPORTED.contains(&event_type)
}
