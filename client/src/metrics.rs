//! Client metrics.
//!
//! Counters are recorded through the `metrics` facade; installing an
//! exporter is left to the application.

use ::metrics::{Unit, describe_counter};

/// Requests sent, labelled by `attempt`.
pub const REQUESTS: &str = "staffdesk_client.requests";
/// Requests re-sent after a refresh.
pub const RETRIES: &str = "staffdesk_client.retries";
/// Refresh handshakes started.
pub const REFRESH_STARTED: &str = "staffdesk_client.refresh.started";
/// Refresh handshakes that produced a token.
pub const REFRESH_SUCCEEDED: &str = "staffdesk_client.refresh.succeeded";
/// Refresh handshakes that ended the session.
pub const REFRESH_FAILED: &str = "staffdesk_client.refresh.failed";
/// Callers that joined an already pending refresh.
pub const REFRESH_COALESCED: &str = "staffdesk_client.refresh.coalesced";

/// Register descriptions for every client metric.
///
/// Call once after installing a recorder.
pub fn describe_metrics() {
    describe_counter!(REQUESTS, Unit::Count, "HTTP requests sent to the backend");
    describe_counter!(RETRIES, Unit::Count, "Requests re-sent after a token refresh");
    describe_counter!(REFRESH_STARTED, Unit::Count, "Token refresh handshakes started");
    describe_counter!(
        REFRESH_SUCCEEDED,
        Unit::Count,
        "Token refresh handshakes that returned a new access token"
    );
    describe_counter!(
        REFRESH_FAILED,
        Unit::Count,
        "Token refresh handshakes that failed and ended the session"
    );
    describe_counter!(
        REFRESH_COALESCED,
        Unit::Count,
        "Callers that awaited an already pending refresh"
    );
}
