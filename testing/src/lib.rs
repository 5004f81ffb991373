//! # Staffdesk Testing
//!
//! Testing utilities for the staffdesk client and credential store.
//!
//! This crate provides:
//! - [`RecordingListener`]: a session listener that counts notifications
//! - Session fixtures ([`fixtures::token`], [`fixtures::session`])
//! - `wiremock` helpers for the refresh endpoint
//! - [`init_test_tracing`] for readable logs in failing tests
//!
//! ## Example
//!
//! ```ignore
//! use staffdesk_testing::{RecordingListener, fixtures};
//!
//! #[tokio::test]
//! async fn test_refresh_once() {
//!     let server = wiremock::MockServer::start().await;
//!     fixtures::mount_refresh_success(&server, "fresh").await;
//!     let listener = Arc::new(RecordingListener::new());
//!     // ... build a client against server.uri() with `listener`
//!     assert_eq!(listener.token_refreshed_count(), 1);
//! }
//! ```

pub mod fixtures;
pub mod mocks;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

pub use mocks::RecordingListener;

static TRACING: Once = Once::new();

/// Install a test-friendly `tracing` subscriber.
///
/// Honors `RUST_LOG`, defaulting to debug for the staffdesk crates. Safe to call from
/// every test; only the first call installs anything.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("staffdesk_client=debug,staffdesk_core=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
