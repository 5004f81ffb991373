//! # Staffdesk HTTP Client
//!
//! Authenticated HTTP client for the staffdesk HR/asset backend, with
//! transparent access-token refresh and session invalidation.
//!
//! ## Example
//!
//! ```no_run
//! use staffdesk_client::AuthenticatedHttpClient;
//! use staffdesk_core::{AccessToken, CredentialStore, Session};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Base URL from STAFFDESK_API_URL
//!     let store = Arc::new(CredentialStore::new());
//!     let client = AuthenticatedHttpClient::from_env(store.clone())?;
//!     client.follow(store.subscribe());
//!
//!     // Login happens elsewhere; it hands us a token
//!     if let Some(token) = AccessToken::parse("token-from-login") {
//!         store.sign_in(Session::new(token));
//!     }
//!
//!     let employees: serde_json::Value = client.get_json("/api/employee").await?;
//!     println!("Employees: {employees}");
//!     Ok(())
//! }
//! ```
//!
//! ## Behavior
//!
//! - `Authorization: Bearer <token>` on every request while a token is set
//! - On 401: one refresh handshake, shared by all concurrent callers, then a
//!   single retry of the original request
//! - On refresh failure: the session listener is told once, and callers get
//!   the refresh error
//! - Everything else passes through untouched

pub mod client;
pub mod config;
pub mod error;
pub mod metrics;
pub mod request;

mod refresh;

// Re-export main types for convenience
pub use client::AuthenticatedHttpClient;
pub use config::ClientConfig;
pub use error::{ClientError, ConfigError, Result};
pub use crate::metrics::describe_metrics;
pub use request::{ApiRequest, Attempt, RequestOptions};
