//! # Staffdesk Core
//!
//! Session credential types and the process-wide credential store shared by
//! the staffdesk dashboard's HTTP client and its UI collaborators.
//!
//! ## Example
//!
//! ```
//! use staffdesk_core::{AccessToken, CredentialStore, Session, SessionPhase};
//!
//! let store = CredentialStore::new();
//! assert_eq!(store.phase(), SessionPhase::Anonymous);
//!
//! let token = AccessToken::parse("abc").unwrap();
//! store.sign_in(Session::new(token));
//! assert_eq!(store.phase(), SessionPhase::Authenticated);
//!
//! store.logout();
//! assert!(store.current_token().is_none());
//! ```

pub mod session;
pub mod store;

pub use session::{AccessToken, Role, Session, User, UserId};
pub use store::{CredentialStore, NoopListener, SessionListener, SessionPhase, SessionSnapshot};
