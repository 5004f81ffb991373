//! Credential store and the session listener seam.
//!
//! The [`CredentialStore`] owns the canonical [`Session`]. The HTTP client
//! never calls into the store directly: it reports session transitions
//! through the [`SessionListener`] trait, which the store implements, and it
//! learns about store changes by subscribing to the store's watch channel.
//!
//! ```text
//! Anonymous ──sign_in──▶ Authenticated ──refresh_started──▶ Refreshing
//!     ▲                        ▲                                │
//!     │                        └──────token_refreshed───────────┤
//!     └─────────────────────session_expired / logout────────────┘
//! ```

use crate::session::{AccessToken, Session};
use tokio::sync::watch;

/// Phase of the process-wide session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No token. Initial state.
    #[default]
    Anonymous,
    /// A token is held and believed valid.
    Authenticated,
    /// A 401 was observed and a refresh handshake is in flight.
    Refreshing,
}

/// Point-in-time view of the store, published to subscribers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Current phase.
    pub phase: SessionPhase,
    /// Current session, `None` while anonymous.
    pub session: Option<Session>,
}

impl SessionSnapshot {
    /// Token to stamp on outgoing requests, if any.
    #[must_use]
    pub fn access_token(&self) -> Option<&AccessToken> {
        self.session.as_ref().map(|s| &s.access_token)
    }
}

/// Receiver of session transitions reported by the HTTP client.
///
/// Each method is invoked once per refresh handshake, however many requests
/// were waiting on it.
pub trait SessionListener: Send + Sync {
    /// A refresh handshake has started.
    fn refresh_started(&self) {}

    /// The refresh handshake produced a new session.
    fn token_refreshed(&self, session: &Session);

    /// The refresh handshake failed; the session is over.
    fn session_expired(&self);
}

/// Listener that ignores every transition.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl SessionListener for NoopListener {
    fn token_refreshed(&self, _session: &Session) {}

    fn session_expired(&self) {}
}

/// Owner of the single current session.
///
/// Backed by a `tokio::sync::watch` channel: every mutation is published to
/// all [`subscribe`](Self::subscribe)rs, and reads are lock-free snapshots.
#[derive(Debug)]
pub struct CredentialStore {
    state: watch::Sender<SessionSnapshot>,
}

impl CredentialStore {
    /// Create an anonymous store.
    #[must_use]
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionSnapshot::default());
        Self { state }
    }

    /// Enter `Authenticated` with a freshly issued session.
    pub fn sign_in(&self, session: Session) {
        tracing::debug!(has_user = session.user.is_some(), "Session signed in");
        self.state.send_replace(SessionSnapshot {
            phase: SessionPhase::Authenticated,
            session: Some(session),
        });
    }

    /// Replace the stored token, keeping the user record.
    pub fn update_access_token(&self, token: AccessToken) {
        self.state.send_modify(|snapshot| {
            let user = snapshot.session.take().and_then(|s| s.user);
            snapshot.session = Some(Session {
                access_token: token,
                user,
            });
            snapshot.phase = SessionPhase::Authenticated;
        });
    }

    /// Clear the session entirely.
    ///
    /// Returns `true` if there was anything to clear. Subscribers are only
    /// notified when the state actually changed.
    pub fn logout(&self) -> bool {
        let cleared = self.state.send_if_modified(|snapshot| {
            if snapshot.session.is_none() && snapshot.phase == SessionPhase::Anonymous {
                return false;
            }
            snapshot.session = None;
            snapshot.phase = SessionPhase::Anonymous;
            true
        });
        if cleared {
            tracing::info!("Session cleared");
        }
        cleared
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.state.borrow().phase
    }

    /// Current token, if any.
    #[must_use]
    pub fn current_token(&self) -> Option<AccessToken> {
        self.state.borrow().access_token().cloned()
    }

    /// Current session, if any.
    #[must_use]
    pub fn current_session(&self) -> Option<Session> {
        self.state.borrow().session.clone()
    }

    /// Subscribe to every subsequent change.
    ///
    /// The receiver starts with the current snapshot marked as seen.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.subscribe()
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionListener for CredentialStore {
    fn refresh_started(&self) {
        self.state.send_modify(|snapshot| {
            snapshot.phase = SessionPhase::Refreshing;
        });
    }

    fn token_refreshed(&self, session: &Session) {
        let mut session = session.clone();
        self.state.send_modify(|snapshot| {
            if session.user.is_none() {
                session.user = snapshot.session.take().and_then(|s| s.user);
            }
            snapshot.session = Some(session);
            snapshot.phase = SessionPhase::Authenticated;
        });
    }

    fn session_expired(&self) {
        self.logout();
    }
}
