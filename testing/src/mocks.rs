//! Mock session listener for testing.

use staffdesk_core::{Session, SessionListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

/// Session listener that counts every notification.
///
/// Lets tests assert that a refresh or a logout happened exactly once,
/// however many requests were waiting on it.
#[derive(Debug, Default)]
pub struct RecordingListener {
    refresh_started: AtomicUsize,
    token_refreshed: AtomicUsize,
    session_expired: AtomicUsize,
    last_session: Mutex<Option<Session>>,
}

impl RecordingListener {
    /// Create a listener with all counters at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `refresh_started` calls.
    #[must_use]
    pub fn refresh_started_count(&self) -> usize {
        self.refresh_started.load(Ordering::SeqCst)
    }

    /// Number of `token_refreshed` calls.
    #[must_use]
    pub fn token_refreshed_count(&self) -> usize {
        self.token_refreshed.load(Ordering::SeqCst)
    }

    /// Number of `session_expired` calls (logouts triggered).
    #[must_use]
    pub fn session_expired_count(&self) -> usize {
        self.session_expired.load(Ordering::SeqCst)
    }

    /// Session passed to the most recent `token_refreshed`.
    #[must_use]
    pub fn last_session(&self) -> Option<Session> {
        self.last_session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl SessionListener for RecordingListener {
    fn refresh_started(&self) {
        self.refresh_started.fetch_add(1, Ordering::SeqCst);
    }

    fn token_refreshed(&self, session: &Session) {
        self.token_refreshed.fetch_add(1, Ordering::SeqCst);
        *self
            .last_session
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
    }

    fn session_expired(&self) {
        self.session_expired.fetch_add(1, Ordering::SeqCst);
    }
}
