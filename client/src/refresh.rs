//! Access-token refresh handshake and refresh coalescing.
//!
//! The handshake is `POST {base}{refresh_path}` with no body and no
//! `Authorization` header. The refresh credential is an HTTP-only cookie the
//! transport's cookie jar attaches on its own; this module never reads it.
//!
//! At most one handshake is in flight at a time. The first caller to need a
//! refresh starts it and parks it in a shared slot; every caller that
//! arrives while it is pending awaits the same [`Shared`] future. All side
//! effects (token cache update, listener notification) happen inside that
//! future, so they run once per handshake no matter how many callers wait.
//!
//! The settled handshake stays in the slot together with the token epoch it
//! was started for. A request from the same burst whose 401 arrives after a
//! failed handshake receives that same error instead of starting another
//! handshake; after a successful one it simply retries with the new token. A handshake whose waiters were all dropped stays in
//! the slot too, and the next caller picks it up.

use crate::error::{ClientError, Result};
use crate::metrics::{REFRESH_COALESCED, REFRESH_FAILED, REFRESH_STARTED, REFRESH_SUCCEEDED};
use futures::future::{BoxFuture, FutureExt, Shared};
use reqwest::Url;
use serde::Deserialize;
use staffdesk_core::{AccessToken, Session, SessionListener, User};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// Token used to stamp outgoing requests, shared by the client and the
/// refresh handshake.
pub(crate) type TokenCache = Arc<RwLock<TokenState>>;

type PendingRefresh = Shared<BoxFuture<'static, Result<Session>>>;

/// Current token and the epoch it belongs to.
///
/// The epoch advances whenever the token changes and every time a handshake
/// settles, so a request can tell whether anything happened since it was
/// stamped.
#[derive(Debug, Clone, Default)]
pub(crate) struct TokenState {
    pub(crate) token: Option<AccessToken>,
    pub(crate) epoch: u64,
}

impl TokenState {
    /// Replace the token. Writing the same token again is not a change.
    pub(crate) fn set(&mut self, token: Option<AccessToken>) {
        if self.token != token {
            self.token = token;
            self.epoch += 1;
        }
    }

    fn settle(&mut self, token: Option<AccessToken>) {
        self.token = token;
        self.epoch += 1;
    }
}

/// What a request answered with 401 should do next.
#[derive(Debug)]
pub(crate) enum Recovery {
    /// Send again with this token.
    Retry(AccessToken),
    /// The session ended while the request was in flight; hand back the 401.
    GiveUp,
}

/// Body of a successful refresh response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
    access_token: String,
    #[serde(default)]
    user: Option<User>,
}

/// Most recent handshake and the token epoch it was started for.
struct Handshake {
    generation: u64,
    epoch: u64,
    outcome: PendingRefresh,
}

#[derive(Default)]
struct Slot {
    generation: u64,
    latest: Option<Handshake>,
}

/// Coalesces concurrent refresh requests into a single handshake.
pub(crate) struct RefreshCoordinator {
    http: reqwest::Client,
    url: Url,
    timeout: Duration,
    token: TokenCache,
    listener: Arc<dyn SessionListener>,
    slot: Mutex<Slot>,
}

impl RefreshCoordinator {
    pub(crate) fn new(
        http: reqwest::Client,
        url: Url,
        timeout: Duration,
        token: TokenCache,
        listener: Arc<dyn SessionListener>,
    ) -> Self {
        Self {
            http,
            url,
            timeout,
            token,
            listener,
            slot: Mutex::new(Slot::default()),
        }
    }

    /// Decide how a request stamped in `stamped_epoch` recovers from a 401.
    ///
    /// The whole decision is taken under the slot lock:
    /// - a pending handshake is joined;
    /// - a failed handshake started for the same epoch hands out its error
    ///   again, so late 401s from one burst never start a second handshake
    ///   or a second logout;
    /// - if the token moved on since the request was stamped (a handshake
    ///   succeeded, or the token was replaced), the current token is reused,
    ///   or the request gives up when there is none;
    /// - otherwise a new handshake starts.
    ///
    /// # Errors
    ///
    /// Returns the handshake's error; by then the token cache is cleared and
    /// the listener has been told the session expired.
    pub(crate) async fn refresh(&self, stamped_epoch: u64) -> Result<Recovery> {
        let outcome = {
            let mut slot = self.slot.lock().await;
            let joinable = slot
                .latest
                .as_ref()
                .filter(|h| match h.outcome.peek() {
                    None => true,
                    Some(settled) => settled.is_err() && h.epoch == stamped_epoch,
                });

            if let Some(handshake) = joinable {
                metrics::counter!(REFRESH_COALESCED).increment(1);
                tracing::debug!(
                    generation = handshake.generation,
                    settled = handshake.outcome.peek().is_some(),
                    "Joining token refresh"
                );
                handshake.outcome.clone()
            } else {
                let current = self.token.read().await.clone();
                if current.epoch != stamped_epoch {
                    tracing::debug!(
                        has_token = current.token.is_some(),
                        "Token changed while request was in flight"
                    );
                    return Ok(current.token.map_or(Recovery::GiveUp, Recovery::Retry));
                }

                slot.generation += 1;
                let generation = slot.generation;
                let outcome = self.handshake(generation).shared();
                slot.latest = Some(Handshake {
                    generation,
                    epoch: stamped_epoch,
                    outcome: outcome.clone(),
                });
                outcome
            }
        };

        outcome
            .await
            .map(|session| Recovery::Retry(session.access_token))
    }

    fn handshake(&self, generation: u64) -> BoxFuture<'static, Result<Session>> {
        let http = self.http.clone();
        let url = self.url.clone();
        let timeout = self.timeout;
        let token = Arc::clone(&self.token);
        let listener = Arc::clone(&self.listener);

        async move {
            metrics::counter!(REFRESH_STARTED).increment(1);
            tracing::debug!(generation, "Starting token refresh");
            listener.refresh_started();

            let outcome = match tokio::time::timeout(timeout, exchange(&http, url)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ClientError::RefreshTimedOut),
            };

            match &outcome {
                Ok(session) => {
                    token.write().await.settle(Some(session.access_token.clone()));
                    listener.token_refreshed(session);
                    metrics::counter!(REFRESH_SUCCEEDED).increment(1);
                    tracing::info!(generation, "Access token refreshed");
                }
                Err(err) => {
                    token.write().await.settle(None);
                    listener.session_expired();
                    metrics::counter!(REFRESH_FAILED).increment(1);
                    tracing::warn!(
                        generation,
                        error = %err,
                        "Token refresh failed, session terminated"
                    );
                }
            }

            outcome
        }
        .boxed()
    }
}

async fn exchange(http: &reqwest::Client, url: Url) -> Result<Session> {
    let response = http
        .post(url)
        .send()
        .await
        .map_err(|e| ClientError::RefreshFailed(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(ClientError::RefreshRejected {
            status: status.as_u16(),
            message: body,
        });
    }

    let body: RefreshResponse = response
        .json()
        .await
        .map_err(|e| ClientError::RefreshFailed(format!("invalid refresh response: {e}")))?;
    let access_token = AccessToken::parse(&body.access_token).ok_or_else(|| {
        ClientError::RefreshFailed("refresh response carried an empty access token".to_string())
    })?;

    Ok(Session {
        access_token,
        user: body.user,
    })
}
