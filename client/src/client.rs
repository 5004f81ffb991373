//! Authenticated HTTP client implementation

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::metrics::{REQUESTS, RETRIES};
use crate::refresh::{Recovery, RefreshCoordinator, TokenCache, TokenState};
use crate::request::{ApiRequest, Attempt, RequestOptions};
use reqwest::header::{AUTHORIZATION, HeaderValue};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use staffdesk_core::{AccessToken, SessionListener, SessionSnapshot};
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;

/// HTTP client for the staffdesk backend.
///
/// Stamps every request with `Authorization: Bearer <token>` while a token
/// is set. A 401 triggers one refresh handshake (shared with any other
/// request that hits a 401 meanwhile) and a single retry of the original
/// request. Every other status, and every transport error, is returned as
/// the transport reported it.
///
/// Cloning is cheap; clones share the token, the cookie jar and the pending
/// refresh.
#[derive(Clone)]
pub struct AuthenticatedHttpClient {
    inner: Arc<Inner>,
}

struct Inner {
    http: Client,
    config: ClientConfig,
    token: TokenCache,
    refresh: RefreshCoordinator,
}

impl AuthenticatedHttpClient {
    /// Create a client.
    ///
    /// `listener` is told about refreshes and session expiry; pass the
    /// application's `CredentialStore` here.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Transport` if the HTTP transport cannot be built
    /// and `ClientError::InvalidRequest` if the refresh path is malformed.
    pub fn new(config: ClientConfig, listener: Arc<dyn SessionListener>) -> Result<Self> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| ClientError::Transport(format!("Failed to create HTTP client: {e}")))?;

        let token: TokenCache = Arc::new(RwLock::new(TokenState::default()));
        let refresh = RefreshCoordinator::new(
            http.clone(),
            config.refresh_url()?,
            config.refresh_timeout,
            Arc::clone(&token),
            listener,
        );

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                config,
                token,
                refresh,
            }),
        })
    }

    /// Create a client configured from `STAFFDESK_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Config` if the environment does not describe a
    /// usable configuration, otherwise the errors of [`new`](Self::new).
    pub fn from_env(listener: Arc<dyn SessionListener>) -> Result<Self> {
        Self::new(ClientConfig::from_env()?, listener)
    }

    /// Get a reference to the config
    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// Replace the token stamped on subsequent requests.
    ///
    /// In memory only; nothing is persisted.
    pub async fn set_access_token(&self, token: Option<AccessToken>) {
        self.inner.token.write().await.set(token);
    }

    /// Token currently stamped on outgoing requests.
    pub async fn access_token(&self) -> Option<AccessToken> {
        self.inner.token.read().await.token.clone()
    }

    /// Mirror a credential store into this client.
    ///
    /// Applies the current snapshot immediately and every later change, so a
    /// store `logout()` results in `set_access_token(None)`. The task ends
    /// when the store is dropped.
    pub fn follow(&self, mut updates: watch::Receiver<SessionSnapshot>) -> JoinHandle<()> {
        let client = self.clone();
        tokio::spawn(async move {
            loop {
                let token = updates.borrow_and_update().access_token().cloned();
                client.set_access_token(token).await;
                if updates.changed().await.is_err() {
                    tracing::debug!("Credential store dropped, no longer following");
                    break;
                }
            }
        })
    }

    /// Perform a request.
    ///
    /// # Errors
    ///
    /// Returns transport errors unchanged, and the refresh error (not the
    /// original 401) when a refresh was needed and failed. Non-2xx responses
    /// are not errors: they come back as `Ok(response)`.
    pub async fn request(
        &self,
        method: Method,
        path: impl Into<String>,
        body: Option<Value>,
        options: RequestOptions,
    ) -> Result<Response> {
        let mut request = ApiRequest::new(method, path).with_options(options);
        if let Some(body) = body {
            request = request.with_body(body);
        }
        self.send(request).await
    }

    /// Perform a prepared request.
    ///
    /// # Errors
    ///
    /// See [`request`](Self::request).
    pub async fn send(&self, request: ApiRequest) -> Result<Response> {
        let mut attempt = Attempt::Initial;
        let TokenState { mut token, epoch } = self.inner.token.read().await.clone();

        loop {
            let response = self.dispatch(&request, token.as_ref(), attempt).await?;
            if response.status() != StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            let Some(next) = attempt.next() else {
                tracing::debug!(
                    method = %request.method(),
                    path = request.path(),
                    "Still unauthorized after refresh"
                );
                return Ok(response);
            };

            match self.inner.refresh.refresh(epoch).await? {
                Recovery::Retry(fresh) => token = Some(fresh),
                Recovery::GiveUp => {
                    tracing::debug!(
                        method = %request.method(),
                        path = request.path(),
                        "Session ended while request was in flight"
                    );
                    return Ok(response);
                }
            }
            attempt = next;
            metrics::counter!(RETRIES).increment(1);
        }
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&AccessToken>,
        attempt: Attempt,
    ) -> Result<Response> {
        let url = self.inner.config.endpoint(request.path())?;
        let options = request.options();

        let mut builder = self
            .inner
            .http
            .request(request.method().clone(), url)
            .headers(options.headers().clone());
        if !options.query_pairs().is_empty() {
            builder = builder.query(options.query_pairs());
        }
        if let Some(timeout) = options.timeout_override() {
            builder = builder.timeout(timeout);
        }
        if let Some(body) = request.body() {
            builder = builder.json(body);
        }
        if let Some(token) = token {
            let mut value = HeaderValue::from_str(&token.bearer_header()).map_err(|_| {
                ClientError::InvalidRequest("access token is not a valid header value".to_string())
            })?;
            value.set_sensitive(true);
            builder = builder.header(AUTHORIZATION, value);
        }

        metrics::counter!(REQUESTS, "attempt" => attempt.as_str()).increment(1);
        tracing::debug!(
            method = %request.method(),
            path = request.path(),
            attempt = attempt.as_str(),
            authenticated = token.is_some(),
            "Sending request"
        );

        builder
            .send()
            .await
            .map_err(|e| ClientError::from_transport(&e))
    }

    /// `GET path`, decoding a JSON body.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Api` for non-2xx statuses and
    /// `ClientError::ResponseParseFailed` for undecodable bodies, in addition
    /// to the errors of [`send`](Self::send).
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let response = self.send(ApiRequest::get(path)).await?;
        decode(response).await
    }

    /// `POST path` with a JSON body, decoding a JSON response.
    ///
    /// # Errors
    ///
    /// See [`get_json`](Self::get_json); also `ClientError::InvalidRequest`
    /// if `body` does not serialize.
    pub async fn post_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(ApiRequest::post(path, to_value(body)?)).await?;
        decode(response).await
    }

    /// `PUT path` with a JSON body, decoding a JSON response.
    ///
    /// # Errors
    ///
    /// See [`post_json`](Self::post_json).
    pub async fn put_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(ApiRequest::put(path, to_value(body)?)).await?;
        decode(response).await
    }

    /// `PATCH path` with a JSON body, decoding a JSON response.
    ///
    /// # Errors
    ///
    /// See [`post_json`](Self::post_json).
    pub async fn patch_json<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let response = self.send(ApiRequest::patch(path, to_value(body)?)).await?;
        decode(response).await
    }

    /// `DELETE path`, discarding the response body.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Api` for non-2xx statuses, in addition to the
    /// errors of [`send`](Self::send).
    pub async fn delete(&self, path: &str) -> Result<()> {
        let response = self.send(ApiRequest::delete(path)).await?;
        ensure_success(response).await.map(|_| ())
    }
}

fn to_value<B: Serialize + ?Sized>(body: &B) -> Result<Value> {
    serde_json::to_value(body)
        .map_err(|e| ClientError::InvalidRequest(format!("body does not serialize: {e}")))
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(ClientError::Api {
        status: status.as_u16(),
        message,
    })
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    ensure_success(response)
        .await?
        .json::<T>()
        .await
        .map_err(|e| ClientError::ResponseParseFailed(e.to_string()))
}
