//! Client configuration.
//!
//! All requests are issued against one fixed origin. There is no per-request
//! origin override: absolute URLs passed as request paths are rejected.

use crate::error::{ClientError, ConfigError};
use reqwest::Url;
use std::time::Duration;

/// Environment variable holding the backend origin.
pub const ENV_API_URL: &str = "STAFFDESK_API_URL";
/// Environment variable overriding the refresh endpoint path.
pub const ENV_REFRESH_PATH: &str = "STAFFDESK_REFRESH_PATH";
/// Environment variable overriding the request timeout, in seconds.
pub const ENV_REQUEST_TIMEOUT_SECS: &str = "STAFFDESK_REQUEST_TIMEOUT_SECS";
/// Environment variable overriding the refresh timeout, in seconds.
pub const ENV_REFRESH_TIMEOUT_SECS: &str = "STAFFDESK_REFRESH_TIMEOUT_SECS";

/// Default refresh handshake endpoint.
pub const DEFAULT_REFRESH_PATH: &str = "/api/auth/refreshToken";

/// HTTP client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Origin every request is issued against.
    pub base_url: Url,

    /// Path of the refresh handshake endpoint.
    ///
    /// Default: `/api/auth/refreshToken`
    pub refresh_path: String,

    /// Timeout for ordinary requests.
    ///
    /// Default: 30 seconds
    pub request_timeout: Duration,

    /// TCP connect timeout.
    ///
    /// Default: 10 seconds
    pub connect_timeout: Duration,

    /// Upper bound on one refresh handshake.
    ///
    /// Default: 10 seconds
    pub refresh_timeout: Duration,

    /// `User-Agent` sent with every request.
    pub user_agent: String,
}

impl ClientConfig {
    /// Create a configuration for the given origin.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if `base_url` is not an absolute
    /// `http`/`https` URL.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: parse_base_url("base_url", base_url)?,
            refresh_path: DEFAULT_REFRESH_PATH.to_string(),
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            refresh_timeout: Duration::from_secs(10),
            user_agent: concat!("staffdesk-client/", env!("CARGO_PKG_VERSION")).to_string(),
        })
    }

    /// Load configuration from `STAFFDESK_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Missing` if `STAFFDESK_API_URL` is unset and
    /// `ConfigError::Invalid` for malformed values.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`from_env`](Self::from_env).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = lookup(ENV_API_URL)
            .filter(|v| !v.trim().is_empty())
            .ok_or(ConfigError::Missing(ENV_API_URL))?;
        let mut config = Self {
            base_url: parse_base_url(ENV_API_URL, base_url.trim())?,
            ..Self::new("http://localhost")?
        };

        if let Some(path) = lookup(ENV_REFRESH_PATH).filter(|v| !v.trim().is_empty()) {
            config = config.with_refresh_path(path.trim());
        }
        if let Some(raw) = lookup(ENV_REQUEST_TIMEOUT_SECS) {
            config.request_timeout = parse_secs(ENV_REQUEST_TIMEOUT_SECS, &raw)?;
        }
        if let Some(raw) = lookup(ENV_REFRESH_TIMEOUT_SECS) {
            config.refresh_timeout = parse_secs(ENV_REFRESH_TIMEOUT_SECS, &raw)?;
        }

        Ok(config)
    }

    /// Set the refresh endpoint path.
    #[must_use]
    pub fn with_refresh_path(mut self, path: impl Into<String>) -> Self {
        self.refresh_path = path.into();
        self
    }

    /// Set the request timeout.
    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the refresh handshake timeout.
    #[must_use]
    pub const fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Set the `User-Agent`.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Resolve a request path against the base URL.
    ///
    /// Any path prefix on the base URL is preserved, so a base of
    /// `https://hr.example.com/backend` and a path of `/api/branch` resolve to
    /// `https://hr.example.com/backend/api/branch`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRequest` for absolute URLs or paths that
    /// do not form a valid URL.
    pub fn endpoint(&self, path: &str) -> Result<Url, ClientError> {
        let path = path.trim();
        let path_part = path.split(['?', '#']).next().unwrap_or(path);
        if path_part.contains("://") || path_part.starts_with("//") {
            return Err(ClientError::InvalidRequest(format!(
                "absolute URL not accepted as a request path: {path}"
            )));
        }

        let base = self.base_url.as_str().trim_end_matches('/');
        let joined = format!("{base}/{}", path.trim_start_matches('/'));
        Url::parse(&joined)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid request path {path}: {e}")))
    }

    /// URL of the refresh handshake endpoint.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::InvalidRequest` if `refresh_path` is malformed.
    pub fn refresh_url(&self) -> Result<Url, ClientError> {
        self.endpoint(&self.refresh_path)
    }
}

fn parse_base_url(key: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            key,
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(ConfigError::Invalid {
            key,
            reason: "URL has no host".to_string(),
        });
    }

    Ok(url)
}

fn parse_secs(key: &'static str, raw: &str) -> Result<Duration, ConfigError> {
    let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::Invalid {
        key,
        reason: format!("expected whole seconds, got {raw:?}"),
    })?;
    if secs == 0 {
        return Err(ConfigError::Invalid {
            key,
            reason: "timeout must be greater than zero".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}
