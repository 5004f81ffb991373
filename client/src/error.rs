//! Error types for the staffdesk HTTP client

use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the staffdesk backend.
///
/// `Clone` because a single refresh outcome is handed to every request that
/// was waiting on it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ClientError {
    /// Transport failure (connection refused, DNS, TLS, broken body)
    #[error("Request failed: {0}")]
    Transport(String),

    /// The request exceeded its timeout
    #[error("Request timed out")]
    Timeout,

    /// The request could not be built
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The refresh endpoint answered with a non-2xx status
    #[error("Token refresh rejected (status {status}): {message}")]
    RefreshRejected {
        /// HTTP status code of the refresh response
        status: u16,
        /// Response body
        message: String,
    },

    /// The refresh handshake failed before producing a token
    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The refresh handshake did not finish in time
    #[error("Token refresh timed out")]
    RefreshTimedOut,

    /// API returned a non-2xx status to a typed helper
    #[error("API error (status {status}): {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Response body did not decode into the expected type
    #[error("Response parsing failed: {0}")]
    ResponseParseFailed(String),

    /// Client configuration is unusable
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

impl ClientError {
    /// Whether this error ended the session (the refresh handshake failed).
    #[must_use]
    pub const fn is_session_terminated(&self) -> bool {
        matches!(
            self,
            Self::RefreshRejected { .. } | Self::RefreshFailed(_) | Self::RefreshTimedOut
        )
    }

    /// HTTP status carried by the error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::RefreshRejected { status, .. } | Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub(crate) fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required setting is absent
    #[error("Missing {0} environment variable")]
    Missing(&'static str),

    /// A setting is present but malformed
    #[error("Invalid {key}: {reason}")]
    Invalid {
        /// Setting name
        key: &'static str,
        /// What is wrong with it
        reason: String,
    },
}
