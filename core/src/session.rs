//! Session credential types.
//!
//! A [`Session`] is the bearer access token plus the user record it was
//! issued for. The refresh token is deliberately absent: it only ever lives
//! in the transport's HTTP-only cookie jar.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque bearer access token.
///
/// `Debug` and `Display` never print the secret, so tokens can travel
/// through `tracing` fields and error messages without leaking.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(String);

impl AccessToken {
    /// Parse a raw token.
    ///
    /// Returns `None` for empty or whitespace-only input; surrounding
    /// whitespace is trimmed.
    #[must_use]
    pub fn parse(raw: impl AsRef<str>) -> Option<Self> {
        let trimmed = raw.as_ref().trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// The raw token value.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Value for an `Authorization` header: `Bearer <token>`.
    #[must_use]
    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.0)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(***)")
    }
}

impl fmt::Display for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}

/// Backend user identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Dashboard role attached to a user.
///
/// Known roles are matched case-insensitively and always encode in
/// lowercase, so `"Admin"` from the backend is written back as `"admin"`.
/// Unknown wire values are kept verbatim in [`Role::Other`] rather than
/// rejected, since the backend owns the role vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Role {
    /// Full administrative access.
    Admin,
    /// Branch or department manager.
    Manager,
    /// Regular employee.
    Employee,
    /// Any role this crate does not know about.
    Other(String),
}

impl From<String> for Role {
    fn from(value: String) -> Self {
        match value.to_ascii_lowercase().as_str() {
            "admin" => Self::Admin,
            "manager" => Self::Manager,
            "employee" => Self::Employee,
            _ => Self::Other(value),
        }
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        match role {
            Role::Admin => "admin".to_string(),
            Role::Manager => "manager".to_string(),
            Role::Employee => "employee".to_string(),
            Role::Other(value) => value,
        }
    }
}

/// User record associated with a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Backend identifier.
    #[serde(alias = "_id")]
    pub id: UserId,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Login email.
    #[serde(default)]
    pub email: Option<String>,
    /// Dashboard role.
    pub role: Role,
}

/// The current session credential.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// Bearer token stamped on outgoing requests.
    pub access_token: AccessToken,
    /// User the token was issued for, when known.
    pub user: Option<User>,
}

impl Session {
    /// Create a session for a token with no user record yet.
    #[must_use]
    pub const fn new(access_token: AccessToken) -> Self {
        Self {
            access_token,
            user: None,
        }
    }

    /// Attach a user record.
    #[must_use]
    pub fn with_user(mut self, user: User) -> Self {
        self.user = Some(user);
        self
    }
}
