//! Session fixtures and mock-server helpers for the refresh endpoint.

use serde_json::json;
use staffdesk_core::{AccessToken, Role, Session, User, UserId};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

/// Path of the refresh handshake endpoint.
pub const REFRESH_PATH: &str = "/api/auth/refreshToken";

/// Build a token from a literal.
///
/// # Panics
///
/// Panics if `raw` is blank.
#[must_use]
#[allow(clippy::expect_used)]
pub fn token(raw: &str) -> AccessToken {
    AccessToken::parse(raw).expect("fixture token must not be blank")
}

/// Session for `raw` with no user record.
#[must_use]
pub fn session(raw: &str) -> Session {
    Session::new(token(raw))
}

/// An administrator user record.
#[must_use]
pub fn admin_user() -> User {
    User {
        id: UserId("emp-001".to_string()),
        name: Some("Asha Rao".to_string()),
        email: Some("asha.rao@example.com".to_string()),
        role: Role::Admin,
    }
}

/// Refresh endpoint answers `{"accessToken": new_token}`.
pub async fn mount_refresh_success(server: &MockServer, new_token: &str) {
    mount_refresh_success_after(server, new_token, Duration::ZERO).await;
}

/// Refresh endpoint answers `{"accessToken": new_token}` after `delay`.
pub async fn mount_refresh_success_after(server: &MockServer, new_token: &str, delay: Duration) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "accessToken": new_token }))
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Refresh endpoint answers with `status`.
pub async fn mount_refresh_failure(server: &MockServer, status: u16) {
    mount_refresh_failure_after(server, status, Duration::ZERO).await;
}

/// Refresh endpoint answers with `status` after `delay`.
pub async fn mount_refresh_failure_after(server: &MockServer, status: u16, delay: Duration) {
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(
            ResponseTemplate::new(status)
                .set_body_string("refresh token invalid")
                .set_delay(delay),
        )
        .mount(server)
        .await;
}

/// Requests the server received on `request_path`, in arrival order.
pub async fn received_on(server: &MockServer, request_path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == request_path)
        .collect()
}

/// `Authorization` header of a received request, if present.
#[must_use]
pub fn authorization_of(request: &Request) -> Option<String> {
    request
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}
