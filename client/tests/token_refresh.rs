//! Integration tests for the 401 → refresh → retry flow using wiremock.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use futures::future::join_all;
use reqwest::{Method, StatusCode};
use serde_json::{Value, json};
use staffdesk_client::{AuthenticatedHttpClient, ClientConfig, ClientError, RequestOptions};
use staffdesk_core::{AccessToken, CredentialStore, SessionPhase};
use staffdesk_testing::fixtures::{
    REFRESH_PATH, admin_user, authorization_of, mount_refresh_failure,
    mount_refresh_failure_after, mount_refresh_success, mount_refresh_success_after,
    received_on, session, token,
};
use staffdesk_testing::{RecordingListener, init_test_tracing};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// =============================================================================
// Test Helpers
// =============================================================================

fn config_for(server: &MockServer) -> ClientConfig {
    ClientConfig::new(&server.uri())
        .unwrap()
        .with_refresh_timeout(Duration::from_secs(2))
}

fn client_for(server: &MockServer) -> (AuthenticatedHttpClient, Arc<RecordingListener>) {
    let listener = Arc::new(RecordingListener::new());
    let client = AuthenticatedHttpClient::new(config_for(server), listener.clone()).unwrap();
    (client, listener)
}

async fn get(
    client: &AuthenticatedHttpClient,
    request_path: &str,
) -> Result<reqwest::Response, ClientError> {
    client
        .request(Method::GET, request_path, None, RequestOptions::new())
        .await
}

/// `GET request_path` answers 401 to `Bearer expired` and 200 to `Bearer fresh`.
async fn mount_expiring_resource(server: &MockServer, request_path: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path(request_path))
        .and(header("authorization", "Bearer expired"))
        .respond_with(ResponseTemplate::new(401).set_body_string("jwt expired"))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path(request_path))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn wait_for_token(client: &AuthenticatedHttpClient, expected: Option<AccessToken>) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while client.access_token().await != expected {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("client token did not follow the store");
}

// =============================================================================
// Refresh Success
// =============================================================================

#[tokio::test]
async fn test_expired_token_is_refreshed_and_request_retried() {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/branch", json!([{"name": "Pune"}])).await;
    mount_refresh_success(&server, "fresh").await;

    let (client, listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    let response = get(&client, "/api/branch").await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body, json!([{"name": "Pune"}]));

    let branch_calls = received_on(&server, "/api/branch").await;
    assert_eq!(branch_calls.len(), 2);
    assert_eq!(authorization_of(&branch_calls[1]).as_deref(), Some("Bearer fresh"));

    assert_eq!(client.access_token().await, Some(token("fresh")));
    assert_eq!(listener.refresh_started_count(), 1);
    assert_eq!(listener.token_refreshed_count(), 1);
    assert_eq!(listener.session_expired_count(), 0);
    assert_eq!(listener.last_session(), Some(session("fresh")));
}

#[tokio::test]
async fn test_refreshed_token_is_used_by_later_requests() {
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/branch", json!([])).await;
    Mock::given(method("GET"))
        .and(path("/api/holidays/2024"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;
    mount_refresh_success(&server, "fresh").await;

    let (client, _listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    get(&client, "/api/branch").await.unwrap();
    let response = get(&client, "/api/holidays/2024").await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(received_on(&server, "/api/holidays/2024").await.len(), 1);
    assert_eq!(received_on(&server, REFRESH_PATH).await.len(), 1);
}

#[tokio::test]
async fn test_refresh_call_carries_no_bearer_token() {
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/branch", json!([])).await;
    mount_refresh_success(&server, "fresh").await;

    let (client, _listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;
    get(&client, "/api/branch").await.unwrap();

    let refresh_calls = received_on(&server, REFRESH_PATH).await;
    assert_eq!(refresh_calls.len(), 1);
    assert_eq!(refresh_calls[0].method.as_str(), "POST");
    assert!(authorization_of(&refresh_calls[0]).is_none());
    assert!(refresh_calls[0].body.is_empty());
}

#[tokio::test]
async fn test_refresh_cookie_is_sent_by_transport() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/auth/login"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("set-cookie", "refreshToken=r-123; HttpOnly; Path=/")
                .set_body_json(json!({"accessToken": "expired"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .and(header("cookie", "refreshToken=r-123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": "fresh"})))
        .expect(1)
        .mount(&server)
        .await;
    mount_expiring_resource(&server, "/api/employee", json!([])).await;

    let (client, _listener) = client_for(&server);
    let login = client
        .request(
            Method::POST,
            "/api/auth/login",
            Some(json!({"email": "asha.rao@example.com", "password": "pw"})),
            RequestOptions::new(),
        )
        .await
        .unwrap();
    assert_eq!(login.status(), StatusCode::OK);
    client.set_access_token(Some(token("expired"))).await;

    let response = get(&client, "/api/employee").await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(client.access_token().await, Some(token("fresh")));
}

// =============================================================================
// Single Retry
// =============================================================================

#[tokio::test]
async fn test_second_unauthorized_is_returned_without_third_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/branch"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    mount_refresh_success(&server, "fresh").await;

    let (client, listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    let response = get(&client, "/api/branch").await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let branch_calls = received_on(&server, "/api/branch").await;
    assert_eq!(branch_calls.len(), 2);
    assert_eq!(authorization_of(&branch_calls[0]).as_deref(), Some("Bearer expired"));
    assert_eq!(authorization_of(&branch_calls[1]).as_deref(), Some("Bearer fresh"));
    assert_eq!(received_on(&server, REFRESH_PATH).await.len(), 1);
    assert_eq!(listener.session_expired_count(), 0);
}

#[tokio::test]
async fn test_unauthorized_after_logout_does_not_refresh() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/assets"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;
    mount_refresh_success(&server, "fresh").await;

    let (client, listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    let in_flight = tokio::spawn({
        let client = client.clone();
        async move { get(&client, "/api/assets").await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    client.set_access_token(None).await;

    let response = in_flight.await.unwrap().unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(received_on(&server, "/api/assets").await.len(), 1);
    assert!(received_on(&server, REFRESH_PATH).await.is_empty());
    assert_eq!(listener.refresh_started_count(), 0);
}

#[tokio::test]
async fn test_post_body_is_resent_on_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/designation"))
        .and(header("authorization", "Bearer expired"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/designation"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 9})))
        .mount(&server)
        .await;
    mount_refresh_success(&server, "fresh").await;

    let (client, _listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    let payload = json!({"title": "Fleet Supervisor"});
    let response = client
        .request(
            Method::POST,
            "/api/designation",
            Some(payload.clone()),
            RequestOptions::new(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    let calls = received_on(&server, "/api/designation").await;
    assert_eq!(calls.len(), 2);
    for call in &calls {
        let sent: Value = serde_json::from_slice(&call.body).unwrap();
        assert_eq!(sent, payload);
    }
}

// =============================================================================
// Refresh Failure
// =============================================================================

#[tokio::test]
async fn test_refresh_rejection_rejects_call_and_logs_out_once() {
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/branch", json!([])).await;
    mount_refresh_failure(&server, 403).await;

    let (client, listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    let err = get(&client, "/api/branch").await.unwrap_err();

    assert_eq!(
        err,
        ClientError::RefreshRejected {
            status: 403,
            message: "refresh token invalid".to_string(),
        }
    );
    assert!(err.is_session_terminated());
    assert_eq!(listener.session_expired_count(), 1);
    assert_eq!(listener.token_refreshed_count(), 0);
    assert!(client.access_token().await.is_none());
    assert_eq!(received_on(&server, "/api/branch").await.len(), 1);
}

#[tokio::test]
async fn test_malformed_refresh_response_terminates_session() {
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/branch", json!([])).await;
    Mock::given(method("POST"))
        .and(path(REFRESH_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"accessToken": ""})))
        .mount(&server)
        .await;

    let (client, listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    let err = get(&client, "/api/branch").await.unwrap_err();

    assert!(matches!(err, ClientError::RefreshFailed(_)));
    assert_eq!(listener.session_expired_count(), 1);
}

#[tokio::test]
async fn test_refresh_timeout_terminates_session() {
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/branch", json!([])).await;
    mount_refresh_success_after(&server, "fresh", Duration::from_secs(5)).await;

    let listener = Arc::new(RecordingListener::new());
    let config = config_for(&server).with_refresh_timeout(Duration::from_millis(200));
    let client = AuthenticatedHttpClient::new(config, listener.clone()).unwrap();
    client.set_access_token(Some(token("expired"))).await;

    let err = get(&client, "/api/branch").await.unwrap_err();

    assert_eq!(err, ClientError::RefreshTimedOut);
    assert_eq!(listener.session_expired_count(), 1);
    assert!(client.access_token().await.is_none());
}

// =============================================================================
// Coalescing
// =============================================================================

#[tokio::test]
async fn test_concurrent_unauthorized_requests_share_one_refresh() {
    init_test_tracing();
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/employee", json!([])).await;
    mount_refresh_success_after(&server, "fresh", Duration::from_millis(300)).await;

    let (client, listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    let responses = join_all((0..5).map(|_| get(&client, "/api/employee"))).await;

    for response in responses {
        assert_eq!(response.unwrap().status(), StatusCode::OK);
    }
    assert_eq!(received_on(&server, REFRESH_PATH).await.len(), 1);
    assert_eq!(received_on(&server, "/api/employee").await.len(), 10);
    assert_eq!(listener.refresh_started_count(), 1);
    assert_eq!(listener.token_refreshed_count(), 1);
}

#[tokio::test]
async fn test_concurrent_refresh_failure_logs_out_once() {
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/employee", json!([])).await;
    mount_refresh_failure_after(&server, 401, Duration::from_millis(300)).await;

    let (client, listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    let results = join_all((0..5).map(|_| get(&client, "/api/employee"))).await;

    for result in results {
        let err = result.unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(err.is_session_terminated());
    }
    assert_eq!(received_on(&server, REFRESH_PATH).await.len(), 1);
    assert_eq!(listener.session_expired_count(), 1);
}

/// `GET {prefix}/{i}` answers 401 to `Bearer expired` after `i * step`, and
/// 200 to `Bearer fresh` right away.
async fn mount_staggered_resources(
    server: &MockServer,
    prefix: &str,
    count: u64,
    step: Duration,
) {
    for i in 0..count {
        let request_path = format!("{prefix}/{i}");
        let delay = step * u32::try_from(i).unwrap();
        Mock::given(method("GET"))
            .and(path(request_path.as_str()))
            .and(header("authorization", "Bearer expired"))
            .respond_with(ResponseTemplate::new(401).set_delay(delay))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path(request_path.as_str()))
            .and(header("authorization", "Bearer fresh"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": i})))
            .mount(server)
            .await;
    }
}

async fn get_all_spawned(
    client: &AuthenticatedHttpClient,
    prefix: &str,
    count: u64,
) -> Vec<Result<reqwest::Response, ClientError>> {
    let handles = (0..count).map(|i| {
        let client = client.clone();
        let request_path = format!("{prefix}/{i}");
        tokio::spawn(async move { get(&client, &request_path).await })
    });
    join_all(handles)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_unauthorized_after_failed_refresh_does_not_refresh_again() {
    let server = MockServer::start().await;
    mount_staggered_resources(&server, "/api/attendance", 24, Duration::from_millis(10)).await;
    mount_refresh_failure_after(&server, 401, Duration::from_millis(100)).await;

    let (client, listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    let results = get_all_spawned(&client, "/api/attendance", 24).await;

    for result in results {
        let err = result.unwrap_err();
        assert!(err.is_session_terminated());
        assert_eq!(err.status(), Some(401));
    }
    assert_eq!(received_on(&server, REFRESH_PATH).await.len(), 1);
    assert_eq!(listener.refresh_started_count(), 1);
    assert_eq!(listener.session_expired_count(), 1);
    assert!(client.access_token().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_late_unauthorized_after_successful_refresh_reuses_token() {
    let server = MockServer::start().await;
    mount_staggered_resources(&server, "/api/leave", 24, Duration::from_millis(10)).await;
    mount_refresh_success_after(&server, "fresh", Duration::from_millis(100)).await;

    let (client, listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    let results = get_all_spawned(&client, "/api/leave", 24).await;

    for result in results {
        assert_eq!(result.unwrap().status(), StatusCode::OK);
    }
    assert_eq!(received_on(&server, REFRESH_PATH).await.len(), 1);
    assert_eq!(listener.token_refreshed_count(), 1);
    assert_eq!(listener.session_expired_count(), 0);
    assert_eq!(received_on(&server, "/api/leave/23").await.len(), 2);
}

#[tokio::test]
async fn test_late_unauthorized_after_refresh_and_logout_returns_401() {
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/branch", json!([])).await;
    Mock::given(method("GET"))
        .and(path("/api/reports"))
        .respond_with(ResponseTemplate::new(401).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;
    mount_refresh_success(&server, "fresh").await;

    let (client, listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    let slow = tokio::spawn({
        let client = client.clone();
        async move { get(&client, "/api/reports").await }
    });
    get(&client, "/api/branch").await.unwrap();
    client.set_access_token(None).await;

    let response = slow.await.unwrap().unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(received_on(&server, "/api/reports").await.len(), 1);
    assert_eq!(received_on(&server, REFRESH_PATH).await.len(), 1);
    assert_eq!(listener.token_refreshed_count(), 1);
}

#[tokio::test]
async fn test_refresh_survives_abort_of_the_request_that_started_it() {
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/payroll", json!({"month": "2024-03"})).await;
    mount_refresh_success_after(&server, "fresh", Duration::from_millis(300)).await;

    let (client, listener) = client_for(&server);
    client.set_access_token(Some(token("expired"))).await;

    let starter = tokio::spawn({
        let client = client.clone();
        async move { get(&client, "/api/payroll").await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    starter.abort();
    assert!(starter.await.unwrap_err().is_cancelled());

    let response = get(&client, "/api/payroll").await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(received_on(&server, REFRESH_PATH).await.len(), 1);
    assert_eq!(listener.refresh_started_count(), 1);
    assert_eq!(listener.token_refreshed_count(), 1);
    assert_eq!(client.access_token().await, Some(token("fresh")));
}

#[tokio::test]
async fn test_refresh_runs_again_after_previous_one_settled() {
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/branch", json!([])).await;
    mount_refresh_success(&server, "fresh").await;

    let (client, listener) = client_for(&server);

    client.set_access_token(Some(token("expired"))).await;
    get(&client, "/api/branch").await.unwrap();

    // Token expires again later on
    client.set_access_token(Some(token("expired"))).await;
    get(&client, "/api/branch").await.unwrap();

    assert_eq!(received_on(&server, REFRESH_PATH).await.len(), 2);
    assert_eq!(listener.token_refreshed_count(), 2);
}

// =============================================================================
// Credential Store Integration
// =============================================================================

#[tokio::test]
async fn test_store_follows_refresh_and_logout() {
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/branch", json!([])).await;
    mount_refresh_success(&server, "fresh").await;

    let store = Arc::new(CredentialStore::new());
    let client = AuthenticatedHttpClient::new(config_for(&server), store.clone()).unwrap();
    let _follow = client.follow(store.subscribe());

    store.sign_in(session("expired").with_user(admin_user()));
    wait_for_token(&client, Some(token("expired"))).await;

    let response = get(&client, "/api/branch").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    assert_eq!(store.phase(), SessionPhase::Authenticated);
    let current = store.current_session().unwrap();
    assert_eq!(current.access_token, token("fresh"));
    assert_eq!(current.user, Some(admin_user()));

    store.logout();
    wait_for_token(&client, None).await;

    get(&client, "/api/branch").await.unwrap();
    let last = received_on(&server, "/api/branch").await.pop().unwrap();
    assert!(authorization_of(&last).is_none());
}

#[tokio::test]
async fn test_store_is_cleared_when_refresh_fails() {
    let server = MockServer::start().await;
    mount_expiring_resource(&server, "/api/branch", json!([])).await;
    mount_refresh_failure(&server, 401).await;

    let store = Arc::new(CredentialStore::new());
    let client = AuthenticatedHttpClient::new(config_for(&server), store.clone()).unwrap();
    let _follow = client.follow(store.subscribe());

    store.sign_in(session("expired").with_user(admin_user()));
    wait_for_token(&client, Some(token("expired"))).await;

    let err = get(&client, "/api/branch").await.unwrap_err();

    assert!(err.is_session_terminated());
    assert_eq!(store.phase(), SessionPhase::Anonymous);
    assert!(store.current_session().is_none());
    wait_for_token(&client, None).await;
}
