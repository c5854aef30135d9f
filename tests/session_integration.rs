//! Authenticated session behavior against a mocked token endpoint and node API.

mod support;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use sentinel_core::auth::{AuthError, AuthSession, ResolvedCredentials, TokenManager};
use sentinel_core::download::DownloadError;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use support::{
    FlakyResponder, SequenceResponder, TOKEN_PATH, fast_session_config, mount_token_endpoint,
    open_session, token_body,
};

const LISTING: &str = "/odata/v1/Products(scene-1)/Nodes";

#[tokio::test]
async fn test_session_sends_bearer_token() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path(LISTING))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(1)
        .mount(&server)
        .await;

    let session = open_session(&server, 3).await;
    let response = session
        .get(&format!("{}{LISTING}", server.uri()), None)
        .await
        .expect("request should succeed");
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_password_grant_form_fields() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .and(body_string_contains("grant_type=password"))
        .and(body_string_contains("username=alice"))
        .and(body_string_contains("client_id=test-client"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("tok-1")))
        .expect(1)
        .mount(&server)
        .await;

    let _session = open_session(&server, 1).await;
}

#[tokio::test]
async fn test_rejected_token_is_refreshed_and_request_retried_once() {
    let server = MockServer::start().await;
    let grants = SequenceResponder::new(vec![
        ResponseTemplate::new(200).set_body_json(token_body("tok-1")),
        ResponseTemplate::new(200).set_body_json(token_body("tok-2")),
    ]);
    let grant_count = grants.counter();
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(grants)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(LISTING))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LISTING))
        .and(header("Authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "result": [{ "Name": "S2A_X.SAFE" }]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let session = open_session(&server, 3).await;
    let listing: serde_json::Value = session
        .get_json(&format!("{}{LISTING}", server.uri()), Duration::from_secs(5))
        .await
        .expect("retry with fresh token should succeed");
    assert_eq!(listing["result"][0]["Name"], "S2A_X.SAFE");
    assert_eq!(grant_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_second_rejection_surfaces_as_http_error() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path(LISTING))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let session = open_session(&server, 3).await;
    let err = session
        .get(&format!("{}{LISTING}", server.uri()), None)
        .await
        .expect_err("second 401 must not be retried");
    assert_eq!(err.status(), Some(401), "Expected 401 in: {err}");
}

#[tokio::test]
async fn test_transient_status_is_retried() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "tok-1").await;
    let flaky = FlakyResponder::new(2, 503, b"payload");
    let calls = flaky.counter();
    Mock::given(method("GET"))
        .and(path(LISTING))
        .respond_with(flaky)
        .mount(&server)
        .await;

    let session = open_session(&server, 4).await;
    let response = session
        .get(&format!("{}{LISTING}", server.uri()), None)
        .await
        .expect("third attempt should succeed");
    assert_eq!(response.bytes().await.expect("body").as_ref(), b"payload");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path(LISTING))
        .respond_with(ResponseTemplate::new(502))
        .expect(2)
        .mount(&server)
        .await;

    let session = open_session(&server, 2).await;
    let err = session
        .get(&format!("{}{LISTING}", server.uri()), None)
        .await
        .expect_err("502 on every attempt");
    assert_eq!(err.status(), Some(502));
}

#[tokio::test]
async fn test_not_found_is_not_retried() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "tok-1").await;
    Mock::given(method("GET"))
        .and(path(LISTING))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let session = open_session(&server, 5).await;
    let err = session
        .get(&format!("{}{LISTING}", server.uri()), None)
        .await
        .expect_err("404 is permanent");
    assert!(matches!(err, DownloadError::HttpStatus { status: 404, .. }), "Expected 404 in: {err}");
}

#[tokio::test]
async fn test_open_fails_when_token_endpoint_rejects_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let config = fast_session_config(&server, 1);
    let tokens = TokenManager::new(
        config.token_endpoint.clone(),
        ResolvedCredentials::new("alice", "wrong"),
    )
    .expect("token manager");
    let err = AuthSession::open(Arc::new(tokens), &config)
        .await
        .expect_err("bad credentials must fail");
    assert!(
        matches!(
            err,
            DownloadError::Auth(AuthError::TokenRejected { status: 401, .. })
        ),
        "Expected token rejection in: {err}"
    );
}

#[tokio::test]
async fn test_content_length_probe_reads_head() {
    let server = MockServer::start().await;
    mount_token_endpoint(&server, "tok-1").await;
    Mock::given(method("HEAD"))
        .and(path("/odata/v1/Products(scene-1)/Nodes(a.jp2)/$value"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 1234]))
        .mount(&server)
        .await;

    let session = open_session(&server, 1).await;
    let length = session
        .content_length(
            &format!("{}/odata/v1/Products(scene-1)/Nodes(a.jp2)/$value", server.uri()),
            Duration::from_secs(5),
        )
        .await
        .expect("probe should succeed");
    assert_eq!(length, Some(1234));
}

#[tokio::test]
async fn test_concurrent_rejections_share_one_refresh() {
    let server = MockServer::start().await;
    let grants = SequenceResponder::new(vec![
        ResponseTemplate::new(200).set_body_json(token_body("tok-1")),
        ResponseTemplate::new(200).set_body_json(token_body("tok-2")),
        ResponseTemplate::new(200).set_body_json(token_body("tok-3")),
    ]);
    let grant_count = grants.counter();
    Mock::given(method("POST"))
        .and(path(TOKEN_PATH))
        .respond_with(grants)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LISTING))
        .and(header("Authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(LISTING))
        .and(header("Authorization", "Bearer tok-2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .expect(6)
        .mount(&server)
        .await;

    let session = open_session(&server, 1).await;
    let url = format!("{}{LISTING}", server.uri());
    let requests = (0..6).map(|_| {
        let session = session.clone();
        let url = url.clone();
        tokio::spawn(async move { session.get(&url, None).await })
    });
    for joined in futures_util::future::join_all(requests).await {
        let response = joined.unwrap().expect("request should succeed after refresh");
        assert_eq!(response.status(), 200);
    }
    assert_eq!(grant_count.load(Ordering::SeqCst), 2);
}
