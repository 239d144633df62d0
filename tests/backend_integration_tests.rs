//! Integration Tests for Provider Backends
//!
//! UNIT UNDER TEST: Backend implementations via Resource
//!
//! BUSINESS RESPONSIBILITY:
//!   - Obtain Qianfan access tokens from the OAuth endpoint with AK/SK
//!   - Attach credentials the way each provider expects
//!   - Recover once from an expired or invalid token by refreshing it
//!   - Never refresh tokens that cannot be refreshed
//!   - Unwrap AI Studio result envelopes
//!
//! TEST COVERAGE:
//!   - OAuth exchange and token reuse across calls
//!   - Refresh-once on provider code 110, async and blocking
//!   - Static tokens failing exactly once
//!   - AI Studio header and result unwrapping
//!   - Custom bearer tokens and IAM signatures

mod common;

use common::{
    chat_success, fast_retries, init_tracing, isolated_config, oauth_token, qianfan_error, resource,
};
use erniebot::{ApiType, ErnieError, Request};
use serde_json::json;
use wiremock::matchers::{header, header_exists, header_regex, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helper Functions
// ============================================================================

const CHAT_PATH: &str = "/chat/completions";

fn chat_request() -> Request {
    Request::post(CHAT_PATH).with_json(json!({"messages": [{"role": "user", "content": "hi"}]}))
}

async fn mount_oauth(server: &MockServer, token: &str, times: u64) {
    Mock::given(method("POST"))
        .and(path("/oauth/2.0/token"))
        .and(query_param("grant_type", "client_credentials"))
        .and(query_param("client_id", "my-ak"))
        .and(query_param("client_secret", "my-sk"))
        .respond_with(ResponseTemplate::new(200).set_body_json(oauth_token(token)))
        .up_to_n_times(times)
        .expect(times)
        .mount(server)
        .await;
}

fn oauth_config(server: &MockServer) -> erniebot::Config {
    isolated_config(ApiType::Qianfan, &server.uri())
        .with_credentials("my-ak", "my-sk")
        .with_auth_url(format!("{}/oauth/2.0/token", server.uri()))
}

// ============================================================================
// Qianfan OAuth
// ============================================================================

#[tokio::test]
async fn test_qianfan_fetches_token_once_and_reuses_it() {
    // Arrange
    let server = MockServer::start().await;
    mount_oauth(&server, "oauth-token", 1).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(query_param("access_token", "oauth-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("hi")))
        .expect(2)
        .mount(&server)
        .await;
    let resource = resource(oauth_config(&server));

    // Act
    let first = resource.request(&chat_request()).await.unwrap().into_single().unwrap();
    let second = resource.request(&chat_request()).await.unwrap().into_single().unwrap();

    // Assert
    assert_eq!(first["result"], "hi");
    assert_eq!(second["result"], "hi");
}

#[tokio::test]
async fn test_invalid_token_is_refreshed_and_request_resent_once() {
    // Arrange
    init_tracing();
    let server = MockServer::start().await;
    mount_oauth(&server, "stale-token", 1).await;
    mount_oauth(&server, "fresh-token", 1).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(query_param("access_token", "stale-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(qianfan_error(110, "Access token invalid")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(query_param("access_token", "fresh-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("recovered")))
        .expect(1)
        .mount(&server)
        .await;
    let resource = resource(oauth_config(&server));

    // Act
    let envelope = resource.request(&chat_request()).await.unwrap().into_single().unwrap();

    // Assert
    assert_eq!(envelope["result"], "recovered");
}

#[tokio::test]
async fn test_token_error_after_refresh_is_returned() {
    // Arrange
    let server = MockServer::start().await;
    mount_oauth(&server, "token-a", 1).await;
    mount_oauth(&server, "token-b", 1).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(qianfan_error(111, "Access token expired")))
        .expect(2)
        .mount(&server)
        .await;
    let resource = resource(oauth_config(&server));

    // Act
    let result = resource.request(&chat_request()).await;

    // Assert
    assert!(matches!(result, Err(ErnieError::TokenExpired(_))));
}

#[tokio::test]
async fn test_http_401_with_provider_payload_triggers_refresh() {
    // Arrange
    let server = MockServer::start().await;
    mount_oauth(&server, "first", 1).await;
    mount_oauth(&server, "second", 1).await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(query_param("access_token", "first"))
        .respond_with(ResponseTemplate::new(401).set_body_json(qianfan_error(111, "expired")))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(query_param("access_token", "second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("ok")))
        .expect(1)
        .mount(&server)
        .await;
    let resource = resource(oauth_config(&server));

    // Act
    let result = resource.request(&chat_request()).await;

    // Assert
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_failed_oauth_exchange_is_token_update_failure() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/oauth/2.0/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"error": "invalid_client", "error_description": "unknown client id"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("never")))
        .expect(0)
        .mount(&server)
        .await;
    let resource = resource(oauth_config(&server));

    // Act
    let error = resource.request(&chat_request()).await.unwrap_err();

    // Assert
    match error {
        ErnieError::TokenUpdateFailed { source, .. } => {
            let source = source.expect("cause");
            assert!(source.to_string().contains("unknown client id"));
        }
        other => panic!("expected TokenUpdateFailed, got {other:?}"),
    }
}

#[test]
fn test_blocking_request_refreshes_token_once() {
    // Arrange
    init_tracing();
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        mount_oauth(&server, "fresh-token", 1).await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .and(query_param("access_token", "preset-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(qianfan_error(110, "invalid")))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(CHAT_PATH))
            .and(query_param("access_token", "fresh-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("blocking ok")))
            .expect(1)
            .mount(&server)
            .await;
        server
    });
    let config = oauth_config(&server).with_access_token("preset-token");
    let resource = resource(config);

    // Act
    let envelope = resource
        .request_blocking(&chat_request())
        .unwrap()
        .into_single()
        .unwrap();

    // Assert
    assert_eq!(envelope["result"], "blocking ok");
}

#[tokio::test]
async fn test_static_token_failure_is_not_retried() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(query_param("access_token", "fixed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(qianfan_error(110, "invalid")))
        .expect(1)
        .mount(&server)
        .await;
    let config = isolated_config(ApiType::Qianfan, &server.uri())
        .with_access_token("fixed")
        .with_retry_policy(fast_retries(3));
    let resource = resource(config);

    // Act
    let result = resource.request(&chat_request()).await;

    // Assert
    assert!(matches!(result, Err(ErnieError::InvalidToken(_))));
}

// ============================================================================
// AI Studio
// ============================================================================

#[tokio::test]
async fn test_aistudio_sends_token_header_and_unwraps_result() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("authorization", "token studio-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "logId": "abc",
            "errorCode": 0,
            "errorMsg": "success",
            "result": {"result": "from studio", "is_end": true}
        })))
        .expect(1)
        .mount(&server)
        .await;
    let config = isolated_config(ApiType::AiStudio, &server.uri()).with_access_token("studio-token");

    // Act
    let envelope = resource(config)
        .request(&chat_request())
        .await
        .unwrap()
        .into_single()
        .unwrap();

    // Assert
    assert_eq!(envelope["result"], "from studio");
    assert!(envelope.get("errorCode").is_none());
}

#[tokio::test]
async fn test_aistudio_token_error_is_sent_once() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"errorCode": 110, "errorMsg": "bad token"})),
        )
        .expect(1)
        .mount(&server)
        .await;
    let config = isolated_config(ApiType::AiStudio, &server.uri()).with_access_token("studio-token");

    // Act
    let result = resource(config).request(&chat_request()).await;

    // Assert
    match result {
        Err(ErnieError::InvalidToken(details)) => {
            assert_eq!(details.message, "bad token");
            assert_eq!(details.error_code, Some(110));
        }
        other => panic!("expected InvalidToken, got {other:?}"),
    }
}

// ============================================================================
// Custom and IAM
// ============================================================================

#[tokio::test]
async fn test_custom_backend_sends_bearer_token() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header("authorization", "Bearer local-key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("custom")))
        .expect(1)
        .mount(&server)
        .await;
    let config = isolated_config(ApiType::Custom, &server.uri()).with_access_token("local-key");

    // Act
    let envelope = resource(config)
        .request(&chat_request())
        .await
        .unwrap()
        .into_single()
        .unwrap();

    // Assert
    assert_eq!(envelope["result"], "custom");
}

#[tokio::test]
async fn test_iam_backend_signs_request() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path(CHAT_PATH))
        .and(header_regex(
            "authorization",
            r"^bce-auth-v1/iam-ak/\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}Z/1800/[a-z0-9;-]+/[0-9a-f]{64}$",
        ))
        .and(header_exists("x-bce-date"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("signed")))
        .expect(1)
        .mount(&server)
        .await;
    let config = isolated_config(ApiType::QianfanIam, &server.uri()).with_credentials("iam-ak", "iam-sk");

    // Act
    let envelope = resource(config)
        .request(&chat_request())
        .await
        .unwrap()
        .into_single()
        .unwrap();

    // Assert
    assert_eq!(envelope["result"], "signed");
}
