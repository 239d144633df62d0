//! Test helper utilities for erniebot integration tests
//!
//! Fixtures shared by the wiremock-based test files. Every config built here
//! uses its own token cache so tests never observe each other's tokens.
//!
//! IMPORTANT: These helpers are test-only and should NEVER be used in production code.

// Allow dead code in test utilities - functions are used across different test files
#![allow(dead_code)]

use erniebot::{ApiType, Config, Resource, RetryPolicy, TokenCache};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use wiremock::ResponseTemplate;

/// Route SDK logs to the test output; `RUST_LOG=erniebot=debug` shows them.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Config with an isolated token cache that allows immediate refresh.
pub fn isolated_config(api_type: ApiType, base_url: &str) -> Config {
    Config::new(api_type)
        .with_base_url(base_url)
        .with_token_cache(Arc::new(TokenCache::new(Duration::ZERO)))
}

/// Qianfan config that already holds an access token.
pub fn qianfan_config(base_url: &str, token: &str) -> Config {
    isolated_config(ApiType::Qianfan, base_url).with_access_token(token)
}

/// Short backoff so retry tests stay fast.
pub fn fast_retries(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        min_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(50),
        ..RetryPolicy::default()
    }
}

pub fn resource(config: Config) -> Resource {
    Resource::new(config).expect("resource")
}

/// Render `events` as a `text/event-stream` body, one `data:` line each,
/// with blank separators and a comment line in between.
pub fn sse_body(events: &[Value]) -> String {
    let mut body = String::from(": keep-alive\n\n");
    for event in events {
        body.push_str(&format!("data: {event}\n\n"));
    }
    body
}

pub fn sse_response(events: &[Value]) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(sse_body(events), "text/event-stream")
}

/// Streamed chat chunk number `n` of `total`.
pub fn chat_chunk(n: usize, total: usize, text: &str) -> Value {
    json!({
        "id": "as-stream",
        "sentence_id": n,
        "is_end": n + 1 == total,
        "result": text,
    })
}

pub fn chat_success(text: &str) -> Value {
    json!({
        "id": "as-123",
        "object": "chat.completion",
        "result": text,
        "is_truncated": false,
        "need_clear_history": false,
        "usage": {"prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8}
    })
}

pub fn qianfan_error(code: i64, message: &str) -> Value {
    json!({"error_code": code, "error_msg": message})
}

pub fn oauth_token(token: &str) -> Value {
    json!({"access_token": token, "expires_in": 2_592_000})
}
