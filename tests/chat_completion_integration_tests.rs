//! Integration Tests for Chat Completion
//!
//! UNIT UNDER TEST: ChatCompletion (create / create_blocking / create_from_kwargs)
//!
//! BUSINESS RESPONSIBILITY:
//!   - Send validated chat requests to the model's endpoint
//!   - Return text or function-call results
//!   - Stream chunks in order when asked to
//!   - Retry transient provider errors, never bad requests
//!   - Honour per-call configuration overrides
//!
//! TEST COVERAGE:
//!   - Single responses, function calls, streaming (async and blocking)
//!   - Streams abandoned after the first chunk, async and blocking
//!   - TryAgain retried, BadRequest returned at once
//!   - Validation errors never reach the network
//!   - `_config_` redirecting one call to another provider
//!   - Chat completion obtained through ErnieClient

mod common;

use common::{
    chat_chunk, chat_success, fast_retries, qianfan_config, qianfan_error, sse_response,
};
use erniebot::resources::chat_completion::BlockingChatCompletionResult;
use erniebot::{
    ChatCompletion, ChatCompletionParams, ChatCompletionResult, ChatResult, ErnieClient, ErnieError,
    Message, Resource,
};
use futures_util::StreamExt;
use serde_json::{json, Map, Value};
use wiremock::matchers::{body_partial_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Helper Functions
// ============================================================================

fn chat(config: erniebot::Config) -> ChatCompletion {
    ChatCompletion::from_resource(Resource::new(config).expect("resource"))
}

fn hello(model: &str) -> ChatCompletionParams {
    ChatCompletionParams::new(model, vec![Message::user("Hello")])
}

fn kwargs(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("kwargs must be an object, got {other}"),
    }
}

// ============================================================================
// Single Responses
// ============================================================================

#[tokio::test]
async fn test_create_returns_text_result() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions_pro"))
        .and(query_param("access_token", "tok"))
        .and(body_partial_json(json!({
            "messages": [{"role": "user", "content": "Hello"}],
            "temperature": 0.5
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("Hi, how can I help?")))
        .expect(1)
        .mount(&server)
        .await;
    let chat = chat(qianfan_config(&server.uri(), "tok"));

    // Act
    let response = chat
        .create(hello("ernie-bot-4").with_temperature(0.5))
        .await
        .unwrap()
        .into_response()
        .unwrap();

    // Assert
    assert_eq!(response.result(), "Hi, how can I help?");
    assert_eq!(response.usage().unwrap().total_tokens, 8);
    assert!(response.is_end());
}

#[tokio::test]
async fn test_function_call_round_trip() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(body_partial_json(json!({"functions": [{"name": "get_weather"}]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": "",
            "function_call": {
                "name": "get_weather",
                "arguments": "{\"city\":\"Shenzhen\"}",
                "thoughts": "I should look up the weather"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    let function = erniebot::Function {
        name: "get_weather".to_string(),
        description: "Current weather of a city".to_string(),
        parameters: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
        responses: None,
        examples: None,
    };
    let chat = chat(qianfan_config(&server.uri(), "tok"));

    // Act
    let response = chat
        .create(hello("ernie-bot").with_functions(vec![function]))
        .await
        .unwrap()
        .into_response()
        .unwrap();

    // Assert
    match response.get_result() {
        ChatResult::FunctionCall(call) => {
            assert_eq!(call.name, "get_weather");
            let args: Value = serde_json::from_str(&call.arguments).unwrap();
            assert_eq!(args["city"], "Shenzhen");
        }
        other => panic!("expected a function call, got {other:?}"),
    }
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn test_streaming_yields_chunks_in_order() {
    // Arrange
    let server = MockServer::start().await;
    let events: Vec<Value> = ["Hel", "lo ", "there"]
        .iter()
        .enumerate()
        .map(|(i, text)| chat_chunk(i, 3, text))
        .collect();
    Mock::given(method("POST"))
        .and(path("/chat/eb-instant"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse_response(&events))
        .expect(1)
        .mount(&server)
        .await;
    let chat = chat(qianfan_config(&server.uri(), "tok"));

    // Act
    let result = chat.create(hello("ernie-bot-turbo").with_stream(true)).await.unwrap();
    let ChatCompletionResult::Stream(stream) = result else {
        panic!("expected a stream");
    };
    let chunks: Vec<_> = stream.collect().await;

    // Assert
    let text: String = chunks
        .iter()
        .map(|chunk| chunk.as_ref().unwrap().result().to_string())
        .collect();
    assert_eq!(text, "Hello there");
    assert!(!chunks[0].as_ref().unwrap().is_end());
    assert!(chunks[2].as_ref().unwrap().is_end());
    assert_eq!(chunks[1].as_ref().unwrap().sentence_id(), Some(1));
}

#[test]
fn test_blocking_stream_can_stop_early() {
    // Arrange
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        let events: Vec<Value> = (0..5).map(|i| chat_chunk(i, 5, "x")).collect();
        Mock::given(method("POST"))
            .respond_with(sse_response(&events))
            .mount(&server)
            .await;
        server
    });
    let chat = chat(qianfan_config(&server.uri(), "tok"));

    // Act
    let result = chat.create_blocking(hello("ernie-bot").with_stream(true)).unwrap();
    let BlockingChatCompletionResult::Stream(mut iter) = result else {
        panic!("expected a stream");
    };
    let first_two: Vec<_> = iter.by_ref().take(2).collect();
    iter.close();

    // Assert
    assert_eq!(first_two.len(), 2);
    assert!(first_two.iter().all(Result::is_ok));
    assert!(iter.next().is_none());
}

#[tokio::test]
async fn test_abandoned_stream_leaves_resource_usable() {
    // Arrange
    let server = MockServer::start().await;
    let events: Vec<Value> = (0..5).map(|i| chat_chunk(i, 5, "x")).collect();
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse_response(&events))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("after")))
        .expect(1)
        .mount(&server)
        .await;
    let chat = chat(qianfan_config(&server.uri(), "tok"));

    // Act
    let mut stream = chat
        .create(hello("ernie-bot").with_stream(true))
        .await
        .unwrap()
        .into_stream();
    let first = stream.next().await.expect("first chunk").unwrap();
    drop(stream);
    let next_call = chat
        .create(hello("ernie-bot"))
        .await
        .unwrap()
        .into_response()
        .unwrap();

    // Assert
    assert_eq!(first.sentence_id(), Some(0));
    assert_eq!(next_call.result(), "after");
}

#[test]
fn test_blocking_stream_released_on_drop() {
    // Arrange
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        let events: Vec<Value> = (0..5).map(|i| chat_chunk(i, 5, "x")).collect();
        Mock::given(method("POST"))
            .respond_with(sse_response(&events))
            .expect(2)
            .mount(&server)
            .await;
        server
    });
    let chat = chat(qianfan_config(&server.uri(), "tok"));

    // Act
    for _ in 0..2 {
        let result = chat.create_blocking(hello("ernie-bot").with_stream(true)).unwrap();
        let BlockingChatCompletionResult::Stream(mut iter) = result else {
            panic!("expected a stream");
        };
        let first = iter.next().expect("first chunk").unwrap();

        // Assert
        assert_eq!(first.sentence_id(), Some(0));
    }
}

#[test]
fn test_blocking_single_response() {
    // Arrange
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(async {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/ernie_bot_8k"))
            .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("long context")))
            .expect(1)
            .mount(&server)
            .await;
        server
    });
    let chat = chat(qianfan_config(&server.uri(), "tok"));

    // Act
    let response = chat
        .create_blocking(hello("ernie-bot-8k"))
        .unwrap()
        .into_response()
        .unwrap();

    // Assert
    assert_eq!(response.result(), "long context");
}

// ============================================================================
// Errors and Retries
// ============================================================================

#[tokio::test]
async fn test_try_again_is_retried() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(qianfan_error(336100, "busy")))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("third time lucky")))
        .expect(1)
        .mount(&server)
        .await;
    let config = qianfan_config(&server.uri(), "tok").with_retry_policy(fast_retries(3));

    // Act
    let response = chat(config)
        .create(hello("ernie-bot"))
        .await
        .unwrap()
        .into_response()
        .unwrap();

    // Assert
    assert_eq!(response.result(), "third time lucky");
}

#[tokio::test]
async fn test_bad_request_is_not_retried() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(qianfan_error(336003, "the first message is empty")),
        )
        .expect(1)
        .mount(&server)
        .await;
    let config = qianfan_config(&server.uri(), "tok").with_retry_policy(fast_retries(3));

    // Act
    let result = chat(config).create(hello("ernie-bot")).await;

    // Assert
    match result {
        Err(ErnieError::BadRequest(details)) => {
            assert_eq!(details.error_code, Some(336003));
            assert_eq!(details.message, "the first message is empty");
        }
        other => panic!("expected BadRequest, got {other:?}"),
    }
}

#[tokio::test]
async fn test_invalid_parameters_never_reach_the_network() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("unused")))
        .expect(0)
        .mount(&server)
        .await;
    let chat = chat(qianfan_config(&server.uri(), "tok"));

    // Act
    let result = chat.create(hello("ernie-bot").with_top_p(3.0)).await;

    // Assert
    assert!(matches!(result, Err(ErnieError::InvalidArgument { .. })));
}

// ============================================================================
// Keyword Arguments and Overrides
// ============================================================================

#[tokio::test]
async fn test_kwargs_with_config_override_redirect_one_call() {
    // Arrange
    let default_server = MockServer::start().await;
    let other_server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("default")))
        .expect(0)
        .mount(&default_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("authorization", "Bearer other-key"))
        .and(header("x-trace-id", "trace-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("redirected")))
        .expect(1)
        .mount(&other_server)
        .await;
    let chat = chat(qianfan_config(&default_server.uri(), "tok"));
    let args = kwargs(json!({
        "model": "ernie-bot",
        "messages": [{"role": "user", "content": "Hello"}],
        "headers": {"X-Trace-Id": "trace-1"},
        "_config_": {
            "api_type": "custom",
            "base_url": other_server.uri(),
            "access_token": "other-key"
        }
    }));

    // Act
    let response = chat
        .create_from_kwargs(&args)
        .await
        .unwrap()
        .into_response()
        .unwrap();

    // Assert
    assert_eq!(response.result(), "redirected");
    assert_eq!(chat.resource().api_type(), erniebot::ApiType::Qianfan);
}

#[tokio::test]
async fn test_unknown_kwarg_is_rejected() {
    // Arrange
    let chat = chat(qianfan_config("http://127.0.0.1:1", "tok"));
    let args = kwargs(json!({"model": "ernie-bot", "messages": [], "top_k": 3}));

    // Act
    let result = chat.create_from_kwargs(&args).await;

    // Assert
    assert!(matches!(result, Err(ErnieError::InvalidArgument { .. })));
}

// ============================================================================
// Client Facade
// ============================================================================

#[tokio::test]
async fn test_client_hands_out_chat_completion() {
    // Arrange
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(query_param("access_token", "tok"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_success("via client")))
        .expect(1)
        .mount(&server)
        .await;
    let client = ErnieClient::new(qianfan_config(&server.uri(), "tok")).unwrap();

    // Act
    let response = client
        .chat_completion()
        .unwrap()
        .create(hello("ernie-bot"))
        .await
        .unwrap()
        .into_response()
        .unwrap();

    // Assert
    assert_eq!(response.result(), "via client");
}
