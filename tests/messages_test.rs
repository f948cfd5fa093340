//! End-to-end tests for the Anthropic messages endpoint.
//!
//! The router runs in-process via `oneshot`; the upstream is a wiremock server.

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use copilot_gateway_rust::{
    core::{
        config::{RateLimitConfig, ServerConfig, UpstreamConfig},
        init_metrics, AppConfig,
    },
    create_router, AppState,
};
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

fn test_config(server: &MockServer, api_key: Option<&str>) -> AppConfig {
    AppConfig {
        server: ServerConfig::default(),
        upstream: UpstreamConfig {
            token: "test-token".to_string(),
            account_type: "individual".to_string(),
            base_url: Some(server.uri()),
            vscode_version: "1.99.3".to_string(),
        },
        rate_limit: RateLimitConfig::default(),
        api_key: api_key.map(str::to_string),
        verify_ssl: true,
        request_timeout_secs: 30,
    }
}

fn create_test_app(server: &MockServer, api_key: Option<&str>) -> Router {
    init_metrics();
    let state = AppState::new(test_config(server, api_key), reqwest::Client::new())
        .expect("valid test config");
    create_router(Arc::new(state))
}

fn post_json(uri: &str, body: &Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Split an SSE body into `(event, data)` pairs.
fn sse_events(body: &[u8]) -> Vec<(String, Value)> {
    String::from_utf8_lossy(body)
        .split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(|frame| {
            let mut event = String::new();
            let mut data = Value::Null;
            for line in frame.lines() {
                if let Some(name) = line.strip_prefix("event: ") {
                    event = name.to_string();
                } else if let Some(payload) = line.strip_prefix("data: ") {
                    data = serde_json::from_str(payload).unwrap();
                }
            }
            (event, data)
        })
        .collect()
}

fn sse_body(chunks: &[Value], done: bool) -> String {
    let mut body: String = chunks
        .iter()
        .map(|chunk| format!("data: {}\n\n", chunk))
        .collect();
    if done {
        body.push_str("data: [DONE]\n\n");
    }
    body
}

fn chunk(delta: Value, finish_reason: Option<&str>) -> Value {
    json!({
        "id": "chatcmpl-1",
        "model": "claude-sonnet-4",
        "choices": [{"index": 0, "delta": delta, "finish_reason": finish_reason}]
    })
}

#[tokio::test]
async fn test_non_streaming_tool_round_trip() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("x-initiator", "agent"))
        .and(body_partial_json(json!({"model": "claude-sonnet-4"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-9",
            "model": "claude-sonnet-4",
            "choices": [{
                "index": 0,
                "message": {
                    "role": "assistant",
                    "content": "Here you go",
                    "tool_calls": [{
                        "id": "call:9",
                        "type": "function",
                        "function": {"name": "lookup", "arguments": "{\"q\":\"y\"}"}
                    }]
                },
                "finish_reason": "tool_calls"
            }],
            "usage": {
                "prompt_tokens": 120,
                "completion_tokens": 15,
                "total_tokens": 135,
                "prompt_tokens_details": {"cached_tokens": 100}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = create_test_app(&server, None);
    let response = app
        .oneshot(post_json(
            "/v1/messages",
            &json!({
                "model": "claude-sonnet-4-20250514",
                "max_tokens": 256,
                "messages": [
                    {"role": "user", "content": "find x"},
                    {"role": "assistant", "content": [
                        {"type": "tool_use", "id": "call:7", "name": "lookup", "input": {"q": "x"}}
                    ]},
                    {"role": "user", "content": [
                        {"type": "tool_result", "tool_use_id": "call:7", "content": "found"}
                    ]}
                ]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let received = server.received_requests().await.unwrap();
    let upstream: Value = serde_json::from_slice(&received[0].body).unwrap();
    let messages = upstream["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["tool_calls"][0]["id"], "call_7");
    assert_eq!(
        messages[1]["tool_calls"][0]["function"]["arguments"],
        "{\"q\":\"x\"}"
    );
    assert_eq!(messages[2]["role"], "tool");
    assert_eq!(messages[2]["tool_call_id"], "call_7");
    assert_eq!(messages[2]["content"], "found");

    let body = body_json(response).await;
    assert_eq!(
        body,
        json!({
            "id": "chatcmpl-9",
            "type": "message",
            "role": "assistant",
            "model": "claude-sonnet-4",
            "content": [
                {"type": "text", "text": "Here you go"},
                {"type": "tool_use", "id": "call_9", "name": "lookup", "input": {"q": "y"}}
            ],
            "stop_reason": "tool_use",
            "stop_sequence": null,
            "usage": {"input_tokens": 20, "output_tokens": 15, "cache_read_input_tokens": 100}
        })
    );
}

#[tokio::test]
async fn test_streaming_text_and_tool_call() {
    let server = MockServer::start().await;

    let upstream_body = sse_body(
        &[
            chunk(json!({"role": "assistant", "content": "Hello"}), None),
            chunk(
                json!({"tool_calls": [{"index": 0, "id": "call:1", "type": "function",
                    "function": {"name": "lookup", "arguments": ""}}]}),
                None,
            ),
            chunk(
                json!({"tool_calls": [{"index": 0, "function": {"arguments": "{\"q\":"}}]}),
                None,
            ),
            chunk(
                json!({"tool_calls": [{"index": 0, "function": {"arguments": "1}"}}]}),
                None,
            ),
            {
                let mut last = chunk(json!({}), Some("tool_calls"));
                last["usage"] = json!({"prompt_tokens": 30, "completion_tokens": 4, "total_tokens": 34});
                last
            },
        ],
        true,
    );

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("x-initiator", "user"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(upstream_body, "text/event-stream"))
        .expect(1)
        .mount(&server)
        .await;

    let app = create_test_app(&server, None);
    let response = app
        .oneshot(post_json(
            "/v1/messages",
            &json!({
                "model": "claude-sonnet-4",
                "max_tokens": 256,
                "stream": true,
                "messages": [{"role": "user", "content": "look it up"}]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "text/event-stream"
    );

    let events = sse_events(&body_bytes(response).await);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "content_block_start",
            "content_block_delta",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );

    assert_eq!(events[0].1["message"]["usage"]["output_tokens"], 0);
    assert_eq!(
        events[4].1,
        json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": {"type": "tool_use", "id": "call_1", "name": "lookup", "input": {}}
        })
    );
    assert_eq!(events[5].1["delta"]["partial_json"], "{\"q\":");
    assert_eq!(events[6].1["delta"]["partial_json"], "1}");
    assert_eq!(
        events[8].1,
        json!({
            "type": "message_delta",
            "delta": {"stop_reason": "tool_use", "stop_sequence": null},
            "usage": {"input_tokens": 30, "output_tokens": 4}
        })
    );
}

#[tokio::test]
async fn test_streaming_truncated_upstream_emits_error_event() {
    let server = MockServer::start().await;

    let upstream_body = sse_body(&[chunk(json!({"content": "partial"}), None)], false);
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(upstream_body, "text/event-stream"))
        .mount(&server)
        .await;

    let app = create_test_app(&server, None);
    let response = app
        .oneshot(post_json(
            "/v1/messages",
            &json!({
                "model": "claude-sonnet-4",
                "max_tokens": 64,
                "stream": true,
                "messages": [{"role": "user", "content": "hi"}]
            }),
        ))
        .await
        .unwrap();

    let events = sse_events(&body_bytes(response).await);
    let (name, data) = events.last().unwrap();
    assert_eq!(name, "error");
    assert_eq!(
        data,
        &json!({
            "type": "error",
            "error": {"type": "api_error", "message": "An unexpected error occurred during streaming."}
        })
    );
    assert_eq!(
        events.iter().filter(|(name, _)| name == "error").count(),
        1
    );
}

#[tokio::test]
async fn test_streaming_unterminated_final_frame_is_flushed() {
    let server = MockServer::start().await;

    let mut upstream_body = sse_body(&[chunk(json!({"content": "done soon"}), None)], false);
    upstream_body.push_str(&format!("data: {}", chunk(json!({}), Some("stop"))));
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(upstream_body, "text/event-stream"))
        .mount(&server)
        .await;

    let app = create_test_app(&server, None);
    let response = app
        .oneshot(post_json(
            "/v1/messages",
            &json!({
                "model": "claude-sonnet-4",
                "max_tokens": 64,
                "stream": true,
                "messages": [{"role": "user", "content": "hi"}]
            }),
        ))
        .await
        .unwrap();

    let events = sse_events(&body_bytes(response).await);
    let names: Vec<&str> = events.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "message_start",
            "content_block_start",
            "content_block_delta",
            "content_block_stop",
            "message_delta",
            "message_stop",
        ]
    );
    assert_eq!(events[4].1["delta"]["stop_reason"], "end_turn");
}

#[tokio::test]
async fn test_upstream_rate_limit_is_returned() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("retry-after", "1")
                .set_body_json(json!({"error": {"message": "quota exceeded"}})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let app = create_test_app(&server, None);
    let response = app
        .oneshot(post_json(
            "/v1/messages",
            &json!({
                "model": "claude-sonnet-4",
                "max_tokens": 64,
                "messages": [{"role": "user", "content": "hi"}]
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        body_json(response).await,
        json!({
            "type": "error",
            "error": {"type": "rate_limit_error", "message": "quota exceeded"}
        })
    );
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let server = MockServer::start().await;
    let app = create_test_app(&server, None);

    let response = app
        .oneshot(post_json("/v1/messages", &json!({"model": "claude-sonnet-4"})))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["type"], "invalid_request_error");
    assert!(server.received_requests().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_api_key_required_when_configured() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c",
            "model": "claude-sonnet-4",
            "choices": [{"index": 0, "message": {"content": "ok"}, "finish_reason": "stop"}]
        })))
        .mount(&server)
        .await;

    let app = create_test_app(&server, Some("secret"));
    let request_body = json!({
        "model": "claude-sonnet-4",
        "max_tokens": 16,
        "messages": [{"role": "user", "content": "hi"}]
    });

    let response = app
        .clone()
        .oneshot(post_json("/v1/messages", &request_body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(response).await["error"]["type"], "authentication_error");

    let mut authorized = post_json("/v1/messages", &request_body);
    authorized
        .headers_mut()
        .insert("x-api-key", "secret".parse().unwrap());
    let response = app.clone().oneshot(authorized).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let health = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(health.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_initiator_override_header() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("x-initiator", "agent"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "c",
            "model": "claude-sonnet-4",
            "choices": [{"index": 0, "message": {"content": "ok"}, "finish_reason": "stop"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let app = create_test_app(&server, None);
    let mut request = post_json(
        "/v1/messages",
        &json!({
            "model": "claude-sonnet-4",
            "max_tokens": 16,
            "messages": [{"role": "user", "content": "hi"}]
        }),
    );
    request
        .headers_mut()
        .insert("x-initiator", "AGENT".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_utility_endpoints() {
    let server = MockServer::start().await;
    let app = create_test_app(&server, Some("secret"));

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "ok");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(body_bytes(response).await).unwrap();
    assert!(text.contains("gateway_upstream_throttled_total"));

    let mut telemetry = post_json("/api/event_logging/batch", &json!({"events": []}));
    telemetry
        .headers_mut()
        .insert("authorization", "Bearer secret".parse().unwrap());
    let response = app.oneshot(telemetry).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({"status": "ok"}));
}
