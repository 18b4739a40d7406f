//! HTTP surface tests
//!
//! - POST /v1/chat - completion or event stream
//! - GET /health, /health/ready, /health/live

use axum::http::StatusCode;
use axum_test::TestServer;
use conduit::routes::create_router;
use conduit::types::ProviderVariant;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use wiremock::matchers::method;
use wiremock::{Mock, ResponseTemplate};

use crate::common::constants::*;
use crate::common::{openai_completion, openai_sse, TestContext};

fn server_for(ctx: &TestContext) -> TestServer {
    TestServer::new(create_router(ctx.app_state())).unwrap()
}

fn chat_body(content: &str, parameters: Value) -> Value {
    json!({
        "sessionId": SESSION_ID,
        "providerId": PROVIDER_ID,
        "modelId": MODEL_ID,
        "keyId": KEY_ID,
        "userId": USER_ID,
        "content": content,
        "parameters": parameters
    })
}

/// Decode every `data:` frame of an SSE body
fn sse_events(body: &str) -> Vec<Value> {
    body.lines()
        .filter_map(|line| line.strip_prefix("data: "))
        .map(|payload| serde_json::from_str(payload).expect("frame should be JSON"))
        .collect()
}

#[tokio::test]
async fn test_chat_returns_completion() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(openai_completion("Hi!", Some((10, 5, 15)))),
        )
        .mount(&ctx.server)
        .await;
    let server = server_for(&ctx);

    let response = server.post("/v1/chat").json(&chat_body("Hello", json!({}))).await;

    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["content"], "Hi!");
    assert_eq!(body["promptTokens"], 10);
    assert_eq!(body["completionTokens"], 5);
    assert_eq!(body["totalTokens"], 15);
    assert!(body["assistantMessageId"].is_i64());
}

#[tokio::test]
async fn test_chat_streams_events() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/event-stream")
                .set_body_string(openai_sse(&["Hel", "lo"])),
        )
        .mount(&ctx.server)
        .await;
    let server = server_for(&ctx);

    let response = server
        .post("/v1/chat")
        .json(&chat_body("Hi", json!({"stream": true})))
        .await;

    response.assert_status_ok();
    assert_eq!(
        response.header("content-type").to_str().unwrap(),
        "text/event-stream"
    );

    let events = sse_events(&response.text());
    let kinds: Vec<&str> = events.iter().filter_map(|e| e["type"].as_str()).collect();
    assert_eq!(kinds, vec!["start", "content", "content", "end"]);
    assert_eq!(events[1]["content"], "Hel");
    assert_eq!(events[2]["content"], "lo");

    let end = &events[3];
    assert!(end["messageId"].is_i64());
    assert!(end["usage"]["total_tokens"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_chat_stream_error_event() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
        .mount(&ctx.server)
        .await;
    let server = server_for(&ctx);

    let response = server
        .post("/v1/chat")
        .json(&chat_body("Hi", json!({"stream": true})))
        .await;

    response.assert_status_ok();
    let events = sse_events(&response.text());
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["type"], "start");
    assert_eq!(events[1]["type"], "error");
    assert!(events[1]["message"]
        .as_str()
        .unwrap()
        .contains("upstream exploded"));
}

#[tokio::test]
async fn test_unknown_model_is_not_found() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;
    let server = server_for(&ctx);

    let mut body = chat_body("Hello", json!({}));
    body["modelId"] = json!(999);
    let response = server.post("/v1/chat").json(&body).await;

    response.assert_status(StatusCode::NOT_FOUND);
    let json: Value = response.json();
    assert_eq!(json["error"]["code"], "CONFIG_ERROR");
}

#[tokio::test]
async fn test_context_without_session_is_bad_request() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;
    let server = server_for(&ctx);

    let mut body = chat_body("Hello", json!({"use_context": true}));
    body.as_object_mut().unwrap().remove("sessionId");
    let response = server.post("/v1/chat").json(&body).await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_health_reflects_store() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;
    let server = server_for(&ctx);

    let response = server.get("/health").await;
    response.assert_status_ok();
    let json: Value = response.json();
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["checks"]["store"]["status"], "healthy");

    ctx.store.set_healthy(false);

    server
        .get("/health")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    server
        .get("/health/ready")
        .await
        .assert_status(StatusCode::SERVICE_UNAVAILABLE);
    server.get("/health/live").await.assert_status_ok();
}
