//! Streaming dispatch against mocked event-stream providers

use std::time::Duration;

use conduit::store::LedgerScope;
use conduit::types::{ProviderVariant, Role, StreamSummary, TokenUsage};
use conduit::{Dispatched, GatewayError, RelayState, StreamEvent};
use futures::StreamExt;
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{chat_request, openai_sse, session_request, with_param, TestContext};

fn sse_response(body: String) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("content-type", "text/event-stream")
        .set_body_string(body)
}

#[tokio::test]
async fn test_openai_stream_end_to_end() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;
    Mock::given(method("POST"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse_response(openai_sse(&["Hel", "lo", " world"])))
        .expect(1)
        .mount(&ctx.server)
        .await;

    let handle = ctx
        .gateway()
        .dispatch_stream(session_request("Hi"))
        .await
        .unwrap();
    let events: Vec<StreamEvent> = handle.collect().await;

    let deltas: Vec<&str> = events
        .iter()
        .filter_map(|e| match e {
            StreamEvent::ContentDelta(d) => Some(d.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(deltas, vec!["Hel", "lo", " world"]);

    // Done is the last event and is only sent once the turn is durable
    let Some(StreamEvent::Done(summary)) = events.last() else {
        panic!("stream did not finish with Done: {:?}", events);
    };
    let turns = ctx.session_turns();
    assert_eq!(turns.len(), 2);
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].content, "Hello world");
    assert_eq!(summary.message_id, turns[1].id);
    assert_eq!(
        ctx.store.ledger_totals(LedgerScope::System),
        summary.usage
    );
}

#[tokio::test]
async fn test_reported_stream_usage_wins() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;
    let body = format!(
        "data: {}\n\ndata: {}\n\ndata: [DONE]\n\n",
        json!({"choices": [{"delta": {"content": "Hi"}}]}),
        json!({
            "choices": [],
            "usage": {"prompt_tokens": 9, "completion_tokens": 1, "total_tokens": 10}
        })
    );
    Mock::given(method("POST"))
        .respond_with(sse_response(body))
        .mount(&ctx.server)
        .await;

    let handle = ctx.gateway().dispatch_stream(chat_request("Hey")).await.unwrap();
    let events: Vec<StreamEvent> = handle.collect().await;

    assert_eq!(
        events,
        vec![
            StreamEvent::ContentDelta("Hi".to_string()),
            StreamEvent::UsageUpdate(TokenUsage::new(9, 1)),
            StreamEvent::Done(StreamSummary {
                message_id: None,
                usage: TokenUsage::new(9, 1),
            }),
        ]
    );
}

#[tokio::test]
async fn test_anthropic_stream_without_done_marker() {
    let ctx = TestContext::with_model(ProviderVariant::Anthropic, "claude-2", "", 256).await;
    let body = format!(
        "data: {}\n\ndata: {}\n\n",
        json!({"completion": " Hello"}),
        json!({"completion": " there"})
    );
    Mock::given(method("POST"))
        .and(header("x-api-key", "sk-test-key"))
        .respond_with(sse_response(body))
        .mount(&ctx.server)
        .await;

    let handle = ctx.gateway().dispatch_stream(chat_request("Hi")).await.unwrap();
    let completion = handle.result().await.unwrap();

    assert_eq!(completion.content, " Hello there");
    assert!(completion.completion_tokens > 0);
}

#[tokio::test]
async fn test_stream_rejected_by_provider() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "error": {"message": "Rate limit reached"}
        })))
        .mount(&ctx.server)
        .await;

    let handle = ctx
        .gateway()
        .dispatch_stream(session_request("Hi"))
        .await
        .unwrap();
    let mut state = handle.state_changes();
    let events: Vec<StreamEvent> = handle.collect().await;

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StreamEvent::Error(m) if m.contains("Rate limit reached")));
    state.wait_for(RelayState::is_terminal).await.unwrap();
    assert_eq!(*state.borrow(), RelayState::Failed);

    // Only the user turn was recorded
    assert_eq!(ctx.session_turns().len(), 1);
    assert!(ctx.store.ledger_totals(LedgerScope::System).is_empty());
}

#[tokio::test]
async fn test_error_payload_inside_stream_fails() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;
    let body = format!(
        "data: {}\n\ndata: [DONE]\n\n",
        json!({"error": {"message": "quota exceeded"}})
    );
    Mock::given(method("POST"))
        .respond_with(sse_response(body))
        .mount(&ctx.server)
        .await;

    let handle = ctx
        .gateway()
        .dispatch_stream(session_request("Hi"))
        .await
        .unwrap();
    let mut state = handle.state_changes();
    let events: Vec<StreamEvent> = handle.collect().await;

    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StreamEvent::Error(m) if m.contains("quota exceeded")));
    state.wait_for(RelayState::is_terminal).await.unwrap();
    assert_eq!(*state.borrow(), RelayState::Failed);

    // No assistant turn and nothing billed for an empty exchange
    let turns = ctx.session_turns();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].role, Role::User);
    assert!(ctx.store.ledger_totals(LedgerScope::System).is_empty());
}

#[tokio::test]
async fn test_cancel_while_connecting_persists_nothing() {
    let ctx = TestContext::new(ProviderVariant::Openai, "gpt-4").await;
    Mock::given(method("POST"))
        .respond_with(sse_response(openai_sse(&["late"])).set_delay(Duration::from_secs(2)))
        .mount(&ctx.server)
        .await;

    let handle = ctx
        .gateway()
        .dispatch_stream(session_request("Hi"))
        .await
        .unwrap();
    let mut state = handle.state_changes();

    handle.cancel();
    state.wait_for(RelayState::is_terminal).await.unwrap();
    assert_eq!(*state.borrow(), RelayState::Cancelled);

    assert!(matches!(handle.result().await, Err(GatewayError::Stream(_))));
    let turns = ctx.session_turns();
    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].role, Role::User);
    assert!(ctx.store.ledger_totals(LedgerScope::System).is_empty());
}

#[tokio::test]
async fn test_send_streams_when_model_defaults_to_stream() {
    let ctx = TestContext::with_model(
        ProviderVariant::Openai,
        "gpt-4",
        r#"{"stream":true}"#,
        0,
    )
    .await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(sse_response(openai_sse(&["streamed"])))
        .mount(&ctx.server)
        .await;

    match ctx.gateway().send(chat_request("Hi")).await.unwrap() {
        Dispatched::Stream(handle) => {
            assert_eq!(handle.result().await.unwrap().content, "streamed");
        }
        Dispatched::Completion(_) => panic!("expected a stream"),
    }
}

#[tokio::test]
async fn test_send_request_override_disables_stream() {
    let ctx = TestContext::with_model(
        ProviderVariant::Openai,
        "gpt-4",
        r#"{"stream":true}"#,
        0,
    )
    .await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(crate::common::openai_completion("sync", None)),
        )
        .mount(&ctx.server)
        .await;

    let request = with_param(chat_request("Hi"), "stream", json!(false));
    match ctx.gateway().send(request).await.unwrap() {
        Dispatched::Completion(completion) => assert_eq!(completion.content, "sync"),
        Dispatched::Stream(_) => panic!("expected a completion"),
    }
}
