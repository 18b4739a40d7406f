//! Chat endpoint
//!
//! Accepts a unified chat request and answers with a completion, or with an
//! event stream when the request resolves to streaming.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use futures::StreamExt;
use serde::Serialize;
use tracing::info;

use crate::{
    error::{GatewayError, GatewayResult},
    gateway::Dispatched,
    routes::metrics::{record_request, record_tokens},
    streaming::StreamHandle,
    types::{ChatRequest, StreamEvent, TokenUsage},
    AppState,
};

/// Event sent to clients of the streaming endpoint
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientEvent {
    Start,
    Content {
        content: String,
    },
    Usage {
        usage: TokenUsage,
    },
    End {
        #[serde(rename = "messageId", skip_serializing_if = "Option::is_none")]
        message_id: Option<i64>,
        usage: TokenUsage,
    },
    Error {
        message: String,
    },
}

impl From<StreamEvent> for ClientEvent {
    fn from(event: StreamEvent) -> Self {
        match event {
            StreamEvent::ContentDelta(content) => ClientEvent::Content { content },
            StreamEvent::UsageUpdate(usage) => ClientEvent::Usage { usage },
            StreamEvent::Done(summary) => ClientEvent::End {
                message_id: summary.message_id,
                usage: summary.usage,
            },
            StreamEvent::Error(message) => ClientEvent::Error { message },
        }
    }
}

/// Encode one event as an SSE frame
pub fn sse_frame(event: &ClientEvent) -> Bytes {
    let json = serde_json::to_string(event).unwrap_or_else(|_| "{}".to_string());
    Bytes::from(format!("data: {}\n\n", json))
}

/// Chat endpoint
///
/// POST /v1/chat
pub async fn chat(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ChatRequest>,
) -> Result<Response, GatewayError> {
    let start_time = Instant::now();
    let provider = request.provider_id.to_string();
    let model = request.model_id.to_string();

    let dispatched = match state.gateway.send(request).await {
        Ok(dispatched) => dispatched,
        Err(e) => {
            record_request("error", &provider, &model, start_time.elapsed().as_secs_f64());
            return Err(e);
        }
    };

    match dispatched {
        Dispatched::Completion(completion) => {
            let duration = start_time.elapsed().as_secs_f64();
            record_request("success", &provider, &model, duration);
            record_usage(&completion.usage(), &model);

            info!(
                provider = %provider,
                model = %model,
                duration_ms = %format!("{:.2}", duration * 1000.0),
                "Chat request completed"
            );

            Ok((StatusCode::OK, Json(completion)).into_response())
        }
        Dispatched::Stream(handle) => stream_response(handle, provider, model, start_time),
    }
}

fn record_usage(usage: &TokenUsage, model: &str) {
    record_tokens("prompt", usage.prompt_tokens, model);
    record_tokens("completion", usage.completion_tokens, model);
}

/// Relay gateway events as SSE; dropping the body cancels the relay
fn stream_response(
    mut handle: StreamHandle,
    provider: String,
    model: String,
    start_time: Instant,
) -> GatewayResult<Response> {
    let events = async_stream::stream! {
        yield Ok::<_, Infallible>(sse_frame(&ClientEvent::Start));

        while let Some(event) = handle.next().await {
            match &event {
                StreamEvent::Done(summary) => {
                    let duration = start_time.elapsed().as_secs_f64();
                    record_request("success", &provider, &model, duration);
                    record_usage(&summary.usage, &model);
                }
                StreamEvent::Error(_) => {
                    record_request("error", &provider, &model, start_time.elapsed().as_secs_f64());
                }
                _ => {}
            }
            yield Ok(sse_frame(&ClientEvent::from(event)));
        }
    };

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .header("X-Accel-Buffering", "no")
        .body(Body::from_stream(events))
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("Failed to build response: {}", e)))
}
