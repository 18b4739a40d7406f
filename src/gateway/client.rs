//! HTTP execution against provider endpoints

use std::time::Duration;

use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, CACHE_CONTROL};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, instrument, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::provider::response::error_message;
use crate::streaming::ByteStream;

/// Longest slice of an error body carried into an error message
const ERROR_BODY_LIMIT: usize = 512;

/// One outbound provider call
#[derive(Debug, Clone)]
pub struct ProviderCall {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Value,
    pub timeout: Duration,
    /// Additional attempts after a connection failure
    pub retry_count: u32,
    pub retry_interval: Duration,
}

/// Provider HTTP client
#[derive(Clone)]
pub struct ProviderClient {
    client: reqwest::Client,
}

impl ProviderClient {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// POST and return the body of a successful response
    #[instrument(skip(self, call), fields(url = %call.url))]
    pub async fn post(&self, call: &ProviderCall) -> GatewayResult<String> {
        let response = self.send_with_retry(call, call.headers.clone()).await?;
        let status = response.status();
        let text = response.text().await?;

        debug!(status = %status, body_len = text.len(), "Received provider response");

        if !status.is_success() {
            return Err(upstream_error(status, &text));
        }

        Ok(text)
    }

    /// POST with event-stream headers and return the body as a byte stream
    #[instrument(skip(self, call), fields(url = %call.url))]
    pub async fn open_stream(&self, call: ProviderCall) -> GatewayResult<ByteStream> {
        let mut headers = call.headers.clone();
        headers.insert(ACCEPT, HeaderValue::from_static("text/event-stream"));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        let response = self.send_with_retry(&call, headers).await?;
        let status = response.status();

        if !status.is_success() {
            let text = match response.text().await {
                Ok(text) => text,
                Err(e) => {
                    warn!(status = %status, error = %e, "Failed to read provider error body");
                    String::new()
                }
            };
            return Err(upstream_error(status, &text));
        }

        debug!(status = %status, "Provider stream opened");
        Ok(Box::pin(response.bytes_stream().map_err(GatewayError::from)))
    }

    /// Send the request within `call.timeout`, retrying only connection failures
    ///
    /// A request that reached the provider is never sent again, and retries
    /// share one deadline with the first attempt.
    async fn send_with_retry(
        &self,
        call: &ProviderCall,
        headers: HeaderMap,
    ) -> GatewayResult<reqwest::Response> {
        let deadline = Instant::now() + call.timeout;

        let attempts = self.attempt_until(call, headers, deadline);
        match tokio::time::timeout_at(deadline, attempts).await {
            Ok(result) => result,
            Err(_) => {
                error!(
                    timeout_ms = call.timeout.as_millis() as u64,
                    "Provider request timed out"
                );
                Err(GatewayError::Network(format!(
                    "provider request timed out after {:?}",
                    call.timeout
                )))
            }
        }
    }

    async fn attempt_until(
        &self,
        call: &ProviderCall,
        headers: HeaderMap,
        deadline: Instant,
    ) -> GatewayResult<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let result = self
                .client
                .post(&call.url)
                .headers(headers.clone())
                .timeout(deadline.saturating_duration_since(Instant::now()))
                .json(&call.body)
                .send()
                .await;

            match result {
                Ok(response) => return Ok(response),
                Err(e) if e.is_connect() && attempt < call.retry_count => {
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = call.retry_count,
                        error = %e,
                        "Provider connection failed, retrying"
                    );
                    tokio::time::sleep(call.retry_interval).await;
                }
                Err(e) => {
                    let err = GatewayError::from(e);
                    error!(error = %err, attempts = attempt + 1, "Provider request failed");
                    return Err(err);
                }
            }
        }
    }
}

/// Error for a non-2xx response, preferring the provider's own message
fn upstream_error(status: reqwest::StatusCode, body: &str) -> GatewayError {
    if let Some(message) = serde_json::from_str::<Value>(body)
        .ok()
        .as_ref()
        .and_then(error_message)
    {
        return GatewayError::Upstream(message);
    }

    let mut snippet: String = body.chars().take(ERROR_BODY_LIMIT).collect();
    if snippet.len() < body.len() {
        snippet.push_str("...");
    }
    GatewayError::Upstream(format!("HTTP {}: {}", status.as_u16(), snippet))
}
