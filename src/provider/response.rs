//! Synchronous response parsing and usage extraction

use serde_json::Value;

use super::ProviderAdapter;
use crate::error::{GatewayError, GatewayResult};
use crate::types::TokenUsage;

/// Usage counters as reported by a provider; any field may be absent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartialUsage {
    pub prompt_tokens: Option<u64>,
    pub completion_tokens: Option<u64>,
    pub total_tokens: Option<u64>,
}

impl PartialUsage {
    /// Overlay reported fields on a running total
    pub fn apply_to(&self, usage: &mut TokenUsage) {
        if let Some(prompt) = self.prompt_tokens {
            usage.prompt_tokens = prompt;
        }
        if let Some(completion) = self.completion_tokens {
            usage.completion_tokens = completion;
        }
        if let Some(total) = self.total_tokens {
            usage.total_tokens = total;
        }
    }
}

/// Read `usage`, flat or nested under `usage.properties`
///
/// Returns `None` when the payload carries no usage object at all.
pub fn extract_usage(body: &Value) -> Option<PartialUsage> {
    let usage = body.get("usage")?;
    let fields = match usage.get("properties") {
        Some(nested) if nested.is_object() => nested,
        _ => usage,
    };
    if !fields.is_object() {
        return None;
    }

    let read = |name: &str| fields.get(name).and_then(Value::as_u64);
    Some(PartialUsage {
        prompt_tokens: read("prompt_tokens"),
        completion_tokens: read("completion_tokens"),
        total_tokens: read("total_tokens"),
    })
}

/// Message a provider put in an error payload, if any
pub fn error_message(body: &Value) -> Option<String> {
    if let Some(error) = body.get("error") {
        if let Some(message) = error.get("message").and_then(Value::as_str) {
            return Some(message.to_string());
        }
        if let Some(message) = error.as_str() {
            return Some(message.to_string());
        }
    }
    body.get("message").and_then(Value::as_str).map(str::to_string)
}

/// Decode a synchronous response body and extract its content
///
/// Returns the decoded JSON alongside the content so callers can read usage.
pub fn parse_completion(
    adapter: &dyn ProviderAdapter,
    raw: &str,
) -> GatewayResult<(String, Value)> {
    let body: Value = serde_json::from_str(raw)
        .map_err(|e| GatewayError::protocol(format!("response is not JSON: {}", e), raw))?;

    match adapter.parse_response(&body).filter(|c| !c.is_empty()) {
        Some(content) => Ok((content, body)),
        None => match error_message(&body) {
            Some(message) => Err(GatewayError::Upstream(message)),
            None => Err(GatewayError::protocol("response has no content", raw)),
        },
    }
}
