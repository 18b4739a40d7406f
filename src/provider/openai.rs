//! OpenAI and OpenAI-compatible adapter
//!
//! Chat Completions wire format: a `messages` array of `{role, content}`
//! objects with every merged parameter at the top level. `deepseek-reasoner`
//! rejects sampling parameters, so it always gets a fixed body.

use serde_json::{json, Map, Value};

use super::{
    first_message_content, flatten_params, ProviderAdapter, TranslationError, TranslationInput,
};

/// Model id that only accepts the fixed reasoner body
pub const DEEPSEEK_REASONER: &str = "deepseek-reasoner";

/// Completion budget sent with every reasoner request
pub const REASONER_MAX_TOKENS: u64 = 4096;

/// OpenAI Chat Completions adapter
#[derive(Debug, Clone, Default)]
pub struct OpenAIAdapter;

impl OpenAIAdapter {
    /// Create a new OpenAI adapter
    pub fn new() -> Self {
        Self
    }
}

/// History plus the new user turn as chat messages
fn build_messages(input: &TranslationInput<'_>) -> Vec<Value> {
    input
        .history
        .iter()
        .map(|turn| json!({"role": turn.role.as_str(), "content": turn.content}))
        .chain(std::iter::once(json!({"role": "user", "content": input.content})))
        .collect()
}

impl ProviderAdapter for OpenAIAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn translate_request(&self, input: &TranslationInput<'_>) -> Result<Value, TranslationError> {
        let messages = build_messages(input);

        if input.model.model_id == DEEPSEEK_REASONER {
            return Ok(json!({
                "model": DEEPSEEK_REASONER,
                "messages": messages,
                "max_tokens": REASONER_MAX_TOKENS,
            }));
        }

        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(input.model.model_id.clone()));
        body.insert("messages".to_string(), Value::Array(messages));
        flatten_params(&mut body, input.params);

        Ok(Value::Object(body))
    }

    fn auth_header(&self, key: &str) -> (&'static str, String) {
        ("Authorization", format!("Bearer {}", key))
    }

    fn parse_response(&self, body: &Value) -> Option<String> {
        let choice = body.pointer("/choices/0")?;

        // Reasoning models return their chain of thought next to the answer
        if let Some(reasoning) = choice
            .pointer("/message/reasoning_content")
            .and_then(Value::as_str)
            .filter(|r| !r.is_empty())
        {
            let answer = choice
                .pointer("/message/content")
                .and_then(Value::as_str)
                .unwrap_or_default();
            return Some(format!("Reasoning:\n{}\n\nAnswer:\n{}", reasoning, answer));
        }

        first_message_content(body)
            .filter(|c| !c.is_empty())
            .or_else(|| choice.get("content").and_then(Value::as_str).map(str::to_string))
    }

    fn extract_delta(&self, chunk: &Value) -> Option<String> {
        chunk
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}
