//! Anthropic text-completion adapter
//!
//! The legacy completion API takes one flat prompt in which every turn is
//! introduced by a `Human:` or `Assistant:` marker.

use serde_json::{Map, Value};

use super::{flatten_params, ProviderAdapter, TranslationError, TranslationInput};
use crate::types::Role;

const HUMAN_PREFIX: &str = "\n\nHuman: ";
const ASSISTANT_PREFIX: &str = "\n\nAssistant: ";

/// Anthropic completion API adapter
#[derive(Debug, Clone, Default)]
pub struct AnthropicAdapter;

impl AnthropicAdapter {
    /// Create a new Anthropic adapter
    pub fn new() -> Self {
        Self
    }
}

/// Render history plus the new user turn as a marker-delimited prompt
pub fn build_prompt(input: &TranslationInput<'_>) -> String {
    let mut prompt = String::new();
    for turn in input.history {
        prompt.push_str(match turn.role {
            Role::User => HUMAN_PREFIX,
            Role::Assistant => ASSISTANT_PREFIX,
        });
        prompt.push_str(&turn.content);
    }
    prompt.push_str(HUMAN_PREFIX);
    prompt.push_str(input.content);
    prompt
}

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn translate_request(&self, input: &TranslationInput<'_>) -> Result<Value, TranslationError> {
        let mut body = Map::new();
        body.insert("model".to_string(), Value::String(input.model.model_id.clone()));
        body.insert("prompt".to_string(), Value::String(build_prompt(input)));
        body.insert(
            "max_tokens_to_sample".to_string(),
            Value::from(input.model.max_tokens),
        );
        flatten_params(&mut body, input.params);

        Ok(Value::Object(body))
    }

    fn auth_header(&self, key: &str) -> (&'static str, String) {
        ("x-api-key", key.to_string())
    }

    fn parse_response(&self, body: &Value) -> Option<String> {
        body.get("completion").and_then(Value::as_str).map(str::to_string)
    }

    fn extract_delta(&self, chunk: &Value) -> Option<String> {
        self.parse_response(chunk)
    }
}
