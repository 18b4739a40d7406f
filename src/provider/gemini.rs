//! Google Gemini adapter
//!
//! Sends only the new user turn; merged parameters travel as `generationConfig`.

use serde_json::{json, Value};

use super::{first_message_content, ProviderAdapter, TranslationError, TranslationInput};

#[derive(Debug, Clone, Default)]
pub struct GeminiAdapter;

impl GeminiAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn translate_request(&self, input: &TranslationInput<'_>) -> Result<Value, TranslationError> {
        Ok(json!({
            "contents": [{
                "role": "user",
                "parts": [{"text": input.content}]
            }],
            "generationConfig": input.params,
        }))
    }

    fn auth_header(&self, key: &str) -> (&'static str, String) {
        ("x-goog-api-key", key.to_string())
    }

    fn parse_response(&self, body: &Value) -> Option<String> {
        first_message_content(body)
    }

    fn extract_delta(&self, chunk: &Value) -> Option<String> {
        first_message_content(chunk)
    }
}
