//! Baidu adapter

use serde_json::{json, Map, Value};

use super::{
    first_message_content, flatten_params, ProviderAdapter, TranslationError, TranslationInput,
};

#[derive(Debug, Clone, Default)]
pub struct BaiduAdapter;

impl BaiduAdapter {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderAdapter for BaiduAdapter {
    fn name(&self) -> &'static str {
        "baidu"
    }

    fn translate_request(&self, input: &TranslationInput<'_>) -> Result<Value, TranslationError> {
        let mut body = Map::new();
        body.insert(
            "messages".to_string(),
            json!([{"role": "user", "content": input.content}]),
        );
        flatten_params(&mut body, input.params);

        Ok(Value::Object(body))
    }

    fn auth_header(&self, key: &str) -> (&'static str, String) {
        ("X-Bce-Authorization", key.to_string())
    }

    fn parse_response(&self, body: &Value) -> Option<String> {
        first_message_content(body)
    }

    fn extract_delta(&self, chunk: &Value) -> Option<String> {
        first_message_content(chunk)
    }
}
