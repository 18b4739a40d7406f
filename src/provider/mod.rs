//! Provider adapters
//!
//! Each supported vendor family implements [`ProviderAdapter`]: it translates
//! the unified conversation into the vendor's wire body, names the
//! authentication header, and extracts content from synchronous responses and
//! stream chunks. Adapters are looked up by [`ProviderVariant`] in a
//! [`ProviderRegistry`]; variants without an adapter are rejected instead of
//! falling through to some default format.

pub mod anthropic;
pub mod baidu;
pub mod gemini;
pub mod headers;
pub mod openai;
pub mod response;

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use crate::error::{GatewayError, GatewayResult};
use crate::types::{ConversationTurn, ModelDescriptor, ProviderVariant};

pub use anthropic::AnthropicAdapter;
pub use baidu::BaiduAdapter;
pub use gemini::GeminiAdapter;
pub use openai::OpenAIAdapter;

/// Errors that can occur while building a provider request body
#[derive(Debug, Error)]
pub enum TranslationError {
    /// The model's default parameter bag is not a JSON object
    #[error("Invalid model parameters: {0}")]
    InvalidParameters(String),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Everything a translator needs to build one outbound body
#[derive(Debug)]
pub struct TranslationInput<'a> {
    pub model: &'a ModelDescriptor,
    /// Trimmed chronological history, without the new user turn
    pub history: &'a [ConversationTurn],
    /// The new user message (possibly search-augmented)
    pub content: &'a str,
    /// Model defaults overlaid by request overrides
    pub params: &'a Map<String, Value>,
}

/// Strategy set for one provider family
pub trait ProviderAdapter: Send + Sync {
    /// Provider family name for logging and metrics
    fn name(&self) -> &'static str;

    /// Build the provider-specific JSON body
    fn translate_request(&self, input: &TranslationInput<'_>) -> Result<Value, TranslationError>;

    /// Authentication header name and value for a credential
    fn auth_header(&self, key: &str) -> (&'static str, String);

    /// Content of a synchronous response, if it has the expected shape
    fn parse_response(&self, body: &Value) -> Option<String>;

    /// Content fragment of one stream chunk, if any
    fn extract_delta(&self, chunk: &Value) -> Option<String>;
}

/// Registry mapping provider variants to adapters
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderVariant, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in adapter
    pub fn with_defaults() -> Self {
        let openai: Arc<dyn ProviderAdapter> = Arc::new(OpenAIAdapter::new());

        let mut registry = Self::new();
        registry.register(ProviderVariant::Openai, openai.clone());
        registry.register(ProviderVariant::OpenaiCompatible, openai);
        registry.register(ProviderVariant::Anthropic, Arc::new(AnthropicAdapter::new()));
        registry.register(ProviderVariant::GoogleGemini, Arc::new(GeminiAdapter::new()));
        registry.register(ProviderVariant::Baidu, Arc::new(BaiduAdapter::new()));
        registry
    }

    /// Register (or replace) the adapter for a variant
    pub fn register(&mut self, variant: ProviderVariant, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(variant, adapter);
    }

    /// Look up the adapter for a variant
    pub fn get(&self, variant: ProviderVariant) -> GatewayResult<Arc<dyn ProviderAdapter>> {
        self.adapters
            .get(&variant)
            .cloned()
            .ok_or_else(|| GatewayError::UnsupportedProvider(variant.to_string()))
    }
}

/// Overlay request overrides on the model's default parameters
///
/// Overrides win on key collision.
pub fn merge_parameters(
    model: &ModelDescriptor,
    overrides: &Map<String, Value>,
) -> Result<Map<String, Value>, TranslationError> {
    let mut merged = model
        .default_parameters()
        .map_err(|e| TranslationError::InvalidParameters(e.to_string()))?;

    for (key, value) in overrides {
        merged.insert(key.clone(), value.clone());
    }

    Ok(merged)
}

/// Copy every parameter into the top level of a body object
pub(crate) fn flatten_params(body: &mut Map<String, Value>, params: &Map<String, Value>) {
    for (key, value) in params {
        body.insert(key.clone(), value.clone());
    }
}

/// `choices[0].message.content`, shared by several vendors
pub(crate) fn first_message_content(body: &Value) -> Option<String> {
    body.pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .map(str::to_string)
}
