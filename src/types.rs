//! Core domain types
//!
//! Descriptors loaded from the stores, conversation turns, the unified chat
//! request and the normalized completion returned to callers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Request parameters interpreted by the gateway itself
pub mod params {
    /// Selects the streaming path
    pub const STREAM: &str = "stream";
    /// Enables search augmentation of the user content
    pub const ENABLE_INTERNET: &str = "enable_internet";
    /// Threads conversation history into the outbound request
    pub const USE_CONTEXT: &str = "use_context";
    /// Session id passed through the parameter bag by older clients
    pub const SESSION_ID: &str = "session_id";

    /// Keys that are never forwarded to a provider
    pub const GATEWAY_ONLY: &[&str] = &[ENABLE_INTERNET, USE_CONTEXT, SESSION_ID];
}

/// Provider family, which selects translation, auth and parsing strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderVariant {
    #[serde(rename = "OPENAI")]
    Openai,
    #[serde(rename = "OPENAI_COMPATIBLE")]
    OpenaiCompatible,
    #[serde(rename = "ANTHROPIC")]
    Anthropic,
    #[serde(rename = "GOOGLE_GEMINI", alias = "GoogleGemini")]
    GoogleGemini,
    #[serde(rename = "BAIDU")]
    Baidu,
    #[serde(rename = "CUSTOM")]
    Custom,
}

impl ProviderVariant {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderVariant::Openai => "OPENAI",
            ProviderVariant::OpenaiCompatible => "OPENAI_COMPATIBLE",
            ProviderVariant::Anthropic => "ANTHROPIC",
            ProviderVariant::GoogleGemini => "GOOGLE_GEMINI",
            ProviderVariant::Baidu => "BAIDU",
            ProviderVariant::Custom => "CUSTOM",
        }
    }

    /// OpenAI and OpenAI-compatible APIs share wire format and tokenizer
    pub fn is_openai_family(&self) -> bool {
        matches!(self, ProviderVariant::Openai | ProviderVariant::OpenaiCompatible)
    }
}

impl fmt::Display for ProviderVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OPENAI" => Ok(ProviderVariant::Openai),
            "OPENAI_COMPATIBLE" => Ok(ProviderVariant::OpenaiCompatible),
            "ANTHROPIC" => Ok(ProviderVariant::Anthropic),
            "GOOGLE_GEMINI" | "GoogleGemini" => Ok(ProviderVariant::GoogleGemini),
            "BAIDU" => Ok(ProviderVariant::Baidu),
            "CUSTOM" => Ok(ProviderVariant::Custom),
            other => Err(format!("unknown provider type: {}", other)),
        }
    }
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_interval() -> u64 {
    1
}

fn default_timeout() -> u64 {
    30
}

/// A configured chat-completion vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: i64,
    pub name: String,
    #[serde(rename = "type")]
    pub variant: ProviderVariant,
    pub base_url: String,
    #[serde(default)]
    pub auth_type: String,
    /// JSON object of extra headers sent with every request
    #[serde(default)]
    pub headers: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,
    #[serde(default = "default_retry_interval")]
    pub retry_interval_secs: u64,
}

/// A backend model plus its default parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: i64,
    pub name: String,
    /// Identifier sent to the vendor, e.g. `gpt-4`
    pub model_id: String,
    /// JSON object of default request parameters
    #[serde(default)]
    pub parameters: String,
    #[serde(default)]
    pub max_tokens: i64,
}

impl ModelDescriptor {
    /// Decode the default parameter bag; an empty string is an empty bag
    pub fn default_parameters(&self) -> Result<Map<String, Value>, serde_json::Error> {
        if self.parameters.trim().is_empty() {
            return Ok(Map::new());
        }
        serde_json::from_str(&self.parameters)
    }
}

/// An API credential bound to a provider
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyDescriptor {
    pub id: i64,
    #[serde(default)]
    pub provider_id: i64,
    pub value: String,
}

impl fmt::Debug for KeyDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDescriptor")
            .field("id", &self.id)
            .field("provider_id", &self.provider_id)
            .field("value", &"***")
            .finish()
    }
}

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Prompt, completion and total token counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Usage with `total = prompt + completion`
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Fill in the total when no authoritative value was reported
    pub fn with_derived_total(mut self) -> Self {
        if self.total_tokens == 0 {
            self.total_tokens = self.prompt_tokens + self.completion_tokens;
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.prompt_tokens == 0 && self.completion_tokens == 0 && self.total_tokens == 0
    }
}

/// Amount added to every ledger aggregate after an exchange
pub type UsageDelta = TokenUsage;

/// One persisted conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    /// Assigned by the conversation store on append
    #[serde(default)]
    pub id: Option<i64>,
    pub session_id: i64,
    pub user_id: i64,
    pub provider_id: i64,
    pub model_id: i64,
    pub key_id: i64,
    pub role: Role,
    pub content: String,
    #[serde(default)]
    pub usage: TokenUsage,
    pub created_at: DateTime<Utc>,
}

/// Unified chat request accepted by the gateway
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    #[serde(default)]
    pub session_id: Option<i64>,
    pub provider_id: i64,
    pub model_id: i64,
    pub key_id: i64,
    pub user_id: i64,
    pub content: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl ChatRequest {
    /// Read a boolean control parameter; non-boolean values count as unset
    pub fn flag(&self, name: &str) -> Option<bool> {
        self.parameters.get(name).and_then(Value::as_bool)
    }

    pub fn use_context(&self) -> bool {
        self.flag(params::USE_CONTEXT).unwrap_or(false)
    }

    pub fn enable_internet(&self) -> bool {
        self.flag(params::ENABLE_INTERNET).unwrap_or(false)
    }

    /// Session id from the request, or from the parameter bag
    pub fn resolve_session_id(&self) -> Option<i64> {
        self.session_id.or_else(|| {
            self.parameters
                .get(params::SESSION_ID)
                .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        })
    }

    /// Parameters that should reach the provider
    pub fn provider_overrides(&self) -> Map<String, Value> {
        self.parameters
            .iter()
            .filter(|(k, _)| !params::GATEWAY_ONLY.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Normalized result of one exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Completion {
    pub content: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_message_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assistant_message_id: Option<i64>,
}

impl Completion {
    pub fn new(content: String, usage: TokenUsage) -> Self {
        Self {
            content,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
            user_message_id: None,
            assistant_message_id: None,
        }
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            total_tokens: self.total_tokens,
        }
    }
}

/// Final accounting attached to a successful stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamSummary {
    pub message_id: Option<i64>,
    pub usage: TokenUsage,
}

/// Events published by a stream relay, in order
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A normalized content fragment
    ContentDelta(String),
    /// The provider reported usage in a chunk
    UsageUpdate(TokenUsage),
    /// Message and accounting are durable
    Done(StreamSummary),
    /// The stream failed; no `Done` follows
    Error(String),
}
