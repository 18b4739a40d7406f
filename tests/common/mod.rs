//! Common test utilities for Conduit
//!
//! Shared fixtures: an in-memory store seeded with one provider, model and
//! key pointing at a wiremock server, plus helpers for building requests and
//! provider responses.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Utc;
use conduit::store::{InMemoryStore, ProviderStore};
use conduit::types::{
    ChatRequest, ConversationTurn, KeyDescriptor, ModelDescriptor, ProviderDescriptor,
    ProviderVariant, Role, TokenUsage,
};
use conduit::{AppState, Config, Gateway, GatewaySettings, Stores};
use serde_json::{json, Map, Value};
use wiremock::MockServer;

/// Test configuration constants
pub mod constants {
    pub const PROVIDER_ID: i64 = 1;
    pub const MODEL_ID: i64 = 2;
    pub const KEY_ID: i64 = 3;
    pub const USER_ID: i64 = 4;
    pub const SESSION_ID: i64 = 50;
    pub const API_KEY: &str = "sk-test-key";
    pub const CHAT_PATH: &str = "/v1/chat/completions";
}

use constants::*;

/// Mock provider plus a seeded store
pub struct TestContext {
    pub server: MockServer,
    pub store: Arc<InMemoryStore>,
}

impl TestContext {
    /// Seed one provider of `variant` serving `model_id`
    pub async fn new(variant: ProviderVariant, model_id: &str) -> Self {
        Self::with_model(variant, model_id, "", 1024).await
    }

    pub async fn with_model(
        variant: ProviderVariant,
        model_id: &str,
        parameters: &str,
        max_tokens: i64,
    ) -> Self {
        let server = MockServer::start().await;
        let store = Arc::new(InMemoryStore::new());

        store.insert_provider(ProviderDescriptor {
            id: PROVIDER_ID,
            name: "Mock Provider".to_string(),
            variant,
            base_url: format!("{}{}", server.uri(), CHAT_PATH),
            auth_type: "api_key".to_string(),
            headers: String::new(),
            timeout_secs: 30,
            retry_count: 0,
            retry_interval_secs: 0,
        });
        store.insert_model(ModelDescriptor {
            id: MODEL_ID,
            name: model_id.to_string(),
            model_id: model_id.to_string(),
            parameters: parameters.to_string(),
            max_tokens,
        });
        store.insert_key(KeyDescriptor {
            id: KEY_ID,
            provider_id: PROVIDER_ID,
            value: API_KEY.to_string(),
        });

        Self { server, store }
    }

    /// Let the provider retry failed connections
    pub async fn set_retries(&self, retry_count: u32, retry_interval_secs: u64) {
        let mut provider = self
            .store
            .get_provider(PROVIDER_ID)
            .await
            .unwrap()
            .expect("provider is seeded");
        provider.retry_count = retry_count;
        provider.retry_interval_secs = retry_interval_secs;
        self.store.insert_provider(provider);
    }

    pub fn gateway(&self) -> Gateway {
        Gateway::new(
            Stores::from_shared(self.store.clone()),
            reqwest::Client::new(),
            GatewaySettings {
                request_timeout_secs: 5,
                ..GatewaySettings::default()
            },
        )
    }

    pub fn app_state(&self) -> Arc<AppState> {
        Arc::new(AppState::new_for_testing(test_config(), self.store.clone()))
    }

    /// Store a prior turn of the test session
    pub fn seed_turn(&self, role: Role, content: &str) {
        self.store.seed_turn(ConversationTurn {
            id: None,
            session_id: SESSION_ID,
            user_id: USER_ID,
            provider_id: PROVIDER_ID,
            model_id: MODEL_ID,
            key_id: KEY_ID,
            role,
            content: content.to_string(),
            usage: TokenUsage::default(),
            created_at: Utc::now(),
        });
    }

    pub fn session_turns(&self) -> Vec<ConversationTurn> {
        self.store.turns(SESSION_ID, USER_ID)
    }
}

pub fn test_config() -> Config {
    Config {
        host: "127.0.0.1".to_string(),
        port: 0,
        redis_url: "redis://localhost:6379".to_string(),
        key_prefix: "conduit-test".to_string(),
        default_timeout_secs: 5,
        default_context_length: 3,
        stream_buffer: 100,
        log_json: false,
    }
}

/// Request for the seeded provider without a session
pub fn chat_request(content: &str) -> ChatRequest {
    ChatRequest {
        session_id: None,
        provider_id: PROVIDER_ID,
        model_id: MODEL_ID,
        key_id: KEY_ID,
        user_id: USER_ID,
        content: content.to_string(),
        parameters: Map::new(),
    }
}

/// Request bound to the test session
pub fn session_request(content: &str) -> ChatRequest {
    ChatRequest {
        session_id: Some(SESSION_ID),
        ..chat_request(content)
    }
}

pub fn with_param(mut request: ChatRequest, name: &str, value: Value) -> ChatRequest {
    request.parameters.insert(name.to_string(), value);
    request
}

/// OpenAI chat completion response
pub fn openai_completion(content: &str, usage: Option<(u64, u64, u64)>) -> Value {
    let mut body = json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    });
    if let Some((prompt, completion, total)) = usage {
        body["usage"] = json!({
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": total
        });
    }
    body
}

/// OpenAI event stream body for the given fragments, terminated by `[DONE]`
pub fn openai_sse(fragments: &[&str]) -> String {
    let mut body = String::new();
    for fragment in fragments {
        body.push_str(&format!(
            "data: {}\n\n",
            json!({"choices": [{"index": 0, "delta": {"content": fragment}}]})
        ));
    }
    body.push_str("data: [DONE]\n\n");
    body
}
