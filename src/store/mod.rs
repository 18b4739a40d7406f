//! Storage capabilities consumed by the gateway
//!
//! The gateway never talks to a database directly. Descriptors, conversation
//! turns, runtime settings and usage counters are reached through these traits,
//! implemented over Redis in production and in memory for tests.

pub mod redis;

#[cfg(any(test, feature = "test-utils"))]
pub mod in_memory;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayResult;
use crate::types::{
    ConversationTurn, KeyDescriptor, ModelDescriptor, ProviderDescriptor, UsageDelta,
};

pub use self::redis::RedisStore;

#[cfg(any(test, feature = "test-utils"))]
pub use self::in_memory::InMemoryStore;

/// Runtime setting names
pub mod settings {
    /// Number of history turns considered for context
    pub const CONTEXT_LENGTH: &str = "session.context_length";
    /// Provider request timeout in seconds
    pub const REQUEST_TIMEOUT: &str = "ai.request_timeout";
}

#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn get_provider(&self, id: i64) -> GatewayResult<Option<ProviderDescriptor>>;
}

#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn get_model(&self, id: i64) -> GatewayResult<Option<ModelDescriptor>>;
}

#[async_trait]
pub trait KeyStore: Send + Sync {
    async fn get_key(&self, id: i64) -> GatewayResult<Option<KeyDescriptor>>;
}

/// Persisted conversation turns
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Up to `limit` turns of a session, newest first
    async fn history(
        &self,
        session_id: i64,
        user_id: i64,
        limit: usize,
    ) -> GatewayResult<Vec<ConversationTurn>>;

    /// Append a turn and return its assigned id
    async fn append(&self, turn: &ConversationTurn) -> GatewayResult<i64>;
}

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get_setting(&self, key: &str) -> GatewayResult<Option<String>>;
}

/// Read a numeric setting, falling back to `default` when it is missing,
/// unparsable or the store is unavailable
pub async fn setting_or<T>(settings: &dyn SettingsStore, key: &str, default: T) -> T
where
    T: FromStr + Copy + fmt::Display,
{
    match settings.get_setting(key).await {
        Ok(Some(raw)) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(
                    setting = key,
                    value = %raw,
                    default = %default,
                    "Invalid setting value, using default"
                );
                default
            }
        },
        Ok(None) => default,
        Err(e) => {
            tracing::warn!(
                setting = key,
                error = %e,
                default = %default,
                "Failed to read setting, using default"
            );
            default
        }
    }
}

/// One aggregate usage counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LedgerScope {
    System,
    Provider(i64),
    Model(i64),
    Key(i64),
    User(i64),
}

impl fmt::Display for LedgerScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerScope::System => f.write_str("system"),
            LedgerScope::Provider(id) => write!(f, "provider:{}", id),
            LedgerScope::Model(id) => write!(f, "model:{}", id),
            LedgerScope::Key(id) => write!(f, "key:{}", id),
            LedgerScope::User(id) => write!(f, "user:{}", id),
        }
    }
}

/// Increments that become visible together on commit, or not at all
#[async_trait]
pub trait LedgerTransaction: Send {
    async fn increment(&mut self, scope: LedgerScope, delta: &UsageDelta) -> GatewayResult<()>;

    async fn commit(self: Box<Self>) -> GatewayResult<()>;

    async fn rollback(self: Box<Self>) -> GatewayResult<()>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    async fn begin(&self) -> GatewayResult<Box<dyn LedgerTransaction>>;
}

/// Liveness probe used by the health endpoint
#[async_trait]
pub trait StoreHealth: Send + Sync {
    async fn ping(&self) -> GatewayResult<()>;
}

/// Every store capability the gateway needs
#[derive(Clone)]
pub struct Stores {
    pub providers: Arc<dyn ProviderStore>,
    pub models: Arc<dyn ModelStore>,
    pub keys: Arc<dyn KeyStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub settings: Arc<dyn SettingsStore>,
    pub ledger: Arc<dyn LedgerStore>,
}

impl Stores {
    /// Use one backend for every capability
    pub fn from_shared<S>(store: Arc<S>) -> Self
    where
        S: ProviderStore
            + ModelStore
            + KeyStore
            + ConversationStore
            + SettingsStore
            + LedgerStore
            + 'static,
    {
        Self {
            providers: store.clone(),
            models: store.clone(),
            keys: store.clone(),
            conversations: store.clone(),
            settings: store.clone(),
            ledger: store,
        }
    }
}
