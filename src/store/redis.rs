//! Redis-backed store
//!
//! Descriptors are JSON strings, settings live in one hash, conversation
//! turns are pushed onto a per-session list (so `LRANGE` reads newest first)
//! and usage counters are hashes updated in a `MULTI/EXEC` pipeline.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::de::DeserializeOwned;

use super::{
    ConversationStore, KeyStore, LedgerScope, LedgerStore, LedgerTransaction, ModelStore,
    ProviderStore, SettingsStore, StoreHealth,
};
use crate::error::{GatewayError, GatewayResult};
use crate::types::{
    ConversationTurn, KeyDescriptor, ModelDescriptor, ProviderDescriptor, UsageDelta,
};

/// Redis store wrapper
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Create a new store over an existing connection
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    /// Open a connection manager for `url`
    pub async fn connect(url: &str, prefix: impl Into<String>) -> GatewayResult<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::new(conn, prefix))
    }

    /// Read and decode a JSON descriptor
    async fn get_descriptor<T: DeserializeOwned>(
        &self,
        kind: &str,
        key: String,
        id: i64,
    ) -> GatewayResult<Option<T>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(&key).await?;

        match value {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| GatewayError::Config(format!("{} {} is unreadable: {}", kind, id, e))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl ProviderStore for RedisStore {
    async fn get_provider(&self, id: i64) -> GatewayResult<Option<ProviderDescriptor>> {
        self.get_descriptor("provider", keys::provider(&self.prefix, id), id)
            .await
    }
}

#[async_trait]
impl ModelStore for RedisStore {
    async fn get_model(&self, id: i64) -> GatewayResult<Option<ModelDescriptor>> {
        self.get_descriptor("model", keys::model(&self.prefix, id), id)
            .await
    }
}

#[async_trait]
impl KeyStore for RedisStore {
    async fn get_key(&self, id: i64) -> GatewayResult<Option<KeyDescriptor>> {
        self.get_descriptor("key", keys::key(&self.prefix, id), id)
            .await
    }
}

#[async_trait]
impl ConversationStore for RedisStore {
    async fn history(
        &self,
        session_id: i64,
        user_id: i64,
        limit: usize,
    ) -> GatewayResult<Vec<ConversationTurn>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut conn = self.conn.clone();
        let raw: Vec<String> = conn
            .lrange(
                keys::conversation(&self.prefix, session_id, user_id),
                0,
                limit as isize - 1,
            )
            .await?;

        raw.iter()
            .map(|entry| {
                serde_json::from_str(entry)
                    .map_err(|e| GatewayError::Persistence(format!("corrupt turn: {}", e)))
            })
            .collect()
    }

    async fn append(&self, turn: &ConversationTurn) -> GatewayResult<i64> {
        let mut conn = self.conn.clone();
        let id: i64 = conn.incr(keys::message_seq(&self.prefix), 1).await?;

        let mut stored = turn.clone();
        stored.id = Some(id);
        let serialized = serde_json::to_string(&stored)
            .map_err(|e| GatewayError::Persistence(e.to_string()))?;

        let _: i64 = conn
            .lpush(
                keys::conversation(&self.prefix, turn.session_id, turn.user_id),
                serialized,
            )
            .await?;

        Ok(id)
    }
}

#[async_trait]
impl SettingsStore for RedisStore {
    async fn get_setting(&self, key: &str) -> GatewayResult<Option<String>> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.hget(keys::settings(&self.prefix), key).await?;
        Ok(value)
    }
}

/// Buffered `HINCRBY` commands sent as one `MULTI/EXEC` block
pub struct RedisLedgerTransaction {
    conn: ConnectionManager,
    pipe: redis::Pipeline,
    prefix: String,
}

#[async_trait]
impl LedgerTransaction for RedisLedgerTransaction {
    async fn increment(&mut self, scope: LedgerScope, delta: &UsageDelta) -> GatewayResult<()> {
        let key = keys::usage(&self.prefix, scope);
        self.pipe
            .hincr(&key, "prompt_tokens", delta.prompt_tokens)
            .ignore()
            .hincr(&key, "completion_tokens", delta.completion_tokens)
            .ignore()
            .hincr(&key, "total_tokens", delta.total_tokens)
            .ignore();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> GatewayResult<()> {
        let RedisLedgerTransaction { mut conn, pipe, .. } = *self;
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> GatewayResult<()> {
        // Nothing was sent yet; dropping the pipeline discards it
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for RedisStore {
    async fn begin(&self) -> GatewayResult<Box<dyn LedgerTransaction>> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        Ok(Box::new(RedisLedgerTransaction {
            conn: self.conn.clone(),
            pipe,
            prefix: self.prefix.clone(),
        }))
    }
}

#[async_trait]
impl StoreHealth for RedisStore {
    async fn ping(&self) -> GatewayResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("PING").query_async::<_, String>(&mut conn).await?;
        Ok(())
    }
}

/// Key layout
pub mod keys {
    use crate::store::LedgerScope;

    pub fn provider(prefix: &str, id: i64) -> String {
        format!("{}:provider:{}", prefix, id)
    }

    pub fn model(prefix: &str, id: i64) -> String {
        format!("{}:model:{}", prefix, id)
    }

    pub fn key(prefix: &str, id: i64) -> String {
        format!("{}:key:{}", prefix, id)
    }

    pub fn settings(prefix: &str) -> String {
        format!("{}:settings", prefix)
    }

    /// Turns of one session for one user, newest at the head
    pub fn conversation(prefix: &str, session_id: i64, user_id: i64) -> String {
        format!("{}:conversation:{}:{}", prefix, session_id, user_id)
    }

    /// Monotonic message id sequence
    pub fn message_seq(prefix: &str) -> String {
        format!("{}:message:seq", prefix)
    }

    pub fn usage(prefix: &str, scope: LedgerScope) -> String {
        format!("{}:usage:{}", prefix, scope)
    }
}
