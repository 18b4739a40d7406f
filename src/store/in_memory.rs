//! In-memory store for testing
//!
//! Implements every store trait over plain maps so the gateway can be
//! exercised without a Redis instance. Failures can be injected into ledger
//! increments and conversation appends.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use super::{
    ConversationStore, KeyStore, LedgerScope, LedgerStore, LedgerTransaction, ModelStore,
    ProviderStore, SettingsStore, StoreHealth,
};
use crate::error::{GatewayError, GatewayResult};
use crate::types::{
    ConversationTurn, KeyDescriptor, ModelDescriptor, ProviderDescriptor, Role, TokenUsage,
    UsageDelta,
};

#[derive(Default)]
struct State {
    providers: HashMap<i64, ProviderDescriptor>,
    models: HashMap<i64, ModelDescriptor>,
    keys: HashMap<i64, KeyDescriptor>,
    settings: HashMap<String, String>,
    /// Chronological
    turns: Vec<ConversationTurn>,
    next_message_id: i64,
    ledger: HashMap<LedgerScope, TokenUsage>,
}

/// In-memory store for testing
#[derive(Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
    /// 1-based increment index that fails inside each transaction; 0 disables
    fail_increment_at: AtomicUsize,
    /// Role whose appends fail
    fail_append_role: RwLock<Option<Role>>,
    unhealthy: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert_provider(&self, provider: ProviderDescriptor) {
        self.write().providers.insert(provider.id, provider);
    }

    pub fn insert_model(&self, model: ModelDescriptor) {
        self.write().models.insert(model.id, model);
    }

    pub fn insert_key(&self, key: KeyDescriptor) {
        self.write().keys.insert(key.id, key);
    }

    pub fn set_setting(&self, key: &str, value: &str) {
        self.write().settings.insert(key.to_string(), value.to_string());
    }

    /// Store a turn directly, bypassing failure injection
    pub fn seed_turn(&self, mut turn: ConversationTurn) -> i64 {
        let mut state = self.write();
        state.next_message_id += 1;
        let id = state.next_message_id;
        turn.id = Some(id);
        state.turns.push(turn);
        id
    }

    /// Turns of a session in chronological order
    pub fn turns(&self, session_id: i64, user_id: i64) -> Vec<ConversationTurn> {
        self.read()
            .turns
            .iter()
            .filter(|t| t.session_id == session_id && t.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Committed counters of one aggregate
    pub fn ledger_totals(&self, scope: LedgerScope) -> TokenUsage {
        self.read().ledger.get(&scope).copied().unwrap_or_default()
    }

    /// Make the `n`th increment of every transaction fail (1-based, 0 disables)
    pub fn fail_ledger_increment(&self, n: usize) {
        self.fail_increment_at.store(n, Ordering::SeqCst);
    }

    /// Make appends of turns with `role` fail
    pub fn fail_appends_for(&self, role: Option<Role>) {
        *self
            .fail_append_role
            .write()
            .unwrap_or_else(PoisonError::into_inner) = role;
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.unhealthy.store(!healthy, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProviderStore for InMemoryStore {
    async fn get_provider(&self, id: i64) -> GatewayResult<Option<ProviderDescriptor>> {
        Ok(self.read().providers.get(&id).cloned())
    }
}

#[async_trait]
impl ModelStore for InMemoryStore {
    async fn get_model(&self, id: i64) -> GatewayResult<Option<ModelDescriptor>> {
        Ok(self.read().models.get(&id).cloned())
    }
}

#[async_trait]
impl KeyStore for InMemoryStore {
    async fn get_key(&self, id: i64) -> GatewayResult<Option<KeyDescriptor>> {
        Ok(self.read().keys.get(&id).cloned())
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn history(
        &self,
        session_id: i64,
        user_id: i64,
        limit: usize,
    ) -> GatewayResult<Vec<ConversationTurn>> {
        Ok(self
            .read()
            .turns
            .iter()
            .rev()
            .filter(|t| t.session_id == session_id && t.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append(&self, turn: &ConversationTurn) -> GatewayResult<i64> {
        let failing = *self
            .fail_append_role
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if failing == Some(turn.role) {
            return Err(GatewayError::Persistence(format!(
                "injected append failure for {} turn",
                turn.role.as_str()
            )));
        }
        Ok(self.seed_turn(turn.clone()))
    }
}

#[async_trait]
impl SettingsStore for InMemoryStore {
    async fn get_setting(&self, key: &str) -> GatewayResult<Option<String>> {
        Ok(self.read().settings.get(key).cloned())
    }
}

/// Pending increments applied on commit
pub struct InMemoryLedgerTransaction {
    state: Arc<RwLock<State>>,
    pending: Vec<(LedgerScope, UsageDelta)>,
    fail_at: usize,
}

#[async_trait]
impl LedgerTransaction for InMemoryLedgerTransaction {
    async fn increment(&mut self, scope: LedgerScope, delta: &UsageDelta) -> GatewayResult<()> {
        if self.fail_at != 0 && self.pending.len() + 1 == self.fail_at {
            return Err(GatewayError::Persistence(format!(
                "injected failure incrementing {}",
                scope
            )));
        }
        self.pending.push((scope, *delta));
        Ok(())
    }

    async fn commit(self: Box<Self>) -> GatewayResult<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        for (scope, delta) in &self.pending {
            let totals = state.ledger.entry(*scope).or_default();
            totals.prompt_tokens += delta.prompt_tokens;
            totals.completion_tokens += delta.completion_tokens;
            totals.total_tokens += delta.total_tokens;
        }
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> GatewayResult<()> {
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn begin(&self) -> GatewayResult<Box<dyn LedgerTransaction>> {
        Ok(Box::new(InMemoryLedgerTransaction {
            state: self.state.clone(),
            pending: Vec::new(),
            fail_at: self.fail_increment_at.load(Ordering::SeqCst),
        }))
    }
}

#[async_trait]
impl StoreHealth for InMemoryStore {
    async fn ping(&self) -> GatewayResult<()> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(GatewayError::Persistence("store unavailable".into()));
        }
        Ok(())
    }
}
