//! Usage ledger
//!
//! Each exchange increments five aggregates inside one store transaction.
//! Either all five move or none does; a retried call adds the delta again.

use std::sync::Arc;

use crate::error::{GatewayError, GatewayResult};
use crate::store::{LedgerScope, LedgerStore};
use crate::types::UsageDelta;

/// Identifiers of the aggregates touched by one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerTarget {
    pub provider_id: i64,
    pub model_id: i64,
    pub key_id: i64,
    pub user_id: i64,
}

impl LedgerTarget {
    /// Every aggregate in increment order
    pub fn scopes(&self) -> [LedgerScope; 5] {
        [
            LedgerScope::System,
            LedgerScope::Provider(self.provider_id),
            LedgerScope::Model(self.model_id),
            LedgerScope::Key(self.key_id),
            LedgerScope::User(self.user_id),
        ]
    }
}

/// Applies usage deltas atomically
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn LedgerStore>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Add `delta` to every aggregate of `target`
    pub async fn apply(&self, target: &LedgerTarget, delta: &UsageDelta) -> GatewayResult<()> {
        let mut tx = self.store.begin().await?;

        for scope in target.scopes() {
            if let Err(e) = tx.increment(scope, delta).await {
                tracing::error!(
                    scope = %scope,
                    error = %e,
                    "Usage increment failed, rolling back"
                );
                if let Err(rollback_err) = tx.rollback().await {
                    tracing::error!(error = %rollback_err, "Usage rollback failed");
                }
                return Err(into_persistence(e));
            }
        }

        tx.commit().await.map_err(into_persistence)?;

        tracing::info!(
            provider_id = target.provider_id,
            model_id = target.model_id,
            key_id = target.key_id,
            user_id = target.user_id,
            prompt_tokens = delta.prompt_tokens,
            completion_tokens = delta.completion_tokens,
            total_tokens = delta.total_tokens,
            "Usage recorded"
        );

        Ok(())
    }
}

fn into_persistence(err: GatewayError) -> GatewayError {
    match err {
        GatewayError::Persistence(_) => err,
        other => GatewayError::Persistence(other.to_string()),
    }
}
