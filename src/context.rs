//! Conversation context trimming
//!
//! History is kept short and well formed before it reaches a translator:
//! roles alternate and the window never ends on a user turn, since the new
//! user message is appended after it.

use std::sync::Arc;

use crate::error::{GatewayError, GatewayResult};
use crate::store::{settings, setting_or, ConversationStore, SettingsStore};
use crate::types::{ConversationTurn, Role};

/// Reduce newest-first history to a chronological, alternating window
///
/// Takes the `k` most recent turns, restores chronological order, keeps only
/// the first turn of each run of equal roles and drops a trailing user turn.
pub fn trim_history(newest_first: Vec<ConversationTurn>, k: usize) -> Vec<ConversationTurn> {
    let mut window: Vec<ConversationTurn> = newest_first.into_iter().take(k).collect();
    window.reverse();

    let mut trimmed: Vec<ConversationTurn> = Vec::with_capacity(window.len());
    for turn in window {
        if trimmed.last().map(|last| last.role) != Some(turn.role) {
            trimmed.push(turn);
        }
    }

    if trimmed.last().map(|last| last.role) == Some(Role::User) {
        trimmed.pop();
    }

    trimmed
}

/// Loads and trims the history for one request
#[derive(Clone)]
pub struct ContextTrimmer {
    conversations: Arc<dyn ConversationStore>,
    settings: Arc<dyn SettingsStore>,
    default_length: usize,
}

impl ContextTrimmer {
    pub fn new(
        conversations: Arc<dyn ConversationStore>,
        settings: Arc<dyn SettingsStore>,
        default_length: usize,
    ) -> Self {
        Self {
            conversations,
            settings,
            default_length,
        }
    }

    /// Trimmed history for a session, empty when context is disabled
    pub async fn load(
        &self,
        enabled: bool,
        session_id: Option<i64>,
        user_id: i64,
    ) -> GatewayResult<Vec<ConversationTurn>> {
        if !enabled {
            return Ok(Vec::new());
        }
        let session_id = session_id.ok_or(GatewayError::MissingSession)?;

        let k = setting_or(
            self.settings.as_ref(),
            settings::CONTEXT_LENGTH,
            self.default_length,
        )
        .await;
        if k == 0 {
            return Ok(Vec::new());
        }

        let history = self.conversations.history(session_id, user_id, k).await?;
        let trimmed = trim_history(history, k);

        tracing::debug!(
            session_id,
            context_length = k,
            turns = trimmed.len(),
            "Loaded conversation context"
        );

        Ok(trimmed)
    }
}
