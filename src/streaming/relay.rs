//! Stream relay
//!
//! One spawned task per streaming request owns the provider body. It frames
//! lines, extracts content fragments through the provider adapter and pushes
//! them through a bounded channel, so a slow consumer slows down reads from
//! the provider instead of growing a buffer. When the provider finishes, the
//! task persists the assistant turn, applies the usage ledger and only then
//! publishes `Done`.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::{Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{classify_line, SseLine, SseLineBuffer};
use crate::error::{GatewayError, GatewayResult};
use crate::provider::response::{error_message, extract_usage, PartialUsage};
use crate::provider::ProviderAdapter;
use crate::store::ConversationStore;
use crate::tokens::TokenAccountant;
use crate::types::{Completion, ConversationTurn, Role, StreamEvent, StreamSummary, TokenUsage};
use crate::usage::{LedgerTarget, UsageLedger};

/// Provider response body as a stream of byte chunks
pub type ByteStream = Pin<Box<dyn Stream<Item = GatewayResult<Bytes>> + Send>>;

/// Deferred connection to the provider
pub type Connect = BoxFuture<'static, GatewayResult<ByteStream>>;

/// Lifecycle of one relay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Idle,
    Connecting,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl RelayState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RelayState::Completed | RelayState::Failed | RelayState::Cancelled
        )
    }
}

/// Everything the relay needs to account for and persist the exchange
pub struct RelayContext {
    pub adapter: Arc<dyn ProviderAdapter>,
    pub accountant: TokenAccountant,
    /// Tokens of the outbound prompt, used unless the provider reports its own
    pub prompt_tokens: u64,
    /// Assistant turn is persisted only for requests bound to a session
    pub session_id: Option<i64>,
    pub target: LedgerTarget,
    pub conversations: Arc<dyn ConversationStore>,
    pub ledger: UsageLedger,
    pub user_message_id: Option<i64>,
}

/// Spawns relay tasks
pub struct StreamRelay;

impl StreamRelay {
    /// Start relaying the stream produced by `connect`
    ///
    /// Must be called inside a Tokio runtime.
    pub fn spawn(connect: Connect, ctx: RelayContext, capacity: usize) -> StreamHandle {
        let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
        let (result_tx, result_rx) = oneshot::channel();
        let (state_tx, state_rx) = watch::channel(RelayState::Idle);
        let cancel = CancellationToken::new();

        let worker = Worker {
            ctx,
            events: events_tx,
            state: state_tx,
            cancel: cancel.clone(),
        };

        tokio::spawn(
            async move {
                let outcome = worker.run(connect).await;
                // The handle may already be gone
                let _ = result_tx.send(outcome);
            }
            .instrument(tracing::Span::current()),
        );

        StreamHandle {
            events: events_rx,
            result: result_rx,
            cancel,
            state: state_rx,
        }
    }
}

/// Consumer side of a relay
///
/// Yields [`StreamEvent`]s in order and ends after `Done` or `Error`.
/// Dropping the handle cancels the relay.
pub struct StreamHandle {
    events: mpsc::Receiver<StreamEvent>,
    result: oneshot::Receiver<GatewayResult<Completion>>,
    cancel: CancellationToken,
    state: watch::Receiver<RelayState>,
}

impl StreamHandle {
    /// Stop reading from the provider; nothing is persisted
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Current relay state
    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Receiver for observing state transitions
    pub fn state_changes(&self) -> watch::Receiver<RelayState> {
        self.state.clone()
    }

    /// Wait for the relay to finish, discarding unread events
    pub async fn result(mut self) -> GatewayResult<Completion> {
        while self.events.recv().await.is_some() {}

        match (&mut self.result).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GatewayError::Stream("relay task ended unexpectedly".into())),
        }
    }
}

impl Stream for StreamHandle {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Content and usage assembled so far
#[derive(Default)]
struct Assembly {
    content: String,
    reported: PartialUsage,
}

enum Flow {
    Continue,
    Finished,
    /// The provider reported an error inside the stream
    Failed(String),
    Cancelled,
}

struct Worker {
    ctx: RelayContext,
    events: mpsc::Sender<StreamEvent>,
    state: watch::Sender<RelayState>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self, connect: Connect) -> GatewayResult<Completion> {
        self.set_state(RelayState::Connecting);

        let connected = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            _ = self.events.closed() => None,
            result = connect => Some(result),
        };

        let mut body = match connected {
            None => return self.cancelled(),
            Some(Ok(body)) => body,
            Some(Err(e)) => return self.fail(e).await,
        };

        let mut buffer = SseLineBuffer::new();
        let mut assembly = Assembly::default();

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return self.cancelled(),
                _ = self.events.closed() => return self.cancelled(),
                next = body.next() => next,
            };

            match next {
                Some(Ok(bytes)) => {
                    let mut finished = false;
                    for line in buffer.feed(&bytes) {
                        match self.handle_line(&line, &mut assembly).await {
                            Flow::Continue => {}
                            Flow::Finished => {
                                finished = true;
                                break;
                            }
                            Flow::Failed(message) => {
                                let err = GatewayError::Upstream(message);
                                return self.fail_with_partial(err, assembly).await;
                            }
                            Flow::Cancelled => return self.cancelled(),
                        }
                    }
                    if finished {
                        break;
                    }
                }
                Some(Err(e)) => return self.fail_mid_stream(e, assembly).await,
                None => {
                    if let Some(rest) = buffer.finish() {
                        match self.handle_line(&rest, &mut assembly).await {
                            Flow::Cancelled => return self.cancelled(),
                            Flow::Failed(message) => {
                                let err = GatewayError::Upstream(message);
                                return self.fail_with_partial(err, assembly).await;
                            }
                            Flow::Continue | Flow::Finished => {}
                        }
                    }
                    break;
                }
            }
        }

        self.complete(assembly).await
    }

    async fn handle_line(&self, line: &str, assembly: &mut Assembly) -> Flow {
        if *self.state.borrow() == RelayState::Connecting {
            self.set_state(RelayState::Streaming);
        }

        let payload = match classify_line(line) {
            SseLine::Done => return Flow::Finished,
            SseLine::Data(payload) => payload,
            SseLine::Other => return Flow::Continue,
        };

        let chunk: Value = match serde_json::from_str(payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::warn!(error = %e, "Skipping undecodable stream chunk");
                return Flow::Continue;
            }
        };

        let delta = self.ctx.adapter.extract_delta(&chunk);
        let partial = extract_usage(&chunk);

        if delta.is_none() && partial.is_none() {
            return match error_message(&chunk) {
                Some(message) => Flow::Failed(message),
                None => Flow::Continue,
            };
        }

        if let Some(delta) = delta.filter(|d| !d.is_empty()) {
            assembly.content.push_str(&delta);
            if !self.emit(StreamEvent::ContentDelta(delta)).await {
                return Flow::Cancelled;
            }
        }

        if let Some(partial) = partial {
            overlay(&mut assembly.reported, &partial);
            let usage = self.usage_of(assembly);
            if !self.emit(StreamEvent::UsageUpdate(usage)).await {
                return Flow::Cancelled;
            }
        }

        Flow::Continue
    }

    /// Reported usage where available, counted usage otherwise
    fn usage_of(&self, assembly: &Assembly) -> TokenUsage {
        let reported = assembly.reported;
        let prompt_tokens = reported.prompt_tokens.unwrap_or(self.ctx.prompt_tokens);
        let completion_tokens = reported
            .completion_tokens
            .unwrap_or_else(|| self.ctx.accountant.count(&assembly.content));
        let total_tokens = reported
            .total_tokens
            .filter(|t| *t > 0)
            .unwrap_or(prompt_tokens + completion_tokens);

        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }

    /// Send an event, giving up if the relay is cancelled while waiting for room
    async fn emit(&self, event: StreamEvent) -> bool {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            sent = self.events.send(event) => sent.is_ok(),
        }
    }

    fn set_state(&self, state: RelayState) {
        self.state.send_replace(state);
    }

    async fn persist(&self, content: &str, usage: TokenUsage) -> GatewayResult<Option<i64>> {
        let Some(session_id) = self.ctx.session_id else {
            return Ok(None);
        };

        let turn = ConversationTurn {
            id: None,
            session_id,
            user_id: self.ctx.target.user_id,
            provider_id: self.ctx.target.provider_id,
            model_id: self.ctx.target.model_id,
            key_id: self.ctx.target.key_id,
            role: Role::Assistant,
            content: content.to_string(),
            usage,
            created_at: Utc::now(),
        };

        self.ctx.conversations.append(&turn).await.map(Some)
    }

    async fn complete(self, assembly: Assembly) -> GatewayResult<Completion> {
        let usage = self.usage_of(&assembly);

        let message_id = match self.persist(&assembly.content, usage).await {
            Ok(id) => id,
            Err(e) => return self.fail(e).await,
        };

        if let Err(e) = self.ctx.ledger.apply(&self.ctx.target, &usage).await {
            return self.fail(e).await;
        }

        self.set_state(RelayState::Completed);
        self.emit(StreamEvent::Done(StreamSummary { message_id, usage }))
            .await;

        tracing::info!(
            provider = self.ctx.adapter.name(),
            content_len = assembly.content.len(),
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "Stream completed"
        );

        let mut completion = Completion::new(assembly.content, usage);
        completion.user_message_id = self.ctx.user_message_id;
        completion.assistant_message_id = message_id;
        Ok(completion)
    }

    async fn fail_mid_stream(
        self,
        err: GatewayError,
        assembly: Assembly,
    ) -> GatewayResult<Completion> {
        self.fail_with_partial(GatewayError::Stream(err.to_string()), assembly)
            .await
    }

    /// Keep whatever arrived before the failure
    async fn fail_with_partial(
        self,
        err: GatewayError,
        assembly: Assembly,
    ) -> GatewayResult<Completion> {
        if !assembly.content.is_empty() {
            let usage = self.usage_of(&assembly);
            match self.persist(&assembly.content, usage).await {
                Ok(_) => {
                    if let Err(e) = self.ctx.ledger.apply(&self.ctx.target, &usage).await {
                        tracing::error!(error = %e, "Failed to record usage of partial stream");
                    }
                }
                Err(e) => tracing::error!(error = %e, "Failed to persist partial stream content"),
            }
        }

        self.fail(err).await
    }

    async fn fail(&self, err: GatewayError) -> GatewayResult<Completion> {
        tracing::error!(
            provider = self.ctx.adapter.name(),
            error = %err,
            "Stream failed"
        );
        self.set_state(RelayState::Failed);
        self.emit(StreamEvent::Error(err.to_string())).await;
        Err(err)
    }

    fn cancelled(&self) -> GatewayResult<Completion> {
        tracing::debug!(provider = self.ctx.adapter.name(), "Stream cancelled");
        self.set_state(RelayState::Cancelled);
        Err(GatewayError::Stream("stream cancelled".into()))
    }
}

/// Later reports replace earlier ones field by field
fn overlay(current: &mut PartialUsage, update: &PartialUsage) {
    if update.prompt_tokens.is_some() {
        current.prompt_tokens = update.prompt_tokens;
    }
    if update.completion_tokens.is_some() {
        current.completion_tokens = update.completion_tokens;
    }
    if update.total_tokens.is_some() {
        current.total_tokens = update.total_tokens;
    }
}
