//! Gateway dispatch
//!
//! Entry point for chat requests. A request is resolved against the stores,
//! recorded, optionally augmented with search results and conversation
//! context, translated for its provider and then executed either
//! synchronously or through a [`StreamRelay`].
//!
//! Both paths finish in the same order: the assistant turn is persisted, the
//! usage ledger is applied, and only then is the result handed back.

pub mod client;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, error, info, instrument};

pub use client::{ProviderCall, ProviderClient};

use crate::context::ContextTrimmer;
use crate::error::{GatewayError, GatewayResult};
use crate::provider::headers::build_headers;
use crate::provider::response::{extract_usage, parse_completion};
use crate::provider::{merge_parameters, ProviderAdapter, ProviderRegistry, TranslationInput};
use crate::search::{self, SearchService};
use crate::store::{settings, setting_or, Stores};
use crate::streaming::{RelayContext, StreamHandle, StreamRelay};
use crate::tokens::{SharedTokenCounter, TokenAccountant};
use crate::types::{
    params, ChatRequest, Completion, ConversationTurn, ProviderDescriptor, Role, TokenUsage,
};
use crate::usage::{LedgerTarget, UsageLedger};

/// Defaults used when runtime settings are absent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewaySettings {
    pub request_timeout_secs: u64,
    pub context_length: usize,
    /// Capacity of each stream's event channel
    pub stream_buffer: usize,
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            request_timeout_secs: 240,
            context_length: 3,
            stream_buffer: 100,
        }
    }
}

/// Outcome of [`Gateway::send`]
pub enum Dispatched {
    Completion(Completion),
    Stream(StreamHandle),
}

/// A request resolved and translated, ready to execute
struct Prepared {
    provider: ProviderDescriptor,
    model_name: String,
    adapter: Arc<dyn ProviderAdapter>,
    accountant: TokenAccountant,
    call: ProviderCall,
    prompt_tokens: u64,
    session_id: Option<i64>,
    target: LedgerTarget,
    user_message_id: Option<i64>,
}

/// Multi-provider chat gateway
pub struct Gateway {
    stores: Stores,
    registry: ProviderRegistry,
    client: ProviderClient,
    counter: SharedTokenCounter,
    ledger: UsageLedger,
    trimmer: ContextTrimmer,
    search: Option<Arc<dyn SearchService>>,
    settings: GatewaySettings,
}

impl Gateway {
    /// Create a gateway with the built-in provider adapters
    pub fn new(stores: Stores, http_client: reqwest::Client, settings: GatewaySettings) -> Self {
        let ledger = UsageLedger::new(stores.ledger.clone());
        let trimmer = ContextTrimmer::new(
            stores.conversations.clone(),
            stores.settings.clone(),
            settings.context_length,
        );

        Self {
            stores,
            registry: ProviderRegistry::with_defaults(),
            client: ProviderClient::new(http_client),
            counter: SharedTokenCounter::new(),
            ledger,
            trimmer,
            search: None,
            settings,
        }
    }

    /// Replace the adapter registry
    pub fn with_registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Enable search augmentation through `service`
    pub fn with_search(mut self, service: Arc<dyn SearchService>) -> Self {
        self.search = Some(service);
        self
    }

    /// Run a request synchronously or as a stream, depending on the merged
    /// `stream` parameter
    pub async fn send(&self, request: ChatRequest) -> GatewayResult<Dispatched> {
        if self.wants_stream(&request).await? {
            self.dispatch_stream(request).await.map(Dispatched::Stream)
        } else {
            self.dispatch(request).await.map(Dispatched::Completion)
        }
    }

    /// Model default overlaid by the request override
    async fn wants_stream(&self, request: &ChatRequest) -> GatewayResult<bool> {
        if let Some(stream) = request.flag(params::STREAM) {
            return Ok(stream);
        }
        let model = self
            .stores
            .models
            .get_model(request.model_id)
            .await?
            .ok_or_else(|| GatewayError::Config(format!("model {} not found", request.model_id)))?;
        let defaults = model
            .default_parameters()
            .map_err(|e| GatewayError::Config(format!("model {} parameters: {}", model.id, e)))?;
        Ok(defaults
            .get(params::STREAM)
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    /// Execute a request and wait for the whole answer
    #[instrument(
        skip(self, request),
        fields(
            request_id = %uuid::Uuid::new_v4(),
            provider_id = request.provider_id,
            model_id = request.model_id,
            user_id = request.user_id
        )
    )]
    pub async fn dispatch(&self, request: ChatRequest) -> GatewayResult<Completion> {
        let prepared = self.prepare(&request, false).await?;

        let raw = self.client.post(&prepared.call).await?;
        let (content, body) = parse_completion(prepared.adapter.as_ref(), &raw)?;

        let usage = match extract_usage(&body) {
            Some(reported) => {
                let mut usage = TokenUsage {
                    prompt_tokens: prepared.prompt_tokens,
                    completion_tokens: 0,
                    total_tokens: 0,
                };
                if reported.completion_tokens.is_none() {
                    usage.completion_tokens = prepared.accountant.count(&content);
                }
                reported.apply_to(&mut usage);
                usage.with_derived_total()
            }
            None => TokenUsage::new(prepared.prompt_tokens, prepared.accountant.count(&content)),
        };

        let assistant_message_id = match prepared.session_id {
            Some(session_id) => Some(
                self.stores
                    .conversations
                    .append(&turn(&request, session_id, Role::Assistant, &content, usage))
                    .await?,
            ),
            None => None,
        };

        // The assistant turn stays stored; only the counters are left untouched
        if let Err(e) = self.ledger.apply(&prepared.target, &usage).await {
            error!(
                error = %e,
                assistant_message_id = ?assistant_message_id,
                total_tokens = usage.total_tokens,
                "Usage ledger update failed after the reply was stored"
            );
            return Err(e);
        }

        info!(
            provider = %prepared.provider.name,
            model = %prepared.model_name,
            prompt_tokens = usage.prompt_tokens,
            completion_tokens = usage.completion_tokens,
            total_tokens = usage.total_tokens,
            "Chat completion finished"
        );

        let mut completion = Completion::new(content, usage);
        completion.user_message_id = prepared.user_message_id;
        completion.assistant_message_id = assistant_message_id;
        Ok(completion)
    }

    /// Execute a request as a live stream
    ///
    /// Returns once the request is prepared; connecting and relaying happen
    /// on a spawned task owned by the returned handle.
    #[instrument(
        skip(self, request),
        fields(
            request_id = %uuid::Uuid::new_v4(),
            provider_id = request.provider_id,
            model_id = request.model_id,
            user_id = request.user_id
        )
    )]
    pub async fn dispatch_stream(&self, request: ChatRequest) -> GatewayResult<StreamHandle> {
        let prepared = self.prepare(&request, true).await?;

        info!(
            provider = %prepared.provider.name,
            model = %prepared.model_name,
            prompt_tokens = prepared.prompt_tokens,
            "Starting chat stream"
        );

        let client = self.client.clone();
        let call = prepared.call;
        let connect = Box::pin(async move { client.open_stream(call).await });

        let ctx = RelayContext {
            adapter: prepared.adapter,
            accountant: prepared.accountant,
            prompt_tokens: prepared.prompt_tokens,
            session_id: prepared.session_id,
            target: prepared.target,
            conversations: self.stores.conversations.clone(),
            ledger: self.ledger.clone(),
            user_message_id: prepared.user_message_id,
        };

        Ok(StreamRelay::spawn(connect, ctx, self.settings.stream_buffer))
    }

    async fn prepare(&self, request: &ChatRequest, streaming: bool) -> GatewayResult<Prepared> {
        let model = self
            .stores
            .models
            .get_model(request.model_id)
            .await?
            .ok_or_else(|| GatewayError::Config(format!("model {} not found", request.model_id)))?;
        let provider = self
            .stores
            .providers
            .get_provider(request.provider_id)
            .await?
            .ok_or_else(|| {
                GatewayError::Config(format!("provider {} not found", request.provider_id))
            })?;
        let key = self
            .stores
            .keys
            .get_key(request.key_id)
            .await?
            .ok_or_else(|| GatewayError::Config(format!("key {} not found", request.key_id)))?;

        let adapter = self.registry.get(provider.variant)?;
        let headers = build_headers(&provider, adapter.as_ref(), &key)?;

        let mut merged: Map<String, Value> =
            merge_parameters(&model, &request.provider_overrides())?;
        if streaming {
            merged.insert(params::STREAM.to_string(), Value::Bool(true));
        } else {
            merged.remove(params::STREAM);
        }

        let session_id = request.resolve_session_id();
        if request.use_context() && session_id.is_none() {
            return Err(GatewayError::MissingSession);
        }

        // The incoming message is recorded as sent, before augmentation
        let user_message_id = match session_id {
            Some(session_id) => Some(
                self.stores
                    .conversations
                    .append(&turn(
                        request,
                        session_id,
                        Role::User,
                        &request.content,
                        TokenUsage::default(),
                    ))
                    .await?,
            ),
            None => None,
        };

        let content = match (&self.search, request.enable_internet()) {
            (Some(service), true) => search::augment(service.as_ref(), &request.content)
                .await
                .unwrap_or_else(|| request.content.clone()),
            _ => request.content.clone(),
        };

        let history = self
            .trimmer
            .load(request.use_context(), session_id, request.user_id)
            .await?;

        let body = adapter.translate_request(&TranslationInput {
            model: &model,
            history: &history,
            content: &content,
            params: &merged,
        })?;

        let accountant = self.counter.for_provider(provider.variant, &model.model_id);
        let prompt_tokens = accountant.count_outbound(&body);

        let timeout_secs = setting_or(
            self.stores.settings.as_ref(),
            settings::REQUEST_TIMEOUT,
            self.settings.request_timeout_secs,
        )
        .await;

        debug!(
            variant = %provider.variant,
            model = %model.model_id,
            history_turns = history.len(),
            prompt_tokens,
            timeout_secs,
            streaming,
            "Request prepared"
        );

        Ok(Prepared {
            call: ProviderCall {
                url: provider.base_url.clone(),
                headers,
                body,
                timeout: Duration::from_secs(timeout_secs),
                retry_count: provider.retry_count,
                retry_interval: Duration::from_secs(provider.retry_interval_secs),
            },
            model_name: model.model_id.clone(),
            provider,
            adapter,
            accountant,
            prompt_tokens,
            session_id,
            target: LedgerTarget {
                provider_id: request.provider_id,
                model_id: request.model_id,
                key_id: request.key_id,
                user_id: request.user_id,
            },
            user_message_id,
        })
    }
}

fn turn(
    request: &ChatRequest,
    session_id: i64,
    role: Role,
    content: &str,
    usage: TokenUsage,
) -> ConversationTurn {
    ConversationTurn {
        id: None,
        session_id,
        user_id: request.user_id,
        provider_id: request.provider_id,
        model_id: request.model_id,
        key_id: request.key_id,
        role,
        content: content.to_string(),
        usage,
        created_at: Utc::now(),
    }
}
