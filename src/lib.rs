//! Conduit - multi-provider chat gateway
//!
//! Translates a unified chat request into the wire format of one of several
//! chat-completion vendors, executes it synchronously or as a live token
//! stream, and records the conversation and its token usage.

pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod provider;
pub mod routes;
pub mod search;
pub mod store;
pub mod streaming;
pub mod tokens;
pub mod types;
pub mod usage;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;

pub use crate::config::Config;
pub use crate::error::{GatewayError, GatewayResult};
pub use crate::gateway::{Dispatched, Gateway, GatewaySettings};
pub use crate::store::{RedisStore, StoreHealth, Stores};
pub use crate::streaming::{RelayState, StreamHandle};
pub use crate::types::{ChatRequest, Completion, StreamEvent};

/// Application state shared across all request handlers
pub struct AppState {
    pub config: Config,
    pub gateway: Arc<Gateway>,
    pub store_health: Arc<dyn StoreHealth>,
    pub start_time: Instant,
}

impl AppState {
    /// Create a new application state backed by Redis
    pub async fn new(config: Config) -> Result<Self> {
        let store =
            Arc::new(RedisStore::connect(&config.redis_url, config.key_prefix.clone()).await?);

        // Per-request timeouts come from the runtime settings
        let http_client = reqwest::Client::builder()
            .pool_max_idle_per_host(100)
            .build()?;

        let gateway = Gateway::new(
            Stores::from_shared(store.clone()),
            http_client,
            config.gateway_settings(),
        );

        Ok(Self {
            config,
            gateway: Arc::new(gateway),
            store_health: store,
            start_time: Instant::now(),
        })
    }

    /// Create application state over the in-memory store
    #[cfg(any(test, feature = "test-utils"))]
    pub fn new_for_testing(config: Config, store: Arc<store::InMemoryStore>) -> Self {
        let gateway = Gateway::new(
            Stores::from_shared(store.clone()),
            reqwest::Client::new(),
            config.gateway_settings(),
        );

        Self {
            config,
            gateway: Arc::new(gateway),
            store_health: store,
            start_time: Instant::now(),
        }
    }
}
