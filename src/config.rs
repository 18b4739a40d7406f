//! Configuration management for Conduit
//!
//! Configuration is loaded from environment variables. Runtime settings stored
//! in the settings store override the request timeout and context length.

use anyhow::{Context, Result};
use std::env;

use crate::gateway::GatewaySettings;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,

    /// Redis connection URL
    pub redis_url: String,
    /// Prefix of every Redis key
    pub key_prefix: String,

    /// Provider request timeout when `ai.request_timeout` is not set
    pub default_timeout_secs: u64,
    /// History window when `session.context_length` is not set
    pub default_context_length: usize,
    /// Capacity of each stream's event channel
    pub stream_buffer: usize,

    /// Emit logs as JSON
    pub log_json: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env::var("CONDUIT_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("CONDUIT_PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .context("Invalid CONDUIT_PORT")?,

            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://localhost:6379".to_string()),
            key_prefix: env::var("CONDUIT_KEY_PREFIX").unwrap_or_else(|_| "conduit".to_string()),

            default_timeout_secs: env::var("CONDUIT_DEFAULT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "240".to_string())
                .parse()
                .context("Invalid CONDUIT_DEFAULT_TIMEOUT_SECS")?,
            default_context_length: env::var("CONDUIT_DEFAULT_CONTEXT_LENGTH")
                .unwrap_or_else(|_| "3".to_string())
                .parse()
                .context("Invalid CONDUIT_DEFAULT_CONTEXT_LENGTH")?,
            stream_buffer: env::var("CONDUIT_STREAM_BUFFER")
                .unwrap_or_else(|_| "100".to_string())
                .parse()
                .context("Invalid CONDUIT_STREAM_BUFFER")?,

            log_json: env::var("CONDUIT_LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }

    /// Gateway defaults derived from this configuration
    pub fn gateway_settings(&self) -> GatewaySettings {
        GatewaySettings {
            request_timeout_secs: self.default_timeout_secs,
            context_length: self.default_context_length,
            stream_buffer: self.stream_buffer,
        }
    }
}
