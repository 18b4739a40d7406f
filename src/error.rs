//! Error types for Conduit
//!
//! This module defines the error taxonomy shared by the gateway, the provider
//! adapters, the stores and the HTTP surface.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::provider::TranslationError;

/// Gateway-level errors
#[derive(Debug, Error)]
pub enum GatewayError {
    /// A provider, model or key record is missing or unreadable
    #[error("Configuration error: {0}")]
    Config(String),

    /// Context was requested but the request carries no session id
    #[error("Session id is required when conversation context is enabled")]
    MissingSession,

    /// The provider's header template is malformed
    #[error("Invalid header template: {0}")]
    HeaderTemplate(String),

    #[error("Translation failed: {0}")]
    Translation(#[from] TranslationError),

    /// No adapter is registered for the provider variant
    #[error("Unsupported provider type: {0}")]
    UnsupportedProvider(String),

    /// Connection failure or timeout talking to the provider
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered with a body we could not interpret
    #[error("Protocol error: {message}")]
    Protocol { message: String, body: String },

    /// The provider answered with an explicit error message
    #[error("Provider error: {0}")]
    Upstream(String),

    /// Writing the conversation turn or the usage ledger failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Mid-stream failure
    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// Build a protocol error carrying the raw body for diagnostics
    pub fn protocol(message: impl Into<String>, body: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
            body: body.into(),
        }
    }

    /// Stable machine-readable code for this error
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Config(_) => "CONFIG_ERROR",
            GatewayError::MissingSession => "MISSING_SESSION",
            GatewayError::HeaderTemplate(_) => "HEADER_TEMPLATE_ERROR",
            GatewayError::Translation(_) => "TRANSLATION_ERROR",
            GatewayError::UnsupportedProvider(_) => "UNSUPPORTED_PROVIDER",
            GatewayError::Network(_) => "NETWORK_ERROR",
            GatewayError::Protocol { .. } => "PROTOCOL_ERROR",
            GatewayError::Upstream(_) => "UPSTREAM_ERROR",
            GatewayError::Persistence(_) => "PERSISTENCE_ERROR",
            GatewayError::Stream(_) => "STREAM_ERROR",
            GatewayError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<redis::RedisError> for GatewayError {
    fn from(err: redis::RedisError) -> Self {
        GatewayError::Persistence(err.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            GatewayError::protocol(err.to_string(), String::new())
        } else {
            GatewayError::Network(err.to_string())
        }
    }
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

/// Error details
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = match &self {
            GatewayError::Config(_) => StatusCode::NOT_FOUND,
            GatewayError::MissingSession => StatusCode::BAD_REQUEST,
            GatewayError::HeaderTemplate(_)
            | GatewayError::Translation(_)
            | GatewayError::UnsupportedProvider(_) => StatusCode::UNPROCESSABLE_ENTITY,
            GatewayError::Network(_) => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::Protocol { .. }
            | GatewayError::Upstream(_)
            | GatewayError::Stream(_) => StatusCode::BAD_GATEWAY,
            GatewayError::Persistence(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        // Raw provider bodies and internal details stay in the logs
        let message = match &self {
            GatewayError::Protocol { message, .. } => format!("Protocol error: {}", message),
            GatewayError::Persistence(_) => "Storage service error".to_string(),
            GatewayError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        };

        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code().to_string(),
                message,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for convenience
pub type GatewayResult<T> = Result<T, GatewayError>;
