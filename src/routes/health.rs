//! Health check endpoints
//!
//! - `/health` - store status, version and uptime
//! - `/health/ready` - ready once the store answers
//! - `/health/live` - always up while the process serves requests

use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

use crate::AppState;

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

impl HealthStatus {
    fn status_code(self) -> StatusCode {
        match self {
            HealthStatus::Healthy => StatusCode::OK,
            HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// Result of pinging the backing store
#[derive(Debug, Serialize)]
pub struct StoreCheck {
    pub status: HealthStatus,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct Checks {
    pub store: StoreCheck,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub timestamp: String,
    pub checks: Checks,
}

/// Probe response
#[derive(Debug, Serialize)]
pub struct ProbeResponse {
    pub status: HealthStatus,
}

async fn ping_store(state: &AppState) -> StoreCheck {
    let start = Instant::now();
    let outcome = state.store_health.ping().await;
    let latency_ms = start.elapsed().as_millis() as u64;

    match outcome {
        Ok(()) => StoreCheck {
            status: HealthStatus::Healthy,
            latency_ms,
            error: None,
        },
        Err(e) => {
            tracing::warn!(error = %e, "Store health check failed");
            StoreCheck {
                status: HealthStatus::Unhealthy,
                latency_ms,
                error: Some(e.to_string()),
            }
        }
    }
}

/// GET /health
pub async fn health_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<HealthResponse>) {
    let store = ping_store(&state).await;
    let status = store.status;

    let response = HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        checks: Checks { store },
    };

    (status.status_code(), Json(response))
}

/// GET /health/ready
pub async fn readiness_check(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<ProbeResponse>) {
    let status = ping_store(&state).await.status;
    (status.status_code(), Json(ProbeResponse { status }))
}

/// GET /health/live
pub async fn liveness_check() -> (StatusCode, Json<ProbeResponse>) {
    (
        StatusCode::OK,
        Json(ProbeResponse {
            status: HealthStatus::Healthy,
        }),
    )
}
