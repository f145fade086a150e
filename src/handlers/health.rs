//! Health, readiness, and statistics endpoints.
//!
//! # Endpoints
//!
//! - `GET /health` - Liveness; 200 whenever the process is serving
//! - `GET /ready` - Readiness; 503 while the counter/cache store is unreachable
//! - `GET /stats` - Uptime and effective pipeline settings (served through the response cache)
//!
//! # Health vs Readiness
//!
//! The rate limiter fails closed, so an instance that cannot reach the store
//! answers every limited route with 500. Readiness reports that so load
//! balancers can drain the instance; liveness does not, since restarting the
//! process would not fix the store.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use chrono::Utc;
use tracing::{instrument, warn};

use crate::models::{
    CacheSettingsInfo, HealthResponse, RateLimitSettingsInfo, ReadinessResponse, StatsResponse,
};
use crate::state::AppState;
use crate::store::ExpiryPolicy;

/// Health check endpoint.
///
/// # Response Body
///
/// ```json
/// {
///   "status": "healthy",
///   "version": "0.1.0",
///   "timestamp": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument]
pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// Readiness check endpoint for Kubernetes probes.
///
/// ```yaml
/// readinessProbe:
///   httpGet:
///     path: /ready
///     port: 3000
///   periodSeconds: 10
/// ```
#[instrument(skip(state))]
pub async fn readiness_check(
    State(state): State<AppState>,
) -> (StatusCode, Json<ReadinessResponse>) {
    match state.cache.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(ReadinessResponse {
                ready: true,
                store_reachable: true,
            }),
        ),
        Err(e) => {
            warn!(error = %e, "Readiness check failed: store unreachable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadinessResponse {
                    ready: false,
                    store_reachable: false,
                }),
            )
        }
    }
}

/// Statistics endpoint.
///
/// Mounted behind the response cache, so repeated calls within the cache TTL
/// return the same body (including `generated_at`).
#[instrument(skip(state))]
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let config = &state.config;

    let rate_limit = config
        .rate_limiting_enabled()
        .then(|| RateLimitSettingsInfo {
            limit: config.rate_limit_requests,
            window_seconds: config.rate_limit_window.as_secs(),
            expiry: match config.rate_limit_expiry {
                ExpiryPolicy::Rolling => "rolling",
                ExpiryPolicy::Fixed => "fixed",
            }
            .to_string(),
        });

    Json(StatsResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        rate_limit,
        cache: CacheSettingsInfo {
            ttl_seconds: config.cache_ttl.as_secs(),
            namespace: config.cache_namespace.clone(),
        },
        generated_at: Utc::now(),
    })
}
