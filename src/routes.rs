//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (request order)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← RequestContext + X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │ Security Headers │ ← hardening headers on every response
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Request Logger  │ ← one record per request, duration histogram
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded, 500 if store down
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   CORS / Body    │
//! └────────┬─────────┘
//!          ▼
//!   per-route layers: Response Cache (/stats), Auth gates, Cache Invalidator
//!          ▼
//!      Handler
//! ```
//!
//! # Routes
//!
//! - `GET /health`, `GET /ready` - probes
//! - `GET /stats` - cached statistics
//! - `GET /me` - required gate
//! - `GET /session` - optional gate
//! - `POST /admin/cache/purge` - admin gate, then cache invalidation

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::handlers;
use crate::middleware::rate_limit::RateLimitError;
use crate::middleware::{
    AuthLayer, CacheInvalidateLayer, LogFilter, RateLimitLayer, RequestIdLayer,
    RequestLoggerLayer, ResponseCacheLayer, SecurityHeadersLayer, TrustedProxyConfig,
};
use crate::state::AppState;

/// Build the application router with all routes and middleware configured.
///
/// # Errors
///
/// Returns `RateLimitError` if rate limiting is enabled with an invalid window.
pub fn build_router(state: AppState) -> Result<Router, RateLimitError> {
    let config = state.config.clone();

    // =========================================================================
    // Per-route Layers
    // =========================================================================
    let cache = ResponseCacheLayer::new(state.cache.clone(), config.cache_ttl)
        .with_namespace(config.cache_namespace.clone())
        .with_max_entry_bytes(config.cache_max_entry_bytes);

    let auth = AuthLayer::new(
        state.tokens.clone(),
        state.users.clone(),
        config.auth_cookie_name.clone(),
    );

    let invalidate =
        CacheInvalidateLayer::new(state.cache.clone(), config.cache_invalidation_pattern());

    // =========================================================================
    // Routes
    // =========================================================================
    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/stats", get(handlers::stats).route_layer(cache))
        .route("/me", get(handlers::me).route_layer(auth.clone().required()))
        .route(
            "/session",
            get(handlers::session).route_layer(auth.clone().optional()),
        )
        // Gate outermost: a rejected caller never triggers invalidation
        .route(
            "/admin/cache/purge",
            post(handlers::purge_cache)
                .route_layer(invalidate)
                .route_layer(auth.admin()),
        );

    // =========================================================================
    // Global Middleware (last added runs first)
    // =========================================================================
    router = router
        .layer(DefaultBodyLimit::max(config.max_request_body_size))
        .layer(build_cors_layer(&config.cors_allowed_origins));

    if config.rate_limiting_enabled() {
        info!(
            limit = config.rate_limit_requests,
            window_secs = config.rate_limit_window.as_secs(),
            expiry = ?config.rate_limit_expiry,
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        router = router.layer(
            RateLimitLayer::new(
                state.counters.clone(),
                config.rate_limit_requests,
                config.rate_limit_window,
            )?
            .with_key_prefix(config.rate_limit_key_prefix.clone())
            .with_expiry_policy(config.rate_limit_expiry),
        );
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_REQUESTS=0)");
    }

    router = router
        .layer(RequestLoggerLayer::new(LogFilter::new(
            config.log_include_paths.clone(),
            config.log_exclude_paths.clone(),
        )))
        .layer(SecurityHeadersLayer::new())
        .layer(RequestIdLayer::new(TrustedProxyConfig::new(
            &config.trusted_proxies,
        )));

    Ok(router.with_state(state))
}

/// Build CORS layer from configuration.
///
/// Using `*` (any origin) is convenient for development but should be
/// avoided in production. Specify explicit origins instead.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let allow_any = allowed_origins.iter().any(|o| o == "*");

    if allow_any {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
