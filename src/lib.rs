//! # Storefront Edge
//!
//! Request admission and caching pipeline for an e-commerce backend, built as
//! composable tower middleware in front of axum handlers:
//!
//! - **Admission control**: distributed per-client rate limiting on an
//!   external atomic counter store, failing closed when the store is down
//! - **Response caching**: cache-aside GET caching with namespaced SHA-256 keys,
//!   pattern invalidation, failing open on store errors
//! - **Authentication**: cookie token gates (required, admin, optional) over
//!   pluggable token validation and user lookup
//! - **Observability**: request ids, one structured log line per request,
//!   Prometheus metrics, hardening headers
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RequestId → SecurityHeaders → Logger → RateLimit           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Per route: ResponseCache / AuthGate / CacheInvalidator     │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, stats, account, admin)                   │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Capabilities: CounterStore, CacheStore,                    │
//! │                TokenValidator, UserResolver                 │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Redis (counters, cache entries, user records)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use storefront_edge::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let state = AppState::from_config(config)?;
//!     let app = build_router(state)?;
//!
//!     // Serve with `into_make_service_with_connect_info::<SocketAddr>()`...
//!     Ok(())
//! }
//! ```
//!
//! ## Testing Without Redis
//!
//! Every capability is a trait object, so the same router runs against
//! [`store::MemoryStore`] and [`auth::MemoryUserDirectory`]:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use storefront_edge::auth::{JwtValidator, MemoryUserDirectory};
//! use storefront_edge::store::MemoryStore;
//! use storefront_edge::{AppState, Config};
//!
//! let config = Config::default();
//! let store = Arc::new(MemoryStore::new());
//! let state = AppState::new(
//!     config.clone(),
//!     store.clone(),
//!     store,
//!     Arc::new(JwtValidator::new(&config.jwt_secret)),
//!     Arc::new(MemoryUserDirectory::new()),
//! );
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use routes::build_router;
pub use state::AppState;
