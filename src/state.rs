//! Shared application state for Axum handlers and middleware construction.
//!
//! The state carries configuration plus the four capabilities the pipeline
//! depends on. Each is an `Arc<dyn Trait>` injected at construction time, so
//! the same router can run against Redis in production and against
//! [`MemoryStore`](crate::store::MemoryStore) / stub resolvers in tests.
//!
//! # Thread Safety
//!
//! Cloning is cheap (a handful of `Arc` bumps). No field is mutated after
//! construction; all shared mutable state lives in the external store.

use std::sync::Arc;
use std::time::Instant;

use crate::auth::{JwtValidator, RedisUserDirectory, TokenValidator, UserResolver};
use crate::config::Config;
use crate::error::AppResult;
use crate::store::{CacheStore, CounterStore, RedisConnection, RedisStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Atomic counters for admission control
    pub counters: Arc<dyn CounterStore>,
    /// Response cache entries
    pub cache: Arc<dyn CacheStore>,
    /// Bearer token validation
    pub tokens: Arc<dyn TokenValidator>,
    /// Subject → user record resolution
    pub users: Arc<dyn UserResolver>,
    /// Timestamp when the application started
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        config: Config,
        counters: Arc<dyn CounterStore>,
        cache: Arc<dyn CacheStore>,
        tokens: Arc<dyn TokenValidator>,
        users: Arc<dyn UserResolver>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            counters,
            cache,
            tokens,
            users,
            started_at: Instant::now(),
        }
    }

    /// Production wiring: one Redis deployment backs counters, cache entries
    /// and user records; tokens are HS256 JWTs signed with `JWT_SECRET`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Store` if `REDIS_URL` is not a valid Redis URL.
    /// No connection is opened until the first request.
    pub fn from_config(config: Config) -> AppResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())
            .map_err(crate::store::StoreError::from)?;
        let store = Arc::new(RedisStore::new(RedisConnection::new(client)));
        let tokens = Arc::new(JwtValidator::new(&config.jwt_secret));
        let users = Arc::new(RedisUserDirectory::new(store.shared_connection()));

        Ok(Self::new(config, store.clone(), store, tokens, users))
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_does_not_connect() {
        // Nothing listens here; construction must still succeed.
        let config = Config {
            redis_url: "redis://127.0.0.1:1".to_string(),
            ..Config::default()
        };
        let state = AppState::from_config(config).unwrap();
        assert_eq!(state.uptime_seconds(), 0);
    }

    #[test]
    fn test_from_config_rejects_invalid_url() {
        let config = Config {
            redis_url: "definitely not redis".to_string(),
            ..Config::default()
        };
        assert!(AppState::from_config(config).is_err());
    }
}
