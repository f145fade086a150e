//! External counter and cache store capabilities.
//!
//! The middleware never holds counters or cache entries in process memory
//! between requests. All shared state lives behind these two narrow traits,
//! and all coordination between concurrent requests is delegated to the
//! atomicity guarantees of the backing store.
//!
//! # Implementations
//!
//! - [`RedisStore`]: production backend (one shared `ConnectionManager`)
//! - [`MemoryStore`]: single-instance / test backend with the same semantics
//!
//! ```text
//!   RateLimitLayer ──► CounterStore::increment (INCR + EXPIRE, one MULTI/EXEC)
//!                      CounterStore::ttl
//!   ResponseCacheLayer ─► CacheStore::get / CacheStore::set
//!   CacheInvalidateLayer ─► CacheStore::delete_by_pattern
//! ```

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use self::redis::{RedisConnection, RedisStore};

/// Errors surfaced by a counter or cache store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Redis command failed: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// How a counter's expiry is maintained across increments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExpiryPolicy {
    /// Expiry is reset to the full window on every increment. Steady traffic
    /// keeps extending the window instead of letting it lapse on a fixed cadence.
    #[default]
    Rolling,
    /// Expiry is only set when the counter has none (first increment of a window).
    Fixed,
}

impl FromStr for ExpiryPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rolling" => Ok(Self::Rolling),
            "fixed" => Ok(Self::Fixed),
            other => Err(format!("expected 'rolling' or 'fixed', got '{other}'")),
        }
    }
}

/// Atomic counter capability used by the rate limiter.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Increment `key` by one and apply `window` as its expiry, as a single
    /// atomic batch. Returns the post-increment count.
    async fn increment(&self, key: &str, window: Duration, policy: ExpiryPolicy)
    -> StoreResult<u64>;

    /// Remaining time to live of `key`.
    ///
    /// `None` when the key does not exist or carries no expiry.
    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>>;
}

/// Key/value capability used by the response cache and its invalidator.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()>;

    /// Delete every key matching a glob `pattern` (`*`, `?`, `\` escapes).
    /// Returns the number of keys removed.
    async fn delete_by_pattern(&self, pattern: &str) -> StoreResult<u64>;

    /// Round trip used by readiness probes.
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Match `key` against a Redis-style glob pattern.
///
/// Supports `*` (any run of bytes), `?` (exactly one byte) and `\` to escape
/// the next byte. Character classes are not supported and match literally.
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pattern = pattern.as_bytes();
    let key = key.as_bytes();

    let (mut p, mut k) = (0usize, 0usize);
    // Position of the last `*` seen and the key offset it was tried at.
    let mut backtrack: Option<(usize, usize)> = None;

    while k < key.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, k));
                p += 1;
                continue;
            }
            Some(b'?') => {
                p += 1;
                k += 1;
                continue;
            }
            Some(b'\\') if pattern.get(p + 1) == key.get(k) && p + 1 < pattern.len() => {
                p += 2;
                k += 1;
                continue;
            }
            Some(c) if *c != b'\\' && Some(c) == key.get(k) => {
                p += 1;
                k += 1;
                continue;
            }
            _ => {}
        }

        match backtrack {
            Some((star, matched)) => {
                p = star + 1;
                k = matched + 1;
                backtrack = Some((star, matched + 1));
            }
            None => return false,
        }
    }

    pattern.get(p..).is_some_and(|rest| rest.iter().all(|c| *c == b'*'))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_prefix_star() {
        assert!(glob_match("cache:*", "cache:abc"));
        assert!(glob_match("cache:*", "cache:"));
        assert!(!glob_match("cache:*", "other:abc"));
    }

    #[test]
    fn test_glob_exact() {
        assert!(glob_match("rate_limit:1.2.3.4", "rate_limit:1.2.3.4"));
        assert!(!glob_match("rate_limit:1.2.3.4", "rate_limit:1.2.3.45"));
    }

    #[test]
    fn test_glob_question_mark() {
        assert!(glob_match("user:?", "user:7"));
        assert!(!glob_match("user:?", "user:42"));
    }

    #[test]
    fn test_glob_star_in_middle() {
        assert!(glob_match("cache:*:reviews", "cache:product:42:reviews"));
        assert!(!glob_match("cache:*:reviews", "cache:product:42:cart"));
    }

    #[test]
    fn test_glob_escape() {
        assert!(glob_match(r"literal\*", "literal*"));
        assert!(!glob_match(r"literal\*", "literalx"));
    }

    #[test]
    fn test_expiry_policy_parse() {
        assert_eq!("rolling".parse::<ExpiryPolicy>(), Ok(ExpiryPolicy::Rolling));
        assert_eq!(" Fixed ".parse::<ExpiryPolicy>(), Ok(ExpiryPolicy::Fixed));
        assert!("sliding".parse::<ExpiryPolicy>().is_err());
        assert_eq!(ExpiryPolicy::default(), ExpiryPolicy::Rolling);
    }
}
