//! Redis-backed counter and cache store.
//!
//! # Commands
//!
//! | Operation           | Redis                                              |
//! |---------------------|----------------------------------------------------|
//! | `increment`         | `MULTI; INCR key; EXPIRE key secs [NX]; EXEC`      |
//! | `ttl`               | `TTL key`                                          |
//! | `get` / `set`       | `GET key` / `SET key value EX secs`                |
//! | `delete_by_pattern` | `SCAN cursor MATCH pattern COUNT n` + `DEL keys…`  |
//! | `ping`              | `PING`                                             |
//!
//! `ExpiryPolicy::Fixed` issues `EXPIRE … NX`, which requires Redis 7.0+.
//!
//! # Connections
//!
//! All clones of a [`RedisConnection`] share one multiplexed
//! [`ConnectionManager`], opened on first use and re-established by the
//! manager after a failure. The store and the user directory are handed the
//! same handle, so a process keeps a single socket to Redis.
//!
//! No client-side timeouts are configured: a hung server stalls the calling
//! request until the connection itself errors.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::RedisResult;
use redis::aio::ConnectionManager;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{CacheStore, CounterStore, ExpiryPolicy, StoreResult};

/// Keys fetched per `SCAN` round trip during pattern deletion.
const SCAN_BATCH: usize = 500;

/// Lazily opened Redis connection shared by every clone.
#[derive(Clone)]
pub struct RedisConnection {
    client: redis::Client,
    manager: Arc<OnceCell<ConnectionManager>>,
}

impl RedisConnection {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            manager: Arc::new(OnceCell::new()),
        }
    }

    /// A handle onto the shared connection. Cheap to clone; commands from
    /// every handle are pipelined over the same socket.
    pub async fn get(&self) -> RedisResult<ConnectionManager> {
        self.manager
            .get_or_try_init(|| async {
                let manager = ConnectionManager::new(self.client.clone()).await?;
                info!("Redis connection established");
                Ok::<_, redis::RedisError>(manager)
            })
            .await
            .cloned()
    }

    pub fn shares_with(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.manager, &other.manager)
    }
}

/// Counter and cache store backed by a single Redis deployment.
#[derive(Clone)]
pub struct RedisStore {
    connection: RedisConnection,
}

impl RedisStore {
    /// Create a store from a `redis://` URL. Does not connect yet.
    pub fn open(url: &str) -> StoreResult<Self> {
        Ok(Self::new(RedisConnection::new(redis::Client::open(url)?)))
    }

    pub fn new(connection: RedisConnection) -> Self {
        Self { connection }
    }

    /// The shared connection, for other Redis-backed components.
    pub fn shared_connection(&self) -> RedisConnection {
        self.connection.clone()
    }

    async fn connection(&self) -> StoreResult<ConnectionManager> {
        Ok(self.connection.get().await?)
    }
}

/// Redis expiry is whole seconds; anything shorter rounds up to one.
fn expiry_secs(window: Duration) -> i64 {
    i64::try_from(window.as_secs().max(1)).unwrap_or(i64::MAX)
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        policy: ExpiryPolicy,
    ) -> StoreResult<u64> {
        let mut conn = self.connection().await?;
        let secs = expiry_secs(window);

        let mut pipe = redis::pipe();
        pipe.atomic().incr(key, 1u64);
        match policy {
            ExpiryPolicy::Rolling => {
                pipe.expire(key, secs).ignore();
            }
            ExpiryPolicy::Fixed => {
                pipe.cmd("EXPIRE").arg(key).arg(secs).arg("NX").ignore();
            }
        }

        let (count,): (u64,) = pipe.query_async(&mut conn).await?;
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let mut conn = self.connection().await?;
        // -2: missing key, -1: no expiry
        let secs: i64 = conn.ttl(key).await?;
        Ok(u64::try_from(secs)
            .ok()
            .filter(|s| *s > 0)
            .map(Duration::from_secs))
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let mut conn = self.connection().await?;
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let secs = u64::try_from(expiry_secs(ttl)).unwrap_or(1);
        let _: () = conn.set_ex(key, value, secs).await?;
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> StoreResult<u64> {
        let mut conn = self.connection().await?;
        let mut cursor: u64 = 0;
        let mut deleted: u64 = 0;

        loop {
            let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let removed: u64 = conn.del(&keys).await?;
                deleted += removed;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        debug!(pattern, deleted, "Deleted keys by pattern");
        Ok(deleted)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_secs_rounds_up_subsecond() {
        assert_eq!(expiry_secs(Duration::from_millis(10)), 1);
        assert_eq!(expiry_secs(Duration::ZERO), 1);
    }

    #[test]
    fn test_expiry_secs_whole_seconds() {
        assert_eq!(expiry_secs(Duration::from_secs(60)), 60);
    }

    #[test]
    fn test_open_rejects_bad_url() {
        assert!(RedisStore::open("not a url").is_err());
    }

    #[test]
    fn test_open_accepts_redis_url() {
        assert!(RedisStore::open("redis://127.0.0.1:6379").is_ok());
    }

    #[test]
    fn test_clones_share_one_connection() {
        let store = RedisStore::open("redis://127.0.0.1:6379").unwrap();
        let copy = store.clone();
        assert!(store.shared_connection().shares_with(&copy.shared_connection()));

        let separate = RedisStore::open("redis://127.0.0.1:6379").unwrap();
        assert!(!store.shared_connection().shares_with(&separate.shared_connection()));
    }
}
