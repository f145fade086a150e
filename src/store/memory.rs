//! In-memory counter and cache store.
//!
//! An interchangeable implementation of [`CounterStore`] and [`CacheStore`]
//! for tests and single-instance deployments. Each key is updated under its
//! DashMap shard lock, which gives the same per-key atomicity the rate limiter
//! relies on from Redis `MULTI`/`EXEC`.
//!
//! Expiry uses the tokio clock, so tests can drive it with
//! `tokio::time::pause()` and `tokio::time::advance()`.
//!
//! Expired keys are dropped lazily on read and by a sweep that the first
//! write after each [`SWEEP_INTERVAL`] runs over the whole map, so one-off
//! client keys do not accumulate.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use super::{CacheStore, CounterStore, ExpiryPolicy, StoreResult, glob_match};

/// Minimum time between full sweeps of expired keys.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
enum Value {
    Counter(u64),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Process-local store backed by a sharded concurrent map.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Entry>>,
    /// Reference point for `next_sweep_ms`
    created_at: Instant,
    /// Milliseconds after `created_at` at which the next sweep is due
    next_sweep_ms: Arc<AtomicU64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            entries: Arc::default(),
            created_at: Instant::now(),
            next_sweep_ms: Arc::new(AtomicU64::new(millis(SWEEP_INTERVAL))),
        }
    }
}

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired key, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Run [`purge_expired`](Self::purge_expired) if a sweep is due. Only one
    /// caller wins the slot when several writes race past the deadline.
    ///
    /// Must not be called while holding a map guard.
    fn sweep_if_due(&self, now: Instant) {
        let elapsed = millis(now.duration_since(self.created_at));
        let due = self.next_sweep_ms.load(Ordering::Relaxed);
        if elapsed < due {
            return;
        }
        let next = elapsed.saturating_add(millis(SWEEP_INTERVAL));
        if self
            .next_sweep_ms
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            let removed = self.purge_expired();
            debug!(removed, "Swept expired keys");
        }
    }

    /// Number of live (unexpired) keys.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` exists and has not expired.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.entries.get(key).is_some_and(|e| !e.is_expired(now))
    }
}

#[async_trait]
impl CounterStore for MemoryStore {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
        policy: ExpiryPolicy,
    ) -> StoreResult<u64> {
        let now = Instant::now();
        let count = self.increment_entry(key, window, policy, now);
        self.sweep_if_due(now);
        Ok(count)
    }

    async fn ttl(&self, key: &str) -> StoreResult<Option<Duration>> {
        let now = Instant::now();
        Ok(self.entries.get(key).and_then(|e| {
            e.expires_at
                .filter(|at| *at > now)
                .map(|at| at.duration_since(now))
        }))
    }
}

impl MemoryStore {
    fn increment_entry(
        &self,
        key: &str,
        window: Duration,
        policy: ExpiryPolicy,
        now: Instant,
    ) -> u64 {
        let mut entry = self.entries.entry(key.to_string()).or_insert(Entry {
            value: Value::Counter(0),
            expires_at: None,
        });

        // An expired key or a non-counter value behaves like a missing key, as INCR
        // on a freshly expired Redis key would.
        if entry.is_expired(now) || !matches!(entry.value, Value::Counter(_)) {
            *entry = Entry {
                value: Value::Counter(0),
                expires_at: None,
            };
        }

        let count = match &mut entry.value {
            Value::Counter(n) => {
                *n += 1;
                *n
            }
            Value::Bytes(_) => 1,
        };

        match policy {
            ExpiryPolicy::Rolling => entry.expires_at = Some(now + window),
            ExpiryPolicy::Fixed => {
                if entry.expires_at.is_none() {
                    entry.expires_at = Some(now + window);
                }
            }
        }

        count
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        let now = Instant::now();
        let expired = match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.is_expired(now) => true,
            Some(entry) => {
                return Ok(match &entry.value {
                    Value::Bytes(b) => Some(b.clone()),
                    Value::Counter(n) => Some(n.to_string().into_bytes()),
                });
            }
        };

        if expired {
            self.entries.remove_if(key, |_, e| e.is_expired(now));
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> StoreResult<()> {
        let now = Instant::now();
        self.entries.insert(
            key.to_string(),
            Entry {
                value: Value::Bytes(value.to_vec()),
                expires_at: Some(now + ttl),
            },
        );
        self.sweep_if_due(now);
        Ok(())
    }

    async fn delete_by_pattern(&self, pattern: &str) -> StoreResult<u64> {
        let now = Instant::now();
        let mut deleted = 0u64;
        self.entries.retain(|key, entry| {
            if glob_match(pattern, key) {
                if !entry.is_expired(now) {
                    deleted += 1;
                }
                false
            } else {
                true
            }
        });
        Ok(deleted)
    }
}
