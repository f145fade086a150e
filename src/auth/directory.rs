//! User directories implementing [`UserResolver`].

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use redis::AsyncCommands;

use super::{AuthenticatedUser, LookupError, UserResolver};
use crate::store::RedisConnection;

/// Key prefix for user records in Redis.
pub const USER_KEY_PREFIX: &str = "user:";

/// Reads user records stored as JSON under `user:{id}`.
///
/// The records are written by the account service that owns the user
/// collection; this side only reads.
#[derive(Clone)]
pub struct RedisUserDirectory {
    connection: RedisConnection,
}

impl RedisUserDirectory {
    /// Reads through `connection`, normally the one the store already holds.
    pub fn new(connection: RedisConnection) -> Self {
        Self { connection }
    }

    pub fn user_key(id: &str) -> String {
        format!("{USER_KEY_PREFIX}{id}")
    }
}

#[async_trait]
impl UserResolver for RedisUserDirectory {
    async fn get_by_id(&self, id: &str) -> Result<AuthenticatedUser, LookupError> {
        let mut conn = self
            .connection
            .get()
            .await
            .map_err(|e| LookupError::Backend(e.to_string()))?;

        let raw: Option<String> = conn
            .get(Self::user_key(id))
            .await
            .map_err(|e| LookupError::Backend(e.to_string()))?;

        let raw = raw.ok_or_else(|| LookupError::NotFound(id.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| LookupError::Malformed(id.to_string(), e.to_string()))
    }
}

/// Process-local directory for tests and single-instance setups.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserDirectory {
    users: Arc<DashMap<String, AuthenticatedUser>>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: AuthenticatedUser) {
        self.users.insert(user.id.clone(), user);
    }

    pub fn remove(&self, id: &str) {
        self.users.remove(id);
    }
}

impl FromIterator<AuthenticatedUser> for MemoryUserDirectory {
    fn from_iter<I: IntoIterator<Item = AuthenticatedUser>>(iter: I) -> Self {
        let directory = Self::new();
        for user in iter {
            directory.insert(user);
        }
        directory
    }
}

#[async_trait]
impl UserResolver for MemoryUserDirectory {
    async fn get_by_id(&self, id: &str) -> Result<AuthenticatedUser, LookupError> {
        self.users
            .get(id)
            .map(|u| u.value().clone())
            .ok_or_else(|| LookupError::NotFound(id.to_string()))
    }
}
