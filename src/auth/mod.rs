//! Authentication capabilities consumed by the auth gates.
//!
//! The gates in [`crate::middleware::auth`] only depend on two narrow traits:
//!
//! - [`TokenValidator`]: bearer token string → [`Claims`]
//! - [`UserResolver`]: subject identifier → [`AuthenticatedUser`]
//!
//! Production wiring uses [`JwtValidator`] and [`RedisUserDirectory`]; tests
//! substitute [`MemoryUserDirectory`] or their own stubs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod directory;
pub mod jwt;

pub use directory::{MemoryUserDirectory, RedisUserDirectory};
pub use jwt::{JwtValidator, issue_token};

/// Role value that passes the admin gate.
pub const ADMIN_ROLE: &str = "admin";

/// Claims carried by a validated bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id)
    pub sub: String,
    /// Expiry, unix seconds
    pub exp: i64,
    /// Issued at, unix seconds
    pub iat: i64,
}

/// User record resolved for an authenticated request.
///
/// Inserted into request extensions by the auth gates and handed to handlers
/// through [`crate::middleware::CurrentUser`] / [`crate::middleware::MaybeUser`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub role: String,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == ADMIN_ROLE
    }
}

/// Why a token failed validation.
#[derive(Error, Debug)]
pub enum TokenError {
    #[error("token expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Why a subject could not be resolved to a user.
#[derive(Error, Debug)]
pub enum LookupError {
    #[error("user {0} not found")]
    NotFound(String),

    #[error("user record for {0} is malformed: {1}")]
    Malformed(String, String),

    #[error("user directory unavailable: {0}")]
    Backend(String),
}

/// Validates a bearer token against a secret bound at construction.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<Claims, TokenError>;
}

/// Resolves a subject identifier to a full user record.
#[async_trait]
pub trait UserResolver: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<AuthenticatedUser, LookupError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn user(role: &str) -> AuthenticatedUser {
        AuthenticatedUser {
            id: "u-1".to_string(),
            email: "shopper@example.com".to_string(),
            name: "Shopper".to_string(),
            role: role.to_string(),
        }
    }

    #[test]
    fn test_is_admin() {
        assert!(user("admin").is_admin());
        assert!(!user("user").is_admin());
        assert!(!user("Admin").is_admin());
    }

    #[test]
    fn test_user_deserializes_without_name() {
        let json = r#"{"id":"7","email":"a@b.c","role":"user"}"#;
        let parsed: AuthenticatedUser = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.id, "7");
        assert!(parsed.name.is_empty());
    }
}
