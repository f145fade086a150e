use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::AuthenticatedUser;

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process can serve requests
    pub status: String,
    /// Application version
    pub version: String,
    /// Response timestamp
    pub timestamp: DateTime<Utc>,
}

/// Readiness probe response.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    /// Whether the counter/cache store answered a ping
    pub store_reachable: bool,
}

/// Service statistics and effective pipeline settings.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub version: String,
    pub uptime_seconds: u64,
    /// `None` when rate limiting is disabled
    pub rate_limit: Option<RateLimitSettingsInfo>,
    pub cache: CacheSettingsInfo,
    /// When this body was rendered. A replayed cache hit keeps the original value.
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RateLimitSettingsInfo {
    pub limit: u32,
    pub window_seconds: u64,
    pub expiry: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CacheSettingsInfo {
    pub ttl_seconds: u64,
    pub namespace: String,
}

/// Response for the optionally authenticated session endpoint.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<AuthenticatedUser>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_session_omits_user() {
        let json = serde_json::to_value(SessionResponse {
            authenticated: false,
            user: None,
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({ "authenticated": false }));
    }
}
