//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with sensible defaults
//! for development. In production, configure via environment variables or a `.env` file.
//! `JWT_SECRET` is the only required variable.
//!
//! # Admission Control
//!
//! - `RATE_LIMIT_REQUESTS`: Requests admitted per client per window (default: 100, 0 = disabled)
//! - `RATE_LIMIT_WINDOW_SECS`: Counter window (default: 60)
//! - `RATE_LIMIT_KEY_PREFIX`: Counter key prefix (default: `rate_limit:`)
//! - `RATE_LIMIT_EXPIRY`: `rolling` (default) or `fixed`
//!
//! # Response Cache
//!
//! - `CACHE_TTL_SECS`: Entry time to live (default: 60)
//! - `CACHE_NAMESPACE`: Key prefix, also the invalidation scope (default: `cache:`)
//! - `CACHE_MAX_ENTRY_BYTES`: Larger bodies are served but not stored (default: 1MB)
//!
//! # Request Logging
//!
//! - `LOG_INCLUDE_PATHS`: Comma-separated path prefixes to log (default: all)
//! - `LOG_EXCLUDE_PATHS`: Comma-separated path prefixes to skip (default: `/health,/ready`)
//! - `LOG_FORMAT`: `text` (default) or `json`

use std::env;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::store::ExpiryPolicy;

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Maximum request body size in bytes (default: 1MB)
    pub max_request_body_size: usize,

    // =========================================================================
    // Store Configuration
    // =========================================================================
    /// Redis URL for counters, cache entries and user records
    /// Default: "redis://127.0.0.1:6379"
    pub redis_url: String,

    // =========================================================================
    // Authentication Configuration
    // =========================================================================
    /// HS256 secret used to validate bearer tokens
    pub jwt_secret: String,

    /// Cookie carrying the bearer token (default: "auth_token")
    pub auth_cookie_name: String,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Requests admitted per client per window (default: 100)
    /// Set to 0 to disable rate limiting
    pub rate_limit_requests: u32,

    /// Counter window (default: 60 seconds)
    pub rate_limit_window: Duration,

    /// Prefix prepended to the client IP to form the counter key
    pub rate_limit_key_prefix: String,

    /// Whether each increment refreshes the counter expiry
    pub rate_limit_expiry: ExpiryPolicy,

    /// Trusted proxy CIDR ranges. Forwarding headers are only honoured when
    /// the socket peer is inside one of them.
    ///
    /// Format: Comma-separated CIDR notation (e.g., "10.0.0.0/8,172.16.0.0/12")
    /// Default: Empty (trust forwarding headers from any peer)
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // Response Cache Configuration
    // =========================================================================
    /// Time to live of cached responses (default: 60 seconds)
    pub cache_ttl: Duration,

    /// Key namespace for cached responses (default: "cache:")
    pub cache_namespace: String,

    /// Largest body stored in the cache (default: 1MB)
    pub cache_max_entry_bytes: usize,

    // =========================================================================
    // HTTP Configuration
    // =========================================================================
    /// Comma-separated list of allowed CORS origins
    /// Use "*" to allow all origins (not recommended for production)
    pub cors_allowed_origins: Vec<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Emit JSON log lines instead of human-readable text
    pub log_json: bool,

    /// Path prefixes selected for request logging (empty = all)
    pub log_include_paths: Vec<String>,

    /// Path prefixes never request-logged
    pub log_exclude_paths: Vec<String>,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if `JWT_SECRET` is missing or any value
    /// fails to parse or validate.
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            max_request_body_size: Self::parse_env("MAX_REQUEST_BODY_SIZE", 1024 * 1024)?,

            // Store
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),

            // Authentication
            jwt_secret: env::var("JWT_SECRET").map_err(|_| {
                AppError::ConfigError("JWT_SECRET must be set".to_string())
            })?,
            auth_cookie_name: env::var("AUTH_COOKIE_NAME")
                .unwrap_or_else(|_| "auth_token".to_string()),

            // Rate limiting
            rate_limit_requests: Self::parse_env("RATE_LIMIT_REQUESTS", 100)?,
            rate_limit_window: Duration::from_secs(Self::parse_env("RATE_LIMIT_WINDOW_SECS", 60)?),
            rate_limit_key_prefix: env::var("RATE_LIMIT_KEY_PREFIX")
                .unwrap_or_else(|_| "rate_limit:".to_string()),
            rate_limit_expiry: Self::parse_env("RATE_LIMIT_EXPIRY", ExpiryPolicy::Rolling)?,
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", ""),

            // Response cache
            cache_ttl: Duration::from_secs(Self::parse_env("CACHE_TTL_SECS", 60)?),
            cache_namespace: env::var("CACHE_NAMESPACE").unwrap_or_else(|_| "cache:".to_string()),
            cache_max_entry_bytes: Self::parse_env("CACHE_MAX_ENTRY_BYTES", 1024 * 1024)?,

            // HTTP
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", "*"),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),
            log_include_paths: Self::parse_path_list("LOG_INCLUDE_PATHS", ""),
            log_exclude_paths: Self::parse_path_list("LOG_EXCLUDE_PATHS", "/health,/ready"),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    fn validate(&self) -> AppResult<()> {
        if self.jwt_secret.trim().is_empty() {
            return Err(AppError::ConfigError(
                "JWT_SECRET must not be empty".to_string(),
            ));
        }

        if self.auth_cookie_name.is_empty() {
            return Err(AppError::ConfigError(
                "AUTH_COOKIE_NAME must not be empty".to_string(),
            ));
        }

        // Redis expiry has whole-second resolution
        if self.rate_limiting_enabled() && self.rate_limit_window.is_zero() {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_WINDOW_SECS must be greater than 0".to_string(),
            ));
        }

        if self.cache_ttl.is_zero() {
            return Err(AppError::ConfigError(
                "CACHE_TTL_SECS must be greater than 0".to_string(),
            ));
        }

        if self.cache_namespace.is_empty() {
            return Err(AppError::ConfigError(
                "CACHE_NAMESPACE must not be empty".to_string(),
            ));
        }

        if self.max_request_body_size == 0 {
            return Err(AppError::ConfigError(
                "MAX_REQUEST_BODY_SIZE must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_requests > 0
    }

    /// Glob pattern covering every cached response.
    pub fn cache_invalidation_pattern(&self) -> String {
        format!("{}*", self.cache_namespace)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        self.metrics_enabled()
            .then(|| std::net::SocketAddr::from(([0, 0, 0, 0], self.metrics_port)))
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, dropping blanks.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        split_list(&env::var(name).unwrap_or_else(|_| default.to_string()))
    }

    /// Like [`Config::parse_list`] but keeps only absolute paths.
    fn parse_path_list(name: &str, default: &str) -> Vec<String> {
        Self::parse_list(name, default)
            .into_iter()
            .filter(|p| p.starts_with('/'))
            .collect()
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Default configuration for testing and development.
///
/// Production deployments should use `Config::from_env()` instead.
impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_request_body_size: 1024 * 1024,
            redis_url: "redis://127.0.0.1:6379".to_string(),
            jwt_secret: "dev-secret-change-me".to_string(),
            auth_cookie_name: "auth_token".to_string(),
            rate_limit_requests: 100,
            rate_limit_window: Duration::from_secs(60),
            rate_limit_key_prefix: "rate_limit:".to_string(),
            rate_limit_expiry: ExpiryPolicy::Rolling,
            trusted_proxies: vec![],
            cache_ttl: Duration::from_secs(60),
            cache_namespace: "cache:".to_string(),
            cache_max_entry_bytes: 1024 * 1024,
            cors_allowed_origins: vec!["*".to_string()],
            log_level: "info".to_string(),
            log_json: false,
            log_include_paths: vec![],
            log_exclude_paths: vec!["/health".to_string(), "/ready".to_string()],
            metrics_port: 9090,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        assert_eq!(config.port, 3000);
        assert_eq!(config.rate_limit_requests, 100);
        assert_eq!(config.rate_limit_window, Duration::from_secs(60));
        assert_eq!(config.rate_limit_expiry, ExpiryPolicy::Rolling);
        assert_eq!(config.auth_cookie_name, "auth_token");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_server_addr_format() {
        let config = Config {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Config::default()
        };

        assert_eq!(config.server_addr(), "127.0.0.1:8080");
    }

    #[test]
    fn test_rate_limiting_enabled() {
        assert!(Config::default().rate_limiting_enabled());

        let config = Config {
            rate_limit_requests: 0,
            ..Config::default()
        };
        assert!(!config.rate_limiting_enabled());
    }

    #[test]
    fn test_zero_window_allowed_when_limiting_disabled() {
        let config = Config {
            rate_limit_requests: 0,
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_window() {
        let config = Config {
            rate_limit_window: Duration::ZERO,
            ..Config::default()
        };

        let result = config.validate();
        assert!(result.unwrap_err().to_string().contains("RATE_LIMIT_WINDOW_SECS"));
    }

    #[test]
    fn test_validate_empty_secret() {
        let config = Config {
            jwt_secret: "  ".to_string(),
            ..Config::default()
        };

        assert!(config.validate().unwrap_err().to_string().contains("JWT_SECRET"));
    }

    #[test]
    fn test_validate_zero_cache_ttl() {
        let config = Config {
            cache_ttl: Duration::ZERO,
            ..Config::default()
        };

        assert!(config.validate().unwrap_err().to_string().contains("CACHE_TTL_SECS"));
    }

    #[test]
    fn test_cache_invalidation_pattern() {
        let config = Config {
            cache_namespace: "cache:catalog:".to_string(),
            ..Config::default()
        };
        assert_eq!(config.cache_invalidation_pattern(), "cache:catalog:*");
    }

    #[test]
    fn test_metrics_addr_disabled() {
        let config = Config {
            metrics_port: 0,
            ..Config::default()
        };
        assert!(config.metrics_addr().is_none());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(
            split_list(" /health , ,/ready"),
            vec!["/health".to_string(), "/ready".to_string()]
        );
        assert!(split_list("").is_empty());
    }
}
