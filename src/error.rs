use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::StoreError;

/// Application-wide error types with appropriate HTTP status codes.
///
/// Every terminal rejection in the pipeline and every handler failure is
/// rendered through this type, so clients always receive the same
/// [`ErrorBody`] shape and can only tell failures apart by status code,
/// `code` and headers.
///
/// Rendering does not log. The stage that decides to reject logs the
/// rejection once, with request context (see [`crate::middleware::reject`]).
#[derive(Error, Debug)]
pub enum AppError {
    /// Credential missing, malformed, expired or rejected.
    #[error("Unauthorized: {message}")]
    Unauthorized { code: &'static str, message: String },

    /// Authenticated, but lacking the required role.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Rate limit exceeded")]
    RateLimited,

    /// Counter/cache store failure on a fail-closed path.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Validated token referencing a subject that cannot be resolved.
    #[error("User lookup failed: {0}")]
    UserLookup(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// JSON error envelope shared by every failure path.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl AppError {
    pub fn unauthorized(code: &'static str, message: impl Into<String>) -> Self {
        Self::Unauthorized {
            code,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Unauthorized { .. } => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Store(_) | AppError::UserLookup(_) | AppError::ConfigError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Stable machine-readable code for the envelope and for log fields.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Unauthorized { code, .. } => *code,
            AppError::Forbidden(_) => "forbidden",
            AppError::RateLimited => "rate_limited",
            AppError::Store(_) => "store_unavailable",
            AppError::UserLookup(_) => "user_lookup_failed",
            AppError::ConfigError(_) => "config_error",
        }
    }

    /// Message safe to show to clients. Infrastructure details stay in logs.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Unauthorized { message, .. } => message.clone(),
            AppError::Forbidden(msg) => msg.clone(),
            AppError::RateLimited => "Too many requests. Please retry later.".to_string(),
            AppError::Store(_) | AppError::UserLookup(_) => {
                "An internal error occurred. Please try again later.".to_string()
            }
            AppError::ConfigError(_) => "Service configuration error.".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.public_message(),
            code: Some(self.code().to_string()),
        };

        (self.status(), axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
