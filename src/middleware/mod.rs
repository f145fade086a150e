//! Request admission and caching pipeline.
//!
//! Every stage is a tower [`Layer`](tower::Layer) with a `Clone` service that
//! clones its inner service per call, so stages compose with axum's
//! `Router::layer` / `route_layer` without handler awareness.
//!
//! # Architecture
//!
//! ```text
//! Request → RequestId → SecurityHeaders → RequestLogger → RateLimit → ResponseCache → Auth → Handler
//!              ↓              ↓                 ↓              ↓             ↓           ↓
//!        X-Request-Id    hardening hdrs    one log line   429 / 500    replay on hit  401/403/500
//! ```
//!
//! [`CacheInvalidateLayer`] is attached to mutating routes and fires after the
//! handler returns.
//!
//! # Rejections
//!
//! A stage that short-circuits renders the shared JSON error envelope through
//! [`reject`], which also writes the single log record for that failure.
//! Downstream stages and handlers never observe rejected requests.

use std::borrow::Cow;

use axum::body::Body;
use axum::http::{Request, Response, header};
use axum::response::IntoResponse;
use tracing::{error, warn};

use crate::error::AppError;

pub mod auth;
pub mod cache;
pub mod ip;
pub mod logging;
pub mod rate_limit;
pub mod request_id;
pub mod security_headers;

pub use auth::{AuthLayer, AuthMode, CurrentUser, MaybeUser};
pub use cache::{CacheInvalidateLayer, CachedResponse, ResponseCacheLayer, cache_key};
pub use ip::{CidrRange, TrustedProxyConfig, UNKNOWN_IP, client_ip};
pub use logging::{LogFilter, Outcome, RequestLoggerLayer};
pub use rate_limit::{Decision, RateLimitLayer, RateLimiter};
pub use request_id::{REQUEST_ID_HEADER, RequestIdLayer, UNASSIGNED_REQUEST_ID};
pub use security_headers::SecurityHeadersLayer;

/// Per-request facts captured once at the edge of the pipeline.
///
/// Inserted into request extensions by [`RequestIdLayer`]; every later stage
/// reads it instead of re-parsing headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub request_id: String,
    pub client_ip: String,
    pub user_agent: String,
    pub referrer: String,
}

impl RequestContext {
    /// Capture context from a request's headers and peer address.
    pub fn capture<B>(req: &Request<B>, request_id: String, trusted: &TrustedProxyConfig) -> Self {
        Self {
            request_id,
            client_ip: client_ip(req, trusted).into_owned(),
            user_agent: header_str(req, header::USER_AGENT.as_str()).into_owned(),
            referrer: header_str(req, header::REFERER.as_str()).into_owned(),
        }
    }

    /// Context attached by [`RequestIdLayer`], or one captured on the spot
    /// (id [`UNASSIGNED_REQUEST_ID`], every forwarding header trusted) when a
    /// stage runs without it.
    pub fn of<B>(req: &Request<B>) -> Self {
        req.extensions().get::<Self>().cloned().unwrap_or_else(|| {
            Self::capture(
                req,
                UNASSIGNED_REQUEST_ID.to_string(),
                &TrustedProxyConfig::default(),
            )
        })
    }
}

fn header_str<'a, B>(req: &'a Request<B>, name: &str) -> Cow<'a, str> {
    req.headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map_or(Cow::Borrowed(""), Cow::Borrowed)
}

/// Render a terminal rejection and log it once.
///
/// 5xx failures are logged at `error`, everything else at `warn`.
pub fn reject(operation: &'static str, ctx: &RequestContext, err: AppError) -> Response<Body> {
    let status = err.status();

    if status.is_server_error() {
        error!(
            operation,
            code = err.code(),
            error = %err,
            status = status.as_u16(),
            client_ip = %ctx.client_ip,
            user_agent = %ctx.user_agent,
            request_id = %ctx.request_id,
            "Request rejected"
        );
    } else {
        warn!(
            operation,
            code = err.code(),
            error = %err,
            status = status.as_u16(),
            client_ip = %ctx.client_ip,
            user_agent = %ctx.user_agent,
            request_id = %ctx.request_id,
            "Request rejected"
        );
    }

    err.into_response()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn test_capture_reads_headers() {
        let req = Request::builder()
            .header("user-agent", "curl/8.0")
            .header("referer", "https://shop.example/cart")
            .header("x-real-ip", "9.9.9.9")
            .body(Body::empty())
            .unwrap();

        let ctx = RequestContext::capture(&req, "rid".into(), &TrustedProxyConfig::default());
        assert_eq!(ctx.client_ip, "9.9.9.9");
        assert_eq!(ctx.user_agent, "curl/8.0");
        assert_eq!(ctx.referrer, "https://shop.example/cart");
    }

    #[test]
    fn test_of_prefers_extension() {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        let ctx = RequestContext {
            request_id: "abc".into(),
            client_ip: "1.2.3.4".into(),
            user_agent: String::new(),
            referrer: String::new(),
        };
        req.extensions_mut().insert(ctx.clone());

        assert_eq!(RequestContext::of(&req), ctx);
    }

    #[test]
    fn test_of_without_extension() {
        let req = Request::builder().body(Body::empty()).unwrap();
        let ctx = RequestContext::of(&req);
        assert_eq!(ctx.client_ip, UNKNOWN_IP);
        assert_eq!(ctx.request_id, UNASSIGNED_REQUEST_ID);
        assert_ne!(ctx.request_id, UNKNOWN_IP);
        assert!(ctx.user_agent.is_empty());
    }

    #[test]
    fn test_reject_uses_error_status() {
        let req = Request::builder().body(Body::empty()).unwrap();
        let response = reject("test", &RequestContext::of(&req), AppError::RateLimited);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    }
}
