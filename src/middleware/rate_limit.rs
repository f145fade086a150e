//! Distributed window-counter admission control.
//!
//! # Algorithm
//!
//! For each client key (`{prefix}{client_ip}`, default prefix `rate_limit:`)
//! the limiter issues one atomic batch against the [`CounterStore`]: increment
//! the counter and apply the window as its expiry. The post-increment count
//! decides the request:
//!
//! - `count <= limit`: admitted, forwarded downstream
//! - `count > limit`: rejected with 429, downstream never runs
//!
//! Counting correctness across instances comes entirely from the store's
//! atomicity; nothing is kept in process memory.
//!
//! # Expiry
//!
//! With [`ExpiryPolicy::Rolling`] (default) every increment pushes the expiry
//! out to a full window again, so a client sending steadily faster than one
//! request per window never sees its counter reset. [`ExpiryPolicy::Fixed`]
//! only sets expiry on the first increment of a window.
//!
//! # Response Headers
//!
//! Set on every response that passed through the limiter, admitted or not:
//! - `X-RateLimit-Limit`: configured limit
//! - `X-RateLimit-Remaining`: `max(0, limit - count)`
//! - `X-RateLimit-Reset`: unix seconds when the counter expires
//!
//! 429 responses also carry `Retry-After`.
//!
//! # Store Failures
//!
//! An error from the increment batch rejects the request with 500 and no
//! rate-limit headers. An unreachable limiter must not admit unlimited
//! traffic. A failed TTL lookup only affects the reset header, which then
//! falls back to now + window.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderValue, Request, Response, header};
use chrono::Utc;
use thiserror::Error;
use tower::{Layer, Service};
use tracing::debug;

use super::{RequestContext, reject};
use crate::error::AppError;
use crate::metrics;
use crate::store::{CounterStore, ExpiryPolicy, StoreError};

pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";

/// Default counter key prefix.
pub const DEFAULT_KEY_PREFIX: &str = "rate_limit:";

/// Error type for rate limit layer configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("rate limit must be greater than 0; omit the layer for no limiting")]
    ZeroLimit,
    #[error("rate limit window must be at least one second")]
    ZeroWindow,
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub admitted: bool,
    pub limit: u32,
    pub remaining: u64,
    /// Unix seconds at which the current window's counter expires.
    pub reset_at: i64,
}

impl Decision {
    pub fn apply_headers(&self, headers: &mut HeaderMap) {
        headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(self.limit));
        headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(self.remaining));
        headers.insert(X_RATELIMIT_RESET, HeaderValue::from(self.reset_at));
    }

    /// Whole seconds until reset, at least 1.
    pub fn retry_after_secs(&self, now: i64) -> i64 {
        (self.reset_at - now).max(1)
    }
}

/// Counter-store backed limiter, independent of HTTP.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limit: u32,
    window: Duration,
    key_prefix: Arc<str>,
    policy: ExpiryPolicy,
}

impl RateLimiter {
    /// # Errors
    ///
    /// `ZeroLimit` for a zero limit, `ZeroWindow` for a window under one second.
    pub fn new(
        store: Arc<dyn CounterStore>,
        limit: u32,
        window: Duration,
    ) -> Result<Self, RateLimitError> {
        if limit == 0 {
            return Err(RateLimitError::ZeroLimit);
        }
        if window < Duration::from_secs(1) {
            return Err(RateLimitError::ZeroWindow);
        }

        Ok(Self {
            store,
            limit,
            window,
            key_prefix: Arc::from(DEFAULT_KEY_PREFIX),
            policy: ExpiryPolicy::default(),
        })
    }

    pub fn key(&self, client: &str) -> String {
        format!("{}{client}", self.key_prefix)
    }

    /// Count one request for `client` and decide whether it is admitted.
    ///
    /// # Errors
    ///
    /// Propagates the store error from the increment batch. Callers must
    /// treat that as a rejection.
    pub async fn check(&self, client: &str) -> Result<Decision, StoreError> {
        let key = self.key(client);
        let count = self.store.increment(&key, self.window, self.policy).await?;

        let ttl = match self.store.ttl(&key).await {
            Ok(Some(ttl)) => ttl,
            Ok(None) => self.window,
            Err(e) => {
                debug!(key = %key, error = %e, "TTL lookup failed, using full window for reset");
                self.window
            }
        };

        // Round partial seconds up so the reset is never reported early
        let ttl_secs = ttl.as_secs() + u64::from(ttl.subsec_nanos() > 0);
        let reset_at = Utc::now()
            .timestamp()
            .saturating_add(i64::try_from(ttl_secs).unwrap_or(i64::MAX));

        Ok(Decision {
            admitted: count <= u64::from(self.limit),
            limit: self.limit,
            remaining: u64::from(self.limit).saturating_sub(count),
            reset_at,
        })
    }
}

/// Rate limiting layer for Tower middleware stack.
///
/// # Example
///
/// ```rust,ignore
/// let layer = RateLimitLayer::new(store, 100, Duration::from_secs(60))?
///     .with_expiry_policy(ExpiryPolicy::Fixed);
/// let app = Router::new()
///     .route("/api", get(handler))
///     .layer(layer);
/// ```
#[derive(Clone)]
pub struct RateLimitLayer {
    limiter: RateLimiter,
}

impl RateLimitLayer {
    /// # Errors
    ///
    /// See [`RateLimiter::new`].
    pub fn new(
        store: Arc<dyn CounterStore>,
        limit: u32,
        window: Duration,
    ) -> Result<Self, RateLimitError> {
        Ok(Self {
            limiter: RateLimiter::new(store, limit, window)?,
        })
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.limiter.key_prefix = Arc::from(prefix.into());
        self
    }

    pub fn with_expiry_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.limiter.policy = policy;
        self
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            limiter: self.limiter.clone(),
        }
    }
}

/// Rate limiting service wrapper.
#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    limiter: RateLimiter,
}

impl<S> Service<Request<Body>> for RateLimitService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let limiter = self.limiter.clone();
        let mut inner = self.inner.clone();
        let ctx = RequestContext::of(&req);

        Box::pin(async move {
            let decision = match limiter.check(&ctx.client_ip).await {
                Ok(decision) => decision,
                Err(e) => {
                    metrics::record_rate_limit_store_error();
                    return Ok(reject("rate_limit", &ctx, AppError::Store(e)));
                }
            };

            if !decision.admitted {
                metrics::record_rate_limit_rejection();
                let mut response = reject("rate_limit", &ctx, AppError::RateLimited);
                decision.apply_headers(response.headers_mut());
                response.headers_mut().insert(
                    header::RETRY_AFTER,
                    HeaderValue::from(decision.retry_after_secs(Utc::now().timestamp())),
                );
                return Ok(response);
            }

            let mut response = inner.call(req).await?;
            decision.apply_headers(response.headers_mut());
            Ok(response)
        })
    }
}
