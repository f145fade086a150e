//! One structured log record per request.
//!
//! Wraps the rest of the chain, so the recorded status and duration include
//! rate-limit rejections, cache replays and auth failures.
//!
//! # Classification
//!
//! | Status    | Outcome   | Level |
//! |-----------|-----------|-------|
//! | < 400     | `success` | info  |
//! | 400 - 499 | `fail`    | warn  |
//! | >= 500    | `error`   | error |
//!
//! # Path Filtering
//!
//! `LOG_INCLUDE_PATHS` and `LOG_EXCLUDE_PATHS` are prefix lists. With a
//! non-empty include list only matching paths are logged; exclusions always
//! win. The duration histogram is recorded for every request regardless.

use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::{Request, Response, StatusCode};
use tower::{Layer, Service};
use tracing::{error, info, warn};

use super::RequestContext;
use crate::metrics;

/// Status class of a finished request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Fail,
    Error,
}

impl Outcome {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            0..400 => Self::Success,
            400..500 => Self::Fail,
            _ => Self::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

/// Include/exclude path prefix filter.
#[derive(Debug, Clone, Default)]
pub struct LogFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl LogFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    pub fn should_log(&self, path: &str) -> bool {
        if self.exclude.iter().any(|p| path.starts_with(p.as_str())) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| path.starts_with(p.as_str()))
    }
}

#[derive(Clone, Default)]
pub struct RequestLoggerLayer {
    filter: Arc<LogFilter>,
}

impl RequestLoggerLayer {
    pub fn new(filter: LogFilter) -> Self {
        Self {
            filter: Arc::new(filter),
        }
    }
}

impl<S> Layer<S> for RequestLoggerLayer {
    type Service = RequestLoggerService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestLoggerService {
            inner,
            filter: self.filter.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequestLoggerService<S> {
    inner: S,
    filter: Arc<LogFilter>,
}

impl<S> Service<Request<Body>> for RequestLoggerService<S>
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
        let start = Instant::now();
        let ctx = RequestContext::of(&req);
        let method = req.method().clone();
        let path = req.uri().path().to_string();
        // Route template keeps the metric label cardinality bounded
        let endpoint = req
            .extensions()
            .get::<MatchedPath>()
            .map_or_else(|| "unmatched".to_string(), |m| m.as_str().to_string());
        let filter = self.filter.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;

            let elapsed = start.elapsed();
            let status = response.status();
            let outcome = Outcome::from_status(status);

            metrics::record_request_duration(
                &endpoint,
                method.as_str(),
                status.as_str(),
                elapsed.as_secs_f64(),
            );

            if filter.should_log(&path) {
                let duration_ms = elapsed.as_secs_f64() * 1000.0;
                macro_rules! emit {
                    ($level:ident) => {
                        $level!(
                            method = %method,
                            path = %path,
                            outcome = outcome.as_str(),
                            status = status.as_u16(),
                            duration_ms,
                            client_ip = %ctx.client_ip,
                            user_agent = %ctx.user_agent,
                            referrer = %ctx.referrer,
                            request_id = %ctx.request_id,
                            "Request completed"
                        )
                    };
                }
                match outcome {
                    Outcome::Success => emit!(info),
                    Outcome::Fail => emit!(warn),
                    Outcome::Error => emit!(error),
                }
            }

            Ok(response)
        })
    }
}
