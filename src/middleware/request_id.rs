//! Request identification middleware.
//!
//! Runs first in the pipeline. For every request it:
//!
//! 1. Generates a fresh UUIDv4 correlation id (client-supplied ids are ignored)
//! 2. Resolves the client IP and captures user agent and referrer
//! 3. Inserts a [`RequestContext`] into request extensions
//! 4. Runs the rest of the chain inside a `request` tracing span
//! 5. Echoes the id in the `X-Request-Id` response header

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::http::header::HeaderValue;
use axum::http::{Request, Response};
use tower::{Layer, Service};
use tracing::{Instrument, info_span};
use uuid::Uuid;

use super::RequestContext;
use super::ip::TrustedProxyConfig;

/// Header name for request ID.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Placeholder id for a request that never passed through [`RequestIdLayer`].
pub const UNASSIGNED_REQUEST_ID: &str = "unassigned";

#[derive(Clone, Default)]
pub struct RequestIdLayer {
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl RequestIdLayer {
    pub fn new(trusted_proxies: TrustedProxyConfig) -> Self {
        Self {
            trusted_proxies: Arc::new(trusted_proxies),
        }
    }
}

impl<S> Layer<S> for RequestIdLayer {
    type Service = RequestIdService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestIdService {
            inner,
            trusted_proxies: self.trusted_proxies.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RequestIdService<S> {
    inner: S,
    trusted_proxies: Arc<TrustedProxyConfig>,
}

impl<S> Service<Request<Body>> for RequestIdService<S>
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

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let request_id = Uuid::new_v4().to_string();
        let ctx = RequestContext::capture(&req, request_id, &self.trusted_proxies);

        let span = info_span!(
            "request",
            request_id = %ctx.request_id,
            client_ip = %ctx.client_ip,
        );

        // A hyphenated UUID is always a valid header value
        let header_value = HeaderValue::from_str(&ctx.request_id).ok();
        req.extensions_mut().insert(ctx);

        let mut inner = self.inner.clone();

        Box::pin(
            async move {
                let mut response = inner.call(req).await?;

                if let Some(value) = header_value {
                    response.headers_mut().insert(REQUEST_ID_HEADER, value);
                }

                Ok(response)
            }
            .instrument(span),
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::Extension;
    use axum::routing::get;
    use tower::ServiceExt;

    async fn echo_id(Extension(ctx): Extension<RequestContext>) -> String {
        ctx.request_id
    }

    fn app() -> Router {
        Router::new()
            .route("/", get(echo_id))
            .layer(RequestIdLayer::default())
    }

    #[tokio::test]
    async fn test_context_id_matches_response_header() {
        let response = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let header = response.headers()[REQUEST_ID_HEADER]
            .to_str()
            .unwrap()
            .to_string();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();

        assert!(Uuid::parse_str(&header).is_ok());
        assert_eq!(header.as_bytes(), &body[..]);
    }

    #[tokio::test]
    async fn test_client_supplied_id_is_replaced() {
        let response = app()
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(REQUEST_ID_HEADER, "spoofed")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_ne!(response.headers()[REQUEST_ID_HEADER], "spoofed");
    }

    #[tokio::test]
    async fn test_ids_are_unique_per_request() {
        let first = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let second = app()
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_ne!(
            first.headers()[REQUEST_ID_HEADER],
            second.headers()[REQUEST_ID_HEADER]
        );
    }
}
