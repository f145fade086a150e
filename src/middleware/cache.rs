//! Cache-aside response cache for GET requests and its invalidator.
//!
//! # Keys
//!
//! `{namespace}{sha256_hex(method, path, raw query, subject)}`. The subject is
//! the resolved user id when an identity is already in request extensions,
//! so personalized responses never share an entry.
//!
//! # Read Path (fail-open)
//!
//! ```text
//! GET ─► store.get(key) ─┬─ hit ──────► replay status + headers + body (handler not called)
//!                        ├─ miss ─────► handler ─► 200? ─► stream + copy ─► store.set(key, entry, ttl)
//!                        └─ error ────► handler (treated as a miss)
//! ```
//!
//! Non-GET requests bypass the cache entirely: no read, no write.
//!
//! # Write Path (best-effort)
//!
//! Only responses with status exactly 200 and no `Set-Cookie` are stored.
//! The body streams to the client frame by frame while a copy accumulates
//! beside it; copying stops once the body passes the configured maximum, and
//! a body whose size hint is already over it is never copied. Streaming and
//! long-lived responses therefore reach the client unchanged.
//!
//! The entry is written when the handler's body ends, before the client sees
//! end-of-stream, so a request that starts after a miss was fully read
//! observes the entry. Write failures are logged and swallowed.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{
    HeaderMap, HeaderName, HeaderValue, Method, Request, Response, StatusCode, header,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use http_body::{Body as HttpBody, Frame, SizeHint};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::auth::AuthenticatedUser;
use crate::metrics;
use crate::store::CacheStore;

/// Default key namespace.
pub const DEFAULT_NAMESPACE: &str = "cache:";

/// Default upper bound on a stored body.
pub const DEFAULT_MAX_ENTRY_BYTES: usize = 1024 * 1024;

/// Derive the cache key for a request.
///
/// `namespace + hex(sha256("METHOD:path:query"))`, with `":user:{subject}"`
/// appended to the digest input for identity-scoped responses.
pub fn cache_key(
    namespace: &str,
    method: &Method,
    path: &str,
    query: &str,
    subject: Option<&str>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}:{path}:{query}", method.as_str()).as_bytes());
    if let Some(subject) = subject {
        hasher.update(format!(":user:{subject}").as_bytes());
    }
    format!("{namespace}{}", hex::encode(hasher.finalize()))
}

#[derive(Debug, Error)]
pub enum CacheEntryError {
    #[error("malformed entry: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid body encoding: {0}")]
    Body(#[from] base64::DecodeError),
    #[error("invalid status code {0}")]
    Status(u16),
}

/// Stored form of a captured response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    /// Header multimap in response order. Repeated names are kept.
    pub headers: Vec<(String, String)>,
    /// Base64-encoded body bytes.
    pub body: String,
}

impl CachedResponse {
    /// Capture `status`, `headers` and `body`. Header values that are not
    /// visible ASCII cannot round-trip through JSON strings and are dropped.
    /// `Set-Cookie` is never stored: it belongs to the client that caused
    /// the miss.
    pub fn capture(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Self {
        let headers = headers
            .iter()
            .filter(|(name, _)| *name != header::SET_COOKIE)
            .filter_map(|(name, value)| match value.to_str() {
                Ok(v) => Some((name.as_str().to_string(), v.to_string())),
                Err(_) => {
                    debug!(header = %name, "Skipping non-ASCII header value in cached response");
                    None
                }
            })
            .collect();

        Self {
            status: status.as_u16(),
            headers,
            body: BASE64.encode(body),
        }
    }

    pub fn to_vec(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, CacheEntryError> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Rebuild the response. Entries that cannot be replayed exactly are errors.
    pub fn into_response(self) -> Result<Response<Body>, CacheEntryError> {
        let status =
            StatusCode::from_u16(self.status).map_err(|_| CacheEntryError::Status(self.status))?;
        let body = BASE64.decode(self.body.as_bytes())?;

        let mut response = Response::new(Body::from(body));
        *response.status_mut() = status;

        let headers = response.headers_mut();
        for (name, value) in self.headers {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.append(name, value);
                }
                _ => debug!(header = %name, "Dropping unparsable cached header"),
            }
        }

        Ok(response)
    }
}

// =============================================================================
// Response Cache
// =============================================================================

#[derive(Clone)]
struct CacheSettings {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    namespace: Arc<str>,
    max_entry_bytes: usize,
}

/// Response cache layer for GET routes.
///
/// # Example
///
/// ```rust,ignore
/// let app = Router::new()
///     .route("/stats", get(stats))
///     .route_layer(ResponseCacheLayer::new(store, Duration::from_secs(60)).with_namespace("cache:"));
/// ```
#[derive(Clone)]
pub struct ResponseCacheLayer {
    settings: CacheSettings,
}

impl ResponseCacheLayer {
    pub fn new(store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            settings: CacheSettings {
                store,
                ttl,
                namespace: Arc::from(DEFAULT_NAMESPACE),
                max_entry_bytes: DEFAULT_MAX_ENTRY_BYTES,
            },
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.settings.namespace = Arc::from(namespace.into());
        self
    }

    pub fn with_max_entry_bytes(mut self, max: usize) -> Self {
        self.settings.max_entry_bytes = max;
        self
    }
}

impl<S> Layer<S> for ResponseCacheLayer {
    type Service = ResponseCacheService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ResponseCacheService {
            inner,
            settings: self.settings.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ResponseCacheService<S> {
    inner: S,
    settings: CacheSettings,
}

impl<S> Service<Request<Body>> for ResponseCacheService<S>
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
        let mut inner = self.inner.clone();

        if req.method() != Method::GET {
            return Box::pin(async move { inner.call(req).await });
        }

        let settings = self.settings.clone();
        let key = cache_key(
            &settings.namespace,
            req.method(),
            req.uri().path(),
            req.uri().query().unwrap_or(""),
            req.extensions()
                .get::<AuthenticatedUser>()
                .map(|u| u.id.as_str()),
        );

        Box::pin(async move {
            if let Some(hit) = lookup(&settings, &key).await {
                return Ok(hit);
            }

            let response = inner.call(req).await?;

            if response.status() != StatusCode::OK {
                return Ok(response);
            }
            if response.headers().contains_key(header::SET_COOKIE) {
                metrics::record_cache_store("skipped");
                debug!(key = %key, "Response sets a cookie, not caching");
                return Ok(response);
            }

            let (parts, body) = response.into_parts();
            let max = u64::try_from(settings.max_entry_bytes).unwrap_or(u64::MAX);
            if body.size_hint().lower() > max {
                metrics::record_cache_store("skipped");
                debug!(
                    key = %key,
                    size = body.size_hint().lower(),
                    max = settings.max_entry_bytes,
                    "Response too large to cache"
                );
                return Ok(Response::from_parts(parts, body));
            }

            let capture = Capture {
                settings,
                key,
                status: parts.status,
                headers: parts.headers.clone(),
                buf: Vec::new(),
            };
            Ok(Response::from_parts(
                parts,
                Body::new(CaptureBody::new(body, capture)),
            ))
        })
    }
}

async fn lookup(settings: &CacheSettings, key: &str) -> Option<Response<Body>> {
    let raw = match settings.store.get(key).await {
        Ok(Some(raw)) => raw,
        Ok(None) => {
            metrics::record_cache_lookup("miss");
            return None;
        }
        Err(e) => {
            metrics::record_cache_lookup("error");
            warn!(key = %key, error = %e, "Cache read failed, serving from handler");
            return None;
        }
    };

    match CachedResponse::from_slice(&raw).and_then(CachedResponse::into_response) {
        Ok(response) => {
            metrics::record_cache_lookup("hit");
            debug!(key = %key, "Cache hit");
            Some(response)
        }
        Err(e) => {
            metrics::record_cache_lookup("error");
            warn!(key = %key, error = %e, "Unreadable cache entry, serving from handler");
            None
        }
    }
}

async fn store(
    settings: &CacheSettings,
    key: &str,
    status: StatusCode,
    headers: &HeaderMap,
    body: &[u8],
) {
    let entry = CachedResponse::capture(status, headers, body);
    let encoded = match entry.to_vec() {
        Ok(encoded) => encoded,
        Err(e) => {
            metrics::record_cache_store("error");
            warn!(key = %key, error = %e, "Failed to encode cache entry");
            return;
        }
    };

    match settings.store.set(key, &encoded, settings.ttl).await {
        Ok(()) => {
            metrics::record_cache_store("stored");
            debug!(key = %key, ttl_secs = settings.ttl.as_secs(), "Response cached");
        }
        Err(e) => {
            metrics::record_cache_store("error");
            warn!(key = %key, error = %e, "Cache write failed");
        }
    }
}

// =============================================================================
// Capturing Body
// =============================================================================

type StoreFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A 200 response on its way to the client, plus the bytes seen so far.
struct Capture {
    settings: CacheSettings,
    key: String,
    status: StatusCode,
    headers: HeaderMap,
    buf: Vec<u8>,
}

impl Capture {
    /// Append a data frame, or give up once the entry limit is exceeded.
    fn record(mut self, data: &[u8]) -> Option<Self> {
        if self.buf.len().saturating_add(data.len()) > self.settings.max_entry_bytes {
            metrics::record_cache_store("skipped");
            debug!(
                key = %self.key,
                max = self.settings.max_entry_bytes,
                "Response too large to cache"
            );
            return None;
        }
        self.buf.extend_from_slice(data);
        Some(self)
    }

    fn finish(self) -> StoreFuture {
        Box::pin(async move {
            store(&self.settings, &self.key, self.status, &self.headers, &self.buf).await;
        })
    }
}

/// Response body that hands every frame to the client as soon as the handler
/// produces it, keeping a copy for the cache.
///
/// When the handler's body ends, the entry is written before end-of-stream is
/// reported, so a client that has read the whole body will hit on its next
/// request. A body that errors or is dropped part way is never stored.
struct CaptureBody {
    inner: Body,
    capture: Option<Capture>,
    pending: Option<StoreFuture>,
}

impl CaptureBody {
    fn new(inner: Body, capture: Capture) -> Self {
        Self {
            inner,
            capture: Some(capture),
            pending: None,
        }
    }
}

impl HttpBody for CaptureBody {
    type Data = Bytes;
    type Error = axum::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let this = self.get_mut();

        loop {
            if let Some(pending) = this.pending.as_mut() {
                ready!(pending.as_mut().poll(cx));
                this.pending = None;
                return Poll::Ready(None);
            }

            match ready!(Pin::new(&mut this.inner).poll_frame(cx)) {
                Some(Ok(frame)) => {
                    if let Some(data) = frame.data_ref() {
                        this.capture = this.capture.take().and_then(|c| c.record(data));
                    }
                    return Poll::Ready(Some(Ok(frame)));
                }
                Some(Err(e)) => {
                    if let Some(capture) = this.capture.take() {
                        debug!(key = %capture.key, error = %e, "Response body failed, not caching");
                    }
                    return Poll::Ready(Some(Err(e)));
                }
                None => match this.capture.take() {
                    Some(capture) => this.pending = Some(capture.finish()),
                    None => return Poll::Ready(None),
                },
            }
        }
    }

    fn is_end_stream(&self) -> bool {
        self.capture.is_none() && self.pending.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for CaptureBody {
    /// A connection may stop polling once every byte is written. Finish the
    /// write in the background if the body was complete.
    fn drop(&mut self) {
        let pending = match (self.pending.take(), self.capture.take()) {
            (Some(pending), _) => pending,
            (None, Some(capture)) if self.inner.is_end_stream() => capture.finish(),
            _ => return,
        };
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(pending);
        }
    }
}

// =============================================================================
// Invalidator
// =============================================================================

/// Deletes every cache key matching a glob pattern after the wrapped handler
/// returns, whatever its status. Failures are logged and swallowed.
#[derive(Clone)]
pub struct CacheInvalidateLayer {
    store: Arc<dyn CacheStore>,
    pattern: Arc<str>,
}

impl CacheInvalidateLayer {
    pub fn new(store: Arc<dyn CacheStore>, pattern: impl Into<String>) -> Self {
        Self {
            store,
            pattern: Arc::from(pattern.into()),
        }
    }
}

impl<S> Layer<S> for CacheInvalidateLayer {
    type Service = CacheInvalidateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        CacheInvalidateService {
            inner,
            store: self.store.clone(),
            pattern: self.pattern.clone(),
        }
    }
}

#[derive(Clone)]
pub struct CacheInvalidateService<S> {
    inner: S,
    store: Arc<dyn CacheStore>,
    pattern: Arc<str>,
}

impl<S> Service<Request<Body>> for CacheInvalidateService<S>
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
        let store = self.store.clone();
        let pattern = self.pattern.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let response = inner.call(req).await?;

            match store.delete_by_pattern(&pattern).await {
                Ok(deleted) => {
                    metrics::record_cache_invalidation("ok");
                    debug!(pattern = %pattern, deleted, "Cache invalidated");
                }
                Err(e) => {
                    metrics::record_cache_invalidation("error");
                    warn!(pattern = %pattern, error = %e, "Cache invalidation failed");
                }
            }

            Ok(response)
        })
    }
}
