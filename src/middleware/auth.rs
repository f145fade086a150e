//! Cookie-token authentication gates.
//!
//! # Modes
//!
//! | Mode       | Missing cookie | Bad token | Lookup failure | Non-admin |
//! |------------|----------------|-----------|----------------|-----------|
//! | `required` | 401            | 401       | 500            | allowed   |
//! | `admin`    | 401            | 401       | 500            | 403       |
//! | `optional` | no identity    | no identity | no identity  | allowed   |
//!
//! The admin gate runs the required gate's [`authenticate`](AuthLayer) step
//! unchanged and only adds the role check on top, so both share every
//! token and lookup failure rule.
//!
//! A valid token whose subject has no readable user record answers 500.
//!
//! # Usage
//!
//! ```rust,ignore
//! let auth = AuthLayer::new(tokens, users, "auth_token");
//!
//! Router::new()
//!     .route("/me", get(me).route_layer(auth.clone().required()))
//!     .route("/admin/cache/purge", post(purge).route_layer(auth.admin()));
//!
//! async fn me(CurrentUser(user): CurrentUser) -> Json<AuthenticatedUser> { Json(user) }
//! ```
//!
//! On success the resolved [`AuthenticatedUser`] is inserted into request
//! extensions for the [`CurrentUser`] / [`MaybeUser`] extractors.

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, Request, Response};
use axum_extra::extract::cookie::CookieJar;
use tower::{Layer, Service};
use tracing::{debug, warn};

use super::{RequestContext, reject};
use crate::auth::{AuthenticatedUser, LookupError, TokenError, TokenValidator, UserResolver};
use crate::error::AppError;
use crate::metrics;

/// Which failures a gate turns into responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Required,
    Admin,
    Optional,
}

impl AuthMode {
    fn as_str(self) -> &'static str {
        match self {
            Self::Required => "required",
            Self::Admin => "admin",
            Self::Optional => "optional",
        }
    }
}

#[derive(Clone)]
pub struct AuthLayer {
    tokens: Arc<dyn TokenValidator>,
    users: Arc<dyn UserResolver>,
    cookie_name: Arc<str>,
    mode: AuthMode,
}

impl AuthLayer {
    /// A mandatory gate reading the token from `cookie_name`.
    pub fn new(
        tokens: Arc<dyn TokenValidator>,
        users: Arc<dyn UserResolver>,
        cookie_name: impl Into<String>,
    ) -> Self {
        Self {
            tokens,
            users,
            cookie_name: Arc::from(cookie_name.into()),
            mode: AuthMode::Required,
        }
    }

    pub fn required(self) -> Self {
        self.with_mode(AuthMode::Required)
    }

    pub fn admin(self) -> Self {
        self.with_mode(AuthMode::Admin)
    }

    pub fn optional(self) -> Self {
        self.with_mode(AuthMode::Optional)
    }

    fn with_mode(mut self, mode: AuthMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn mode(&self) -> AuthMode {
        self.mode
    }

    /// Cookie → token claims → user record.
    async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthenticatedUser, AppError> {
        let jar = CookieJar::from_headers(headers);
        let token = jar
            .get(&self.cookie_name)
            .map(|c| c.value())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| AppError::unauthorized("missing_credential", "Authentication required"))?;

        let claims = self.tokens.validate(token).map_err(|e| match e {
            TokenError::Expired => AppError::unauthorized("expired_token", "Credential has expired"),
            TokenError::Invalid(reason) => {
                debug!(reason = %reason, "Token rejected");
                AppError::unauthorized("invalid_token", "Invalid credential")
            }
        })?;

        self.users.get_by_id(&claims.sub).await.map_err(|e| match e {
            LookupError::NotFound(id) => {
                AppError::UserLookup(format!("token subject {id} has no user record"))
            }
            other => AppError::UserLookup(other.to_string()),
        })
    }

    /// Apply this gate's policy. `Ok(None)` only happens for the optional gate.
    async fn admit(&self, headers: &HeaderMap) -> Result<Option<AuthenticatedUser>, AppError> {
        match self.mode {
            AuthMode::Required => self.authenticate(headers).await.map(Some),
            AuthMode::Admin => {
                let user = self.authenticate(headers).await?;
                if user.is_admin() {
                    Ok(Some(user))
                } else {
                    Err(AppError::Forbidden("Administrator role required".to_string()))
                }
            }
            AuthMode::Optional => match self.authenticate(headers).await {
                Ok(user) => Ok(Some(user)),
                Err(AppError::Unauthorized {
                    code: "missing_credential",
                    ..
                }) => Ok(None),
                Err(e) => {
                    metrics::record_auth_failure(self.mode.as_str(), e.code());
                    warn!(
                        operation = "auth_optional",
                        code = e.code(),
                        error = %e,
                        "Optional authentication failed, continuing anonymously"
                    );
                    Ok(None)
                }
            },
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            gate: self.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    gate: AuthLayer,
}

impl<S> Service<Request<Body>> for AuthService<S>
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
        let gate = self.gate.clone();
        let mut inner = self.inner.clone();

        Box::pin(async move {
            match gate.admit(req.headers()).await {
                Ok(Some(user)) => {
                    debug!(user_id = %user.id, mode = gate.mode.as_str(), "Authenticated");
                    req.extensions_mut().insert(user);
                }
                Ok(None) => {
                    debug!("No identity, continuing anonymously");
                }
                Err(e) => {
                    metrics::record_auth_failure(gate.mode.as_str(), e.code());
                    let operation = match gate.mode {
                        AuthMode::Admin => "auth_admin",
                        _ => "auth_required",
                    };
                    return Ok(reject(operation, &RequestContext::of(&req), e));
                }
            }

            inner.call(req).await
        })
    }
}

// =============================================================================
// Extractors
// =============================================================================

/// Identity resolved by a required or admin gate.
///
/// Rejects with 401 when no gate ran for the route.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub AuthenticatedUser);

impl<S: Send + Sync> FromRequestParts<S> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .map(CurrentUser)
            .ok_or_else(|| AppError::unauthorized("missing_credential", "Authentication required"))
    }
}

/// Identity from an optional gate, if any.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<AuthenticatedUser>);

impl<S: Send + Sync> FromRequestParts<S> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(parts.extensions.get::<AuthenticatedUser>().cloned()))
    }
}
