//! Identity endpoints.
//!
//! - `GET /me` - behind the required gate; the resolved user record
//! - `GET /session` - behind the optional gate; identity if one was resolved

use axum::Json;
use tracing::instrument;

use crate::auth::AuthenticatedUser;
use crate::middleware::{CurrentUser, MaybeUser};
use crate::models::SessionResponse;

#[instrument(skip_all)]
pub async fn me(CurrentUser(user): CurrentUser) -> Json<AuthenticatedUser> {
    Json(user)
}

#[instrument(skip_all)]
pub async fn session(MaybeUser(user): MaybeUser) -> Json<SessionResponse> {
    Json(SessionResponse {
        authenticated: user.is_some(),
        user,
    })
}
