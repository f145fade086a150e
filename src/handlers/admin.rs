//! Administrative endpoints.

use axum::http::StatusCode;
use tracing::{info, instrument};

use crate::middleware::CurrentUser;

/// `POST /admin/cache/purge`
///
/// The purge itself is done by the cache invalidator wrapped around this
/// route after the handler returns; the handler only records who asked.
#[instrument(skip_all)]
pub async fn purge_cache(CurrentUser(user): CurrentUser) -> StatusCode {
    info!(user_id = %user.id, email = %user.email, "Response cache purge requested");
    StatusCode::NO_CONTENT
}
