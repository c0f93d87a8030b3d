pub mod health;
pub mod jobs;

use axum::routing::post;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /jobs                  submit (POST, multipart)
/// /jobs/{id}             status (GET), discard (DELETE)
/// /jobs/{id}/result      restored image (GET)
///
/// /restore               restore and wait (POST, multipart, streamed)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/jobs", jobs::router())
        .route("/restore", post(handlers::jobs::restore_and_wait))
}
