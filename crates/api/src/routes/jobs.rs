//! Route definitions for the `/jobs` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Routes mounted at `/jobs`.
///
/// ```text
/// POST   /                -> submit_job
/// GET    /{id}            -> get_job_status
/// DELETE /{id}            -> delete_job
/// GET    /{id}/result     -> get_job_result
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(jobs::submit_job))
        .route("/{id}", get(jobs::get_job_status).delete(jobs::delete_job))
        .route("/{id}/result", get(jobs::get_job_result))
}
