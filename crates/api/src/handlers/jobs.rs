//! Handlers for the `/jobs` resource and the blocking `/restore` endpoint.
//!
//! Submission and polling are the primary flow: `POST /jobs` returns a job
//! id immediately and the client polls `GET /jobs/{id}`. `POST /restore`
//! waits for the result in the same request and keeps the connection alive
//! with whitespace while the engine runs.

use std::convert::Infallible;

use axum::body::{Body, Bytes};
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::StreamExt;
use restorer_core::types::JobId;
use restorer_pipeline::{Beat, ResultDelivery, RestoredImage, StatusReport};
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Multipart field carrying the image.
const UPLOAD_FIELD: &str = "file";

/// Sent while a restore-and-wait request is still running. JSON parsers
/// skip leading whitespace, so the final body stays valid JSON.
const KEEP_ALIVE: &[u8] = b" ";

// ---------------------------------------------------------------------------
// Response payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub job_id: JobId,
    pub status: &'static str,
    pub status_url: String,
}

/// JSON form of a status poll that did not return image bytes.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatusResponse {
    Processing {
        job_id: JobId,
        elapsed_secs: u64,
    },
    Completed {
        job_id: JobId,
        filename: String,
        result_url: String,
    },
    Failed {
        job_id: JobId,
        error: String,
    },
}

#[derive(Debug, Serialize)]
pub struct InlineResult {
    pub job_id: JobId,
    pub filename: String,
    pub content_type: &'static str,
    pub image_base64: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/jobs
///
/// Accept a multipart image upload and start restoring it. Responds with
/// 202 and the job id before the engine has run.
pub async fn submit_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<(StatusCode, Json<DataResponse<SubmitResponse>>)> {
    let (filename, bytes) = read_upload(multipart).await?;
    let handle = state.dispatcher.submit(&bytes, &filename).await?;
    let job_id = handle.id();

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: SubmitResponse {
                job_id,
                status: "processing",
                status_url: status_url(job_id),
            },
        }),
    ))
}

/// GET /api/v1/jobs/{id}
///
/// Report a job's state. In single-read mode a finished job is consumed by
/// this call: a completed one is answered with the image itself.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let id = parse_job_id(&id)?;

    let body = match state.status.get_status(id).await? {
        StatusReport::Processing {
            job_id,
            elapsed_secs,
        } => JobStatusResponse::Processing {
            job_id,
            elapsed_secs,
        },
        StatusReport::Failed { job_id, error } => JobStatusResponse::Failed { job_id, error },
        StatusReport::Completed(ResultDelivery::Inline(image)) => {
            return Ok(image_response(image))
        }
        StatusReport::Completed(ResultDelivery::Reference { job_id, filename }) => {
            JobStatusResponse::Completed {
                job_id,
                filename,
                result_url: format!("{}/result", status_url(job_id)),
            }
        }
    };

    Ok(Json(DataResponse { data: body }).into_response())
}

/// GET /api/v1/jobs/{id}/result
///
/// Download the restored image of a completed job.
pub async fn get_job_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let id = parse_job_id(&id)?;
    let image = state.status.read_result(id).await?;
    Ok(image_response(image))
}

/// DELETE /api/v1/jobs/{id}
pub async fn delete_job(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = parse_job_id(&id)?;
    state.status.discard(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/restore
///
/// Restore an image and answer in the same request. Upload errors are
/// returned as ordinary error responses. Once the job is running the
/// response is committed as `200 application/json`: the body carries one
/// space per heartbeat interval and then either the result envelope or an
/// `{error, code}` object.
pub async fn restore_and_wait(
    State(state): State<AppState>,
    multipart: Multipart,
) -> AppResult<Response> {
    let (filename, bytes) = read_upload(multipart).await?;
    let handle = state.dispatcher.submit(&bytes, &filename).await?;
    let job_id = handle.id();
    let status = state.status.clone();

    let beats = state.heartbeat.watch(async move {
        handle.wait().await;
        status.take_result(job_id).await
    });

    let body = beats.map(move |beat| {
        let chunk = match beat {
            Beat::KeepAlive => Bytes::from_static(KEEP_ALIVE),
            Beat::Finished(Ok(image)) => final_chunk(&DataResponse {
                data: InlineResult {
                    job_id: image.job_id,
                    image_base64: BASE64.encode(&image.bytes),
                    content_type: image.content_type,
                    filename: image.filename,
                },
            }),
            Beat::Finished(Err(e)) => {
                let err = AppError::from(e);
                tracing::warn!(job_id = %job_id, error = %err, "Restore-and-wait failed");
                final_chunk(&err.body())
            }
        };
        Ok::<_, Infallible>(chunk)
    });

    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = HeaderValue::from_str(&job_id.to_string()) {
        headers.insert("x-job-id", value);
    }
    Ok(response)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Pull the image field out of a multipart body.
///
/// Takes the field named `file`, or failing that the first field that
/// carries a file name.
async fn read_upload(mut multipart: Multipart) -> AppResult<(String, Bytes)> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let is_upload = field.name() == Some(UPLOAD_FIELD) || field.file_name().is_some();
        if !is_upload {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| AppError::BadRequest("Upload is missing a file name".into()))?;
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok((filename, bytes));
    }

    Err(AppError::BadRequest(format!(
        "Multipart field '{UPLOAD_FIELD}' is required"
    )))
}

fn multipart_error(e: MultipartError) -> AppError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        AppError::PayloadTooLarge(e.body_text())
    } else {
        AppError::BadRequest(e.body_text())
    }
}

fn parse_job_id(raw: &str) -> AppResult<JobId> {
    raw.parse()
        .map_err(|_| AppError::BadRequest(format!("'{raw}' is not a valid job id")))
}

fn status_url(id: JobId) -> String {
    format!("/api/v1/jobs/{id}")
}

fn image_response(image: RestoredImage) -> Response {
    let disposition = format!("attachment; filename=\"{}\"", image.download_name());
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, image.content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        image.bytes,
    )
        .into_response()
}

fn final_chunk<T: Serialize>(value: &T) -> Bytes {
    match serde_json::to_vec(value) {
        Ok(json) => Bytes::from(json),
        Err(e) => {
            tracing::error!(error = %e, "Failed to serialize restore response");
            Bytes::from_static(br#"{"error":"An internal error occurred","code":"INTERNAL_ERROR"}"#)
        }
    }
}
