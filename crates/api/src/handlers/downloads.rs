//! Handlers for the `/downloads` resource.
//!
//! Job ids arrive as raw path strings. Anything that is not an issued id,
//! malformed or not, is reported as an unknown job.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use tubefetch_core::error::CoreError;
use tubefetch_core::job::DownloadRequest;
use tubefetch_core::types::JobId;

use crate::error::AppResult;
use crate::response::{DataResponse, JobAccepted};
use crate::state::AppState;

/// Parse a path id, mapping malformed input to the unknown-job error.
pub fn parse_job_id(raw: &str) -> Result<JobId, CoreError> {
    raw.parse().map_err(|_| CoreError::unknown_job(raw))
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/downloads
///
/// Validate and start a download job. Returns 202 with the job id as soon
/// as the job is registered; progress is observed through the status and
/// stream endpoints.
pub async fn submit_download(
    State(state): State<AppState>,
    Json(input): Json<DownloadRequest>,
) -> AppResult<impl IntoResponse> {
    let job_id = state.jobs.submit(input).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// GET /api/v1/downloads
///
/// Every job the server still remembers, oldest first.
pub async fn list_downloads(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let jobs = state.jobs.list().await;
    Ok(Json(DataResponse { data: jobs }))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// GET /api/v1/downloads/{id}
pub async fn get_download(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id = parse_job_id(&raw_id)?;
    let snapshot = state.jobs.snapshot(job_id).await?;
    Ok(Json(snapshot))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// POST /api/v1/downloads/{id}/cancel
///
/// Signal the job's process to stop. Returns 202 immediately; the job
/// becomes `failed` with error `"cancelled"` once the process is gone.
pub async fn cancel_download(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let job_id = parse_job_id(&raw_id)?;
    state.jobs.cancel(job_id).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id })))
}
