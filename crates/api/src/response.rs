//! Shared response envelope types for API handlers.
//!
//! Collection endpoints wrap their payload as `{ "data": ... }`. Job status
//! and submission responses use the flat shapes observers already consume
//! over the streaming channel.

use serde::Serialize;
use tubefetch_core::types::JobId;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Body returned when a job is accepted or a cancel is requested.
#[derive(Debug, Serialize)]
pub struct JobAccepted {
    pub job_id: JobId,
}
