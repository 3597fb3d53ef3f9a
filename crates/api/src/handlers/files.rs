//! Handler for retrieving files produced by finished downloads.

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use tokio_util::io::ReaderStream;
use tubefetch_core::error::CoreError;

use crate::error::{AppError, AppResult};
use crate::state::AppState;

/// GET /api/v1/files/{filename}
///
/// Stream a file from the download directory as an attachment. Only bare
/// file names are accepted.
pub async fn download_file(
    State(state): State<AppState>,
    Path(filename): Path<String>,
) -> AppResult<impl IntoResponse> {
    validate_filename(&filename)?;

    let path = state.config.download_dir.join(&filename);
    let file = match tokio::fs::File::open(&path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::Core(CoreError::NotFound {
                entity: "File",
                id: filename,
            }));
        }
        Err(e) => {
            return Err(AppError::InternalError(format!(
                "failed to open {}: {e}",
                path.display()
            )));
        }
    };
    let metadata = file
        .metadata()
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;
    if !metadata.is_file() {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "File",
            id: filename,
        }));
    }

    let disposition = format!("attachment; filename=\"{}\"", filename.replace('"', "_"));
    let disposition = HeaderValue::from_str(&disposition)
        .map_err(|_| AppError::BadRequest("Invalid filename".to_string()))?;

    tracing::debug!(filename = %filename, size = metadata.len(), "Serving file");

    Ok((
        [
            (CONTENT_TYPE, HeaderValue::from_static("application/octet-stream")),
            (CONTENT_LENGTH, HeaderValue::from(metadata.len())),
            (CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    ))
}

/// Reject anything that is not a plain file name inside the download dir.
fn validate_filename(name: &str) -> Result<(), AppError> {
    if name.is_empty() || name.starts_with('.') || name.contains(['/', '\\', '\0']) {
        return Err(AppError::BadRequest("Invalid filename".to_string()));
    }
    Ok(())
}
