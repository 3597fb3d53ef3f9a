pub mod downloads;
pub mod files;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /downloads                    list, submit (GET, POST)
/// /downloads/{id}               job status (GET)
/// /downloads/{id}/cancel        cancel job (POST)
/// /downloads/{id}/ws            status stream (WebSocket)
///
/// /files/{filename}             download a finished file (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Download jobs: submit, poll, cancel, stream.
        .nest("/downloads", downloads::router())
        // Files produced by finished jobs.
        .nest("/files", files::router())
}
