//! Route definitions for the `/downloads` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::downloads;
use crate::state::AppState;
use crate::ws;

/// Routes mounted at `/downloads`.
///
/// ```text
/// GET    /                -> list_downloads
/// POST   /                -> submit_download
/// GET    /{id}            -> get_download
/// POST   /{id}/cancel     -> cancel_download
/// GET    /{id}/ws         -> job_stream_handler
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(downloads::list_downloads).post(downloads::submit_download),
        )
        .route("/{id}", get(downloads::get_download))
        .route("/{id}/cancel", post(downloads::cancel_download))
        .route("/{id}/ws", get(ws::job_stream_handler))
}
