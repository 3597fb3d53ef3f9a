//! Route definitions for the `/files` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::files;
use crate::state::AppState;

/// Routes mounted at `/files`.
///
/// ```text
/// GET    /{filename}      -> download_file
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/{filename}", get(files::download_file))
}
