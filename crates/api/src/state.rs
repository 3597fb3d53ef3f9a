use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::JobService;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Job submission, lookup and cancellation.
    pub jobs: Arc<JobService>,
}
