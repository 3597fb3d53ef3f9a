use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tubefetch_api::background;
use tubefetch_api::config::ServerConfig;
use tubefetch_api::engine::launcher::JobLauncher;
use tubefetch_api::engine::JobService;
use tubefetch_api::router::build_app_router;
use tubefetch_api::state::AppState;
use tubefetch_store::JobStore;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tubefetch_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Download directory ---
    tokio::fs::create_dir_all(&config.download_dir)
        .await
        .expect("Failed to create download directory");
    tracing::info!(dir = %config.download_dir.display(), "Download directory ready");

    // --- Job engine ---
    let store = Arc::new(JobStore::new());
    let settings = config.launcher_settings();
    tracing::info!(
        program = %settings.program,
        extra_args = settings.extra_args.len(),
        "Job launcher configured",
    );
    let launcher = Arc::new(JobLauncher::new(Arc::clone(&store), settings));
    let jobs = Arc::new(JobService::new(
        Arc::clone(&store),
        launcher,
        config.status_poll_interval(),
    ));

    // --- Background tasks ---
    let retention_cancel = CancellationToken::new();
    let retention_handle = config.job_retention().map(|retention| {
        tokio::spawn(background::job_retention::run(
            Arc::clone(&store),
            retention,
            retention_cancel.clone(),
        ))
    });

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        jobs: Arc::clone(&jobs),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    retention_cancel.cancel();
    if let Some(handle) = retention_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        tracing::info!("Job retention task stopped");
    }

    let remaining = jobs
        .shutdown(Duration::from_secs(config.shutdown_timeout_secs))
        .await;
    tracing::info!(remaining, "Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
