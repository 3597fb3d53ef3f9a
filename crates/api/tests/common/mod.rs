#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

use tubefetch_api::config::ServerConfig;
use tubefetch_api::engine::launcher::{JobLauncher, LauncherSettings};
use tubefetch_api::engine::JobService;
use tubefetch_api::router::build_app_router;
use tubefetch_api::state::AppState;
use tubefetch_store::JobStore;

/// A running test application and the directory backing it.
///
/// The directory holds the stub `yt-dlp` script and doubles as the download
/// directory; it is removed when the harness is dropped.
pub struct TestApp {
    pub router: Router,
    pub jobs: Arc<JobService>,
    pub dir: TempDir,
}

/// Build a test `ServerConfig` with safe defaults rooted at `download_dir`.
///
/// Uses `http://localhost:5173` as CORS origin and a fast status poll so
/// streaming tests finish quickly.
pub fn test_config(download_dir: &std::path::Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
        download_dir: download_dir.to_path_buf(),
        ytdlp_bin: "sh".to_string(),
        ytdlp_cookies: None,
        ytdlp_js_runtimes: String::new(),
        status_poll_interval_ms: 20,
        cancel_grace_secs: 1,
        idle_timeout_secs: 0,
        job_retention_secs: 0,
    }
}

/// Build the full application router with a stub shell script standing in
/// for `yt-dlp`.
///
/// `script` is the body of the stub; it receives the generated `yt-dlp`
/// arguments as `$@`.
pub fn build_test_app(script: &str) -> TestApp {
    let dir = tempfile::tempdir().expect("tempdir");
    let script_path = dir.path().join("fake-ytdlp.sh");
    std::fs::write(&script_path, script).expect("write stub script");

    let config = test_config(dir.path());
    let settings = LauncherSettings {
        program: config.ytdlp_bin.clone(),
        download_dir: config.download_dir.clone(),
        extra_args: vec![script_path.to_string_lossy().into_owned()],
        cancel_grace: Duration::from_secs(config.cancel_grace_secs),
        idle_timeout: None,
    };

    let store = Arc::new(JobStore::new());
    let launcher = Arc::new(JobLauncher::new(Arc::clone(&store), settings));
    let jobs = Arc::new(JobService::new(
        store,
        launcher,
        config.status_poll_interval(),
    ));

    let state = AppState {
        config: Arc::new(config.clone()),
        jobs: Arc::clone(&jobs),
    };

    TestApp {
        router: build_app_router(state, &config),
        jobs,
        dir,
    }
}

/// Send a GET request through the router.
pub async fn get(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .expect("request"),
    )
    .await
    .expect("infallible")
}

/// Send a POST request with a JSON body through the router.
pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("request"),
    )
    .await
    .expect("infallible")
}

/// Send a POST request without a body through the router.
pub async fn post_empty(app: Router, uri: &str) -> Response<Body> {
    app.oneshot(
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .body(Body::empty())
            .expect("request"),
    )
    .await
    .expect("infallible")
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes();
    serde_json::from_slice(&bytes).expect("valid JSON body")
}

/// Poll the status endpoint until the job reports `done`.
pub async fn wait_until_done(app: &Router, job_id: &str) -> Value {
    let uri = format!("/api/v1/downloads/{job_id}");
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let json = body_json(get(app.clone(), &uri).await).await;
            if json["done"] == true {
                return json;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("job finished in time")
}
