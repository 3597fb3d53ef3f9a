use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::engine::launcher::LauncherSettings;

/// Server configuration loaded from environment variables.
///
/// All fields have sensible defaults suitable for local development.
/// In production, override via environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `8000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS` env var.
    /// A single `*` allows any origin.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// How long shutdown waits for running jobs to wind down (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Directory downloads are written to and served from.
    pub download_dir: PathBuf,
    /// Path or name of the `yt-dlp` executable.
    pub ytdlp_bin: String,
    /// Cookies file handed to `yt-dlp` when it exists.
    pub ytdlp_cookies: Option<PathBuf>,
    /// Value for `--js-runtimes`; empty disables the flag.
    pub ytdlp_js_runtimes: String,
    /// Cadence of status pushes on streaming subscriptions.
    pub status_poll_interval_ms: u64,
    /// Time between SIGTERM and SIGKILL when cancelling a job.
    pub cancel_grace_secs: u64,
    /// Fail a job after this long without output; `0` disables.
    pub idle_timeout_secs: u64,
    /// Evict finished jobs after this long; `0` disables.
    pub job_retention_secs: u64,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default       |
    /// |---------------------------|---------------|
    /// | `HOST`                    | `0.0.0.0`     |
    /// | `PORT`                    | `8000`        |
    /// | `CORS_ORIGINS`            | `*`           |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`          |
    /// | `SHUTDOWN_TIMEOUT_SECS`   | `30`          |
    /// | `DOWNLOAD_DIR`            | `downloads`   |
    /// | `YTDLP_BIN`               | `yt-dlp`      |
    /// | `YTDLP_COOKIES`           | `cookies.txt` |
    /// | `YTDLP_JS_RUNTIMES`       | (empty)       |
    /// | `STATUS_POLL_INTERVAL_MS` | `500`         |
    /// | `CANCEL_GRACE_SECS`       | `5`           |
    /// | `IDLE_TIMEOUT_SECS`       | `600`         |
    /// | `JOB_RETENTION_SECS`      | `3600`        |
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let ytdlp_cookies = std::env::var("YTDLP_COOKIES")
            .unwrap_or_else(|_| "cookies.txt".into())
            .trim()
            .to_string();

        Self {
            host,
            port: parse_env("PORT", 8000),
            cors_origins,
            request_timeout_secs: parse_env("REQUEST_TIMEOUT_SECS", 30),
            shutdown_timeout_secs: parse_env("SHUTDOWN_TIMEOUT_SECS", 30),
            download_dir: std::env::var("DOWNLOAD_DIR")
                .unwrap_or_else(|_| "downloads".into())
                .into(),
            ytdlp_bin: std::env::var("YTDLP_BIN").unwrap_or_else(|_| "yt-dlp".into()),
            ytdlp_cookies: (!ytdlp_cookies.is_empty()).then(|| ytdlp_cookies.into()),
            ytdlp_js_runtimes: std::env::var("YTDLP_JS_RUNTIMES").unwrap_or_default(),
            status_poll_interval_ms: parse_env("STATUS_POLL_INTERVAL_MS", 500),
            cancel_grace_secs: parse_env("CANCEL_GRACE_SECS", 5),
            idle_timeout_secs: parse_env("IDLE_TIMEOUT_SECS", 600),
            job_retention_secs: parse_env("JOB_RETENTION_SECS", 3600),
        }
    }

    pub fn status_poll_interval(&self) -> Duration {
        Duration::from_millis(self.status_poll_interval_ms.max(1))
    }

    /// Retention TTL for finished jobs, or `None` when eviction is disabled.
    pub fn job_retention(&self) -> Option<Duration> {
        (self.job_retention_secs > 0).then(|| Duration::from_secs(self.job_retention_secs))
    }

    /// Launcher settings derived from this configuration.
    pub fn launcher_settings(&self) -> LauncherSettings {
        LauncherSettings {
            program: self.ytdlp_bin.clone(),
            download_dir: self.download_dir.clone(),
            extra_args: tubefetch_core::ytdlp::credential_args(
                self.ytdlp_cookies.as_deref(),
                &self.ytdlp_js_runtimes,
            ),
            cancel_grace: Duration::from_secs(self.cancel_grace_secs),
            idle_timeout: (self.idle_timeout_secs > 0)
                .then(|| Duration::from_secs(self.idle_timeout_secs)),
        }
    }
}

/// Read `key` from the environment, falling back to `default` when unset.
///
/// Panics on an unparsable value: misconfiguration should fail at startup.
fn parse_env<T>(key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .unwrap_or_else(|e| panic!("{key} must be a valid {}: {e}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}
