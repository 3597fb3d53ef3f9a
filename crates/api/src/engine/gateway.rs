//! Entry point for everything that touches jobs from the outside.
//!
//! [`JobService`] validates submissions, creates the record, hands it to the
//! [`JobLauncher`] and keeps a cancellation token per active job. Reads and
//! subscriptions go straight to the store.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tubefetch_core::error::CoreError;
use tubefetch_core::job::{DownloadRequest, Job, JobSnapshot};
use tubefetch_core::types::JobId;
use tubefetch_store::JobStore;

use super::launcher::JobLauncher;
use super::notifier;

/// How often [`JobService::shutdown`] re-checks for active jobs.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Submission, lookup, subscription and cancellation of download jobs.
pub struct JobService {
    store: Arc<JobStore>,
    launcher: Arc<JobLauncher>,
    poll_interval: Duration,
    /// Parent of every per-job token; cancelled on shutdown.
    root_cancel: CancellationToken,
    /// Tokens of jobs whose launcher is still running.
    cancel_tokens: Arc<RwLock<HashMap<JobId, CancellationToken>>>,
}

impl JobService {
    pub fn new(store: Arc<JobStore>, launcher: Arc<JobLauncher>, poll_interval: Duration) -> Self {
        Self {
            store,
            launcher,
            poll_interval,
            root_cancel: CancellationToken::new(),
            cancel_tokens: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Validate `request`, create the job and start its launcher.
    ///
    /// Only validation errors are returned. A tool that cannot be spawned
    /// leaves the job failed, which callers observe through [`Self::get`]
    /// or [`Self::subscribe`].
    pub async fn submit(&self, request: DownloadRequest) -> Result<JobId, CoreError> {
        let new_job = request.validate()?;
        let job = self.store.create(new_job).await;
        let id = job.id;

        tracing::info!(
            job_id = %id,
            url = %job.url,
            mode = %job.mode,
            quality = %job.quality,
            "Job submitted",
        );

        let cancel = self.root_cancel.child_token();
        self.cancel_tokens.write().await.insert(id, cancel.clone());

        match self.launcher.start(&job, cancel).await {
            Some(handle) => {
                let tokens = Arc::clone(&self.cancel_tokens);
                tokio::spawn(async move {
                    let _ = handle.await;
                    tokens.write().await.remove(&id);
                });
            }
            None => {
                self.cancel_tokens.write().await.remove(&id);
            }
        }

        Ok(id)
    }

    /// Point-in-time copy of the job record.
    pub async fn get(&self, id: JobId) -> Result<Job, CoreError> {
        self.store.get(id).await
    }

    /// Point-in-time status of the job.
    pub async fn snapshot(&self, id: JobId) -> Result<JobSnapshot, CoreError> {
        Ok(self.store.get(id).await?.snapshot())
    }

    /// All known jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        self.store.list().await
    }

    /// Live status stream for `id`; see [`notifier::subscribe`].
    pub fn subscribe(&self, id: JobId) -> impl Stream<Item = JobSnapshot> + Send + 'static {
        notifier::subscribe(Arc::clone(&self.store), id, self.poll_interval)
    }

    /// Request cancellation of a job.
    ///
    /// Returns as soon as the launcher has been signalled; the job reaches
    /// `failed` once the process is gone.
    pub async fn cancel(&self, id: JobId) -> Result<(), CoreError> {
        let job = self.store.get(id).await?;
        if job.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Job {id} has already finished"
            )));
        }

        match self.cancel_tokens.read().await.get(&id) {
            Some(token) => {
                tracing::info!(job_id = %id, "Cancelling job");
                token.cancel();
                Ok(())
            }
            // The launcher finished between the state read and now.
            None => Err(CoreError::Conflict(format!(
                "Job {id} has already finished"
            ))),
        }
    }

    /// Number of jobs with a live launcher.
    pub async fn active_jobs(&self) -> usize {
        self.cancel_tokens.read().await.len()
    }

    /// Cancel every job and wait up to `timeout` for their launchers to
    /// record the outcome. Returns how many were still active at the end.
    pub async fn shutdown(&self, timeout: Duration) -> usize {
        let active = self.active_jobs().await;
        tracing::info!(active, "Cancelling running jobs");
        self.root_cancel.cancel();

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = self.active_jobs().await;
            if remaining == 0 || tokio::time::Instant::now() >= deadline {
                if remaining > 0 {
                    tracing::warn!(remaining, "Jobs still active after shutdown timeout");
                }
                return remaining;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use assert_matches::assert_matches;
    use futures::StreamExt;
    use tubefetch_core::job::JobState;

    use super::*;
    use crate::engine::launcher::LauncherSettings;

    fn service_with_script(dir: &tempfile::TempDir, body: &str) -> JobService {
        let script = dir.path().join("fake-ytdlp.sh");
        std::fs::write(&script, body).expect("write stub script");
        service(LauncherSettings {
            program: "sh".to_string(),
            download_dir: dir.path().to_path_buf(),
            extra_args: vec![script.to_string_lossy().into_owned()],
            cancel_grace: Duration::from_millis(300),
            idle_timeout: None,
        })
    }

    fn service(settings: LauncherSettings) -> JobService {
        let store = Arc::new(JobStore::new());
        let launcher = Arc::new(JobLauncher::new(Arc::clone(&store), settings));
        JobService::new(store, launcher, Duration::from_millis(20))
    }

    fn request(mode: &str, quality: &str) -> DownloadRequest {
        DownloadRequest {
            url: "https://example/video".to_string(),
            mode: mode.to_string(),
            quality: quality.to_string(),
        }
    }

    async fn final_snapshot(svc: &JobService, id: JobId) -> JobSnapshot {
        let snapshots: Vec<JobSnapshot> =
            tokio::time::timeout(Duration::from_secs(10), svc.subscribe(id).collect())
                .await
                .expect("job finished in time");
        snapshots.last().cloned().expect("at least one snapshot")
    }

    #[tokio::test]
    async fn invalid_submission_creates_no_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service_with_script(&dir, "exit 0\n");

        let result = svc.submit(request("video", "320")).await;

        assert_matches!(result, Err(CoreError::Validation(_)));
        assert!(svc.list().await.is_empty());
    }

    #[tokio::test]
    async fn spawn_failure_is_visible_immediately() {
        let svc = service(LauncherSettings {
            program: "/nonexistent/tubefetch-missing-yt-dlp".to_string(),
            download_dir: PathBuf::from("downloads"),
            extra_args: Vec::new(),
            cancel_grace: Duration::from_millis(100),
            idle_timeout: None,
        });

        let id = svc.submit(request("audio", "320")).await.expect("accepted");

        let snapshot = svc.snapshot(id).await.expect("job exists");
        assert!(snapshot.done);
        assert_eq!(snapshot.state, Some(JobState::Failed));
        assert!(snapshot.error.is_some());
        assert_eq!(svc.active_jobs().await, 0);
    }

    #[tokio::test]
    async fn successful_job_ends_done() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service_with_script(&dir, "echo '[download]  42.0%'\nexit 0\n");

        let id = svc.submit(request("audio", "192")).await.expect("accepted");
        let last = final_snapshot(&svc, id).await;

        assert!(last.done);
        assert_eq!(last.progress, 100);
        assert!(last.error.is_none());
    }

    #[tokio::test]
    async fn cancel_running_job() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service_with_script(&dir, "echo '[download]   3.0%'\nsleep 30\n");

        let id = svc.submit(request("video", "best")).await.expect("accepted");
        tokio::time::sleep(Duration::from_millis(100)).await;
        svc.cancel(id).await.expect("cancel accepted");

        let last = final_snapshot(&svc, id).await;
        assert_eq!(last.state, Some(JobState::Failed));
        assert_eq!(last.error.as_deref(), Some("cancelled"));

        // A second cancel on the now-terminal job is a conflict.
        assert_matches!(svc.cancel(id).await, Err(CoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn cancel_unknown_job_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service_with_script(&dir, "exit 0\n");

        assert_matches!(
            svc.cancel(JobId::new_v4()).await,
            Err(CoreError::NotFound { .. })
        );
    }

    #[tokio::test]
    async fn shutdown_cancels_everything() {
        let dir = tempfile::tempdir().expect("tempdir");
        let svc = service_with_script(&dir, "sleep 30\n");

        let a = svc.submit(request("audio", "128")).await.expect("accepted");
        let b = svc.submit(request("video", "1080")).await.expect("accepted");
        assert_eq!(svc.active_jobs().await, 2);

        let remaining = svc.shutdown(Duration::from_secs(5)).await;

        assert_eq!(remaining, 0);
        for id in [a, b] {
            let job = svc.get(id).await.expect("job exists");
            assert_eq!(job.state, JobState::Failed);
            assert_eq!(job.error.as_deref(), Some("cancelled"));
        }
    }
}
