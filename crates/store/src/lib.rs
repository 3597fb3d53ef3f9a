//! In-memory job registry shared by the launcher, the notifier and the HTTP
//! handlers.
//!
//! Records are never persisted; they live for the lifetime of the process
//! (or until evicted by [`JobStore::remove_finished_before`]).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tubefetch_core::error::CoreError;
use tubefetch_core::job::{Job, NewJob};
use tubefetch_core::types::{JobId, Timestamp};

/// Concurrency-safe map of jobs keyed by id.
///
/// The outer lock only guards membership. Each record sits behind its own
/// lock, so a launcher writing one job never blocks readers of another and
/// the map lock is released before any record is touched.
#[derive(Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, Arc<RwLock<Job>>>>,
}

impl JobStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new pending job under a freshly allocated id.
    pub async fn create(&self, new_job: NewJob) -> Job {
        let mut jobs = self.jobs.write().await;
        let mut id = JobId::new_v4();
        while jobs.contains_key(&id) {
            id = JobId::new_v4();
        }
        let job = Job::new(id, new_job);
        jobs.insert(id, Arc::new(RwLock::new(job.clone())));
        job
    }

    /// Fetch a copy of the job.
    pub async fn get(&self, id: JobId) -> Result<Job, CoreError> {
        let entry = self.entry(id).await?;
        let job = entry.read().await;
        Ok(job.clone())
    }

    /// Apply `mutation` to the job under its write lock and return the
    /// resulting record.
    pub async fn update<F>(&self, id: JobId, mutation: F) -> Result<Job, CoreError>
    where
        F: FnOnce(&mut Job),
    {
        let entry = self.entry(id).await?;
        let mut job = entry.write().await;
        mutation(&mut job);
        Ok(job.clone())
    }

    /// All jobs, oldest first.
    pub async fn list(&self) -> Vec<Job> {
        let entries: Vec<Arc<RwLock<Job>>> = self.jobs.read().await.values().cloned().collect();
        let mut jobs = Vec::with_capacity(entries.len());
        for entry in entries {
            jobs.push(entry.read().await.clone());
        }
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    /// Number of jobs currently held.
    pub async fn len(&self) -> usize {
        self.jobs.read().await.len()
    }

    /// Number of jobs that are still pending or running.
    pub async fn active_count(&self) -> usize {
        let entries: Vec<Arc<RwLock<Job>>> = self.jobs.read().await.values().cloned().collect();
        let mut count = 0;
        for entry in entries {
            if !entry.read().await.is_terminal() {
                count += 1;
            }
        }
        count
    }

    /// Evict terminal jobs that finished before `cutoff`.
    ///
    /// Pending and running jobs are never removed. Returns how many records
    /// were dropped.
    pub async fn remove_finished_before(&self, cutoff: Timestamp) -> usize {
        let mut jobs = self.jobs.write().await;
        let before = jobs.len();
        jobs.retain(|_, entry| match entry.try_read() {
            Ok(job) => !job.finished_at.is_some_and(|t| t < cutoff),
            // Held by a writer, so the job is still being driven.
            Err(_) => true,
        });
        let removed = before - jobs.len();
        if removed > 0 {
            tracing::debug!(removed, "Evicted finished jobs");
        }
        removed
    }

    async fn entry(&self, id: JobId) -> Result<Arc<RwLock<Job>>, CoreError> {
        self.jobs
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::unknown_job(id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tubefetch_core::job::{FailureReason, JobMode, JobState};

    use super::*;

    fn new_job() -> NewJob {
        NewJob {
            url: "https://example/video".to_string(),
            mode: JobMode::Audio,
            quality: "192".to_string(),
        }
    }

    #[tokio::test]
    async fn create_inserts_pending_job() {
        let store = JobStore::new();
        let job = store.create(new_job()).await;

        assert_eq!(job.state, JobState::Pending);
        assert_eq!(job.progress, 0);
        assert_eq!(store.len().await, 1);

        let fetched = store.get(job.id).await.expect("job exists");
        assert_eq!(fetched.url, "https://example/video");
    }

    #[tokio::test]
    async fn ids_are_unique() {
        let store = JobStore::new();
        let a = store.create(new_job()).await;
        let b = store.create(new_job()).await;
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn get_unknown_is_not_found() {
        let store = JobStore::new();
        assert_matches!(
            store.get(JobId::new_v4()).await,
            Err(CoreError::NotFound { entity: "Job", .. })
        );
    }

    #[tokio::test]
    async fn update_applies_mutation() {
        let store = JobStore::new();
        let job = store.create(new_job()).await;

        let updated = store
            .update(job.id, |j| {
                j.mark_running();
                j.record_line("[download]  37.2%");
            })
            .await
            .expect("job exists");

        assert_eq!(updated.state, JobState::Running);
        assert_eq!(updated.progress, 37);
        assert_eq!(store.get(job.id).await.expect("job exists").progress, 37);
    }

    #[tokio::test]
    async fn update_unknown_is_not_found() {
        let store = JobStore::new();
        let result = store.update(JobId::new_v4(), |j| j.complete()).await;
        assert_matches!(result, Err(CoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_is_ordered_by_creation() {
        let store = JobStore::new();
        let first = store.create(new_job()).await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let second = store.create(new_job()).await;

        let ids: Vec<JobId> = store.list().await.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
    }

    #[tokio::test]
    async fn active_count_skips_terminal_jobs() {
        let store = JobStore::new();
        let a = store.create(new_job()).await;
        let _b = store.create(new_job()).await;
        store
            .update(a.id, |j| j.fail(&FailureReason::Cancelled))
            .await
            .expect("job exists");

        assert_eq!(store.active_count().await, 1);
    }

    #[tokio::test]
    async fn eviction_only_touches_old_terminal_jobs() {
        let store = JobStore::new();
        let finished = store.create(new_job()).await;
        let running = store.create(new_job()).await;
        store
            .update(finished.id, |j| {
                j.mark_running();
                j.complete();
            })
            .await
            .expect("job exists");
        store
            .update(running.id, |j| {
                j.mark_running();
            })
            .await
            .expect("job exists");

        // Cutoff in the past keeps everything.
        let past = chrono::Utc::now() - chrono::Duration::hours(1);
        assert_eq!(store.remove_finished_before(past).await, 0);

        let future = chrono::Utc::now() + chrono::Duration::seconds(1);
        assert_eq!(store.remove_finished_before(future).await, 1);
        assert!(store.get(finished.id).await.is_err());
        assert!(store.get(running.id).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_readers_see_progress_advance() {
        let store = Arc::new(JobStore::new());
        let job = store.create(new_job()).await;
        store
            .update(job.id, |j| {
                j.mark_running();
            })
            .await
            .expect("job exists");

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for pct in 1..=100u8 {
                    store
                        .update(job.id, |j| {
                            j.record_line(&format!("[download] {pct}.0%"));
                        })
                        .await
                        .expect("job exists");
                }
            })
        };

        let mut readers = Vec::new();
        for _ in 0..4 {
            let store = Arc::clone(&store);
            readers.push(tokio::spawn(async move {
                let mut last = 0;
                for _ in 0..50 {
                    let seen = store.get(job.id).await.expect("job exists").progress;
                    assert!(seen >= last, "progress regressed from {last} to {seen}");
                    last = seen;
                    tokio::task::yield_now().await;
                }
            }));
        }

        writer.await.expect("writer task");
        for reader in readers {
            reader.await.expect("reader task");
        }
        assert_eq!(store.get(job.id).await.expect("job exists").progress, 100);
    }
}
