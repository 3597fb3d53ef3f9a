//! Periodic eviction of finished jobs.
//!
//! Terminal job records are kept in memory so late pollers can still read
//! the outcome. This task drops the ones that finished longer ago than the
//! configured retention period.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tubefetch_store::JobStore;

/// How often the sweep runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the job retention loop until `cancel` is triggered.
pub async fn run(store: Arc<JobStore>, retention: Duration, cancel: CancellationToken) {
    tracing::info!(
        retention_secs = retention.as_secs(),
        interval_secs = SWEEP_INTERVAL.as_secs(),
        "Job retention task started"
    );

    let mut interval = tokio::time::interval(SWEEP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Job retention task stopping");
                break;
            }
            _ = interval.tick() => {
                sweep(&store, retention).await;
            }
        }
    }
}

/// Evict every job that finished more than `retention` ago.
pub async fn sweep(store: &JobStore, retention: Duration) -> usize {
    let retention =
        chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::days(36_500));
    let cutoff = Utc::now() - retention;

    let evicted = store.remove_finished_before(cutoff).await;
    if evicted > 0 {
        tracing::info!(evicted, "Job retention: evicted finished jobs");
    } else {
        tracing::debug!("Job retention: nothing to evict");
    }
    evicted
}
