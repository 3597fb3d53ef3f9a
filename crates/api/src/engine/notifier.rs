//! Per-subscriber status streams.
//!
//! Each subscription polls the job store on its own interval and yields the
//! current snapshot; nothing is queued between polls, so a slow consumer
//! simply sees a fresher value next time. The stream ends right after the
//! first terminal snapshot.

use std::sync::Arc;
use std::time::Duration;

use futures::Stream;
use tokio::time::{Interval, MissedTickBehavior};
use tubefetch_core::job::JobSnapshot;
use tubefetch_core::types::JobId;
use tubefetch_store::JobStore;

struct Subscription {
    store: Arc<JobStore>,
    id: JobId,
    ticker: Interval,
    seen: bool,
    finished: bool,
}

/// Stream snapshots of job `id` every `interval` until it is terminal.
///
/// The first snapshot is yielded immediately. An id that was never issued
/// yields a single unknown-job snapshot; a record evicted mid-stream yields
/// a single "disappeared" snapshot.
pub fn subscribe(
    store: Arc<JobStore>,
    id: JobId,
    interval: Duration,
) -> impl Stream<Item = JobSnapshot> + Send + 'static {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let subscription = Subscription {
        store,
        id,
        ticker,
        seen: false,
        finished: false,
    };

    futures::stream::unfold(subscription, |mut sub| async move {
        if sub.finished {
            return None;
        }
        sub.ticker.tick().await;

        let snapshot = match sub.store.get(sub.id).await {
            Ok(job) => {
                sub.finished = job.is_terminal();
                job.snapshot()
            }
            Err(_) => {
                sub.finished = true;
                if sub.seen {
                    JobSnapshot::vanished()
                } else {
                    JobSnapshot::unknown()
                }
            }
        };
        sub.seen = true;

        Some((snapshot, sub))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
