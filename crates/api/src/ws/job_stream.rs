use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::stream::BoxStream;
use futures::{SinkExt, StreamExt};
use tubefetch_core::job::JobSnapshot;

use crate::engine::JobService;
use crate::handlers::downloads::parse_job_id;
use crate::state::AppState;

/// HTTP handler that upgrades the connection to a job status stream.
///
/// Unknown ids, malformed ones included, are not rejected here: the stream
/// sends a single terminal snapshot saying so and then closes.
pub async fn job_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state.jobs, raw_id))
}

fn snapshots_for(jobs: &JobService, raw_id: &str) -> BoxStream<'static, JobSnapshot> {
    match parse_job_id(raw_id) {
        Ok(id) => jobs.subscribe(id).boxed(),
        Err(_) => futures::stream::once(async { JobSnapshot::unknown() }).boxed(),
    }
}

/// Push one JSON text frame per snapshot until the job is done, then close.
///
/// Inbound frames are only watched for Close; a client that goes away ends
/// the subscription without touching the job.
async fn handle_socket(socket: WebSocket, jobs: Arc<JobService>, job_id: String) {
    tracing::info!(job_id = %job_id, "Job stream connected");

    let (mut sink, mut inbound) = socket.split();
    let mut snapshots = snapshots_for(&jobs, &job_id);

    loop {
        tokio::select! {
            next = snapshots.next() => {
                let Some(snapshot) = next else {
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                };
                let text = match serde_json::to_string(&snapshot) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(job_id = %job_id, error = %e, "Failed to encode snapshot");
                        break;
                    }
                };
                if sink.send(Message::Text(text.into())).await.is_err() {
                    tracing::debug!(job_id = %job_id, "Job stream sink closed");
                    break;
                }
            }
            msg = inbound.next() => match msg {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!(job_id = %job_id, error = %e, "Job stream receive error");
                    break;
                }
            }
        }
    }

    tracing::info!(job_id = %job_id, "Job stream disconnected");
}
