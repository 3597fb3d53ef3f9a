//! Child-process driver for download jobs.
//!
//! [`JobLauncher::start`] spawns one `yt-dlp` process per job and hands it to
//! a supervised task. The child's stdout and stderr share a single pipe, so
//! the driver sees lines in the order the tool wrote them. Every line is fed
//! into the job record, and the process outcome (exit, cancellation, idle
//! timeout, crash) becomes a terminal state. The driver is the only writer
//! of its job.

use std::future::Future;
use std::os::fd::OwnedFd;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::net::unix::pipe;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tubefetch_core::job::{FailureReason, Job, JobState};
use tubefetch_core::types::JobId;
use tubefetch_core::ytdlp::{self, Invocation};
use tubefetch_store::JobStore;

/// Lines buffered between the output readers and the driver.
const LINE_BUFFER: usize = 256;

/// Longest line kept from the tool's output; the rest is dropped.
const MAX_LINE_BYTES: usize = 8 * 1024;

/// How the launcher invokes the external tool.
#[derive(Debug, Clone)]
pub struct LauncherSettings {
    /// Executable to run (normally `yt-dlp`).
    pub program: String,
    /// Root of the output path template.
    pub download_dir: PathBuf,
    /// Arguments placed before the generated ones.
    pub extra_args: Vec<String>,
    /// Time between SIGTERM and SIGKILL on cancellation.
    pub cancel_grace: Duration,
    /// Fail the job when the tool is silent this long.
    pub idle_timeout: Option<Duration>,
}

/// Spawns and supervises one external process per job.
pub struct JobLauncher {
    store: Arc<JobStore>,
    settings: LauncherSettings,
}

impl JobLauncher {
    pub fn new(store: Arc<JobStore>, settings: LauncherSettings) -> Self {
        Self { store, settings }
    }

    /// Build the command for `job` without spawning it or wiring its output.
    pub fn command(&self, job: &Job) -> Command {
        let args = ytdlp::build_args(&Invocation {
            url: &job.url,
            mode: job.mode,
            quality: &job.quality,
            download_dir: &self.settings.download_dir,
            extra_args: &self.settings.extra_args,
        });

        let mut cmd = Command::new(&self.settings.program);
        cmd.args(args).stdin(Stdio::null()).kill_on_drop(true);
        // Own process group so cancellation also reaches the tool's helpers
        // (ffmpeg) and terminal signals do not.
        cmd.process_group(0);
        cmd
    }

    /// Spawn the external tool for `job` and start driving it.
    ///
    /// If the process cannot be spawned the job is marked failed before this
    /// returns and `None` is returned. Otherwise the job is running and the
    /// returned handle resolves once it has reached a terminal state.
    pub async fn start(
        self: &Arc<Self>,
        job: &Job,
        cancel: CancellationToken,
    ) -> Option<JoinHandle<()>> {
        let id = job.id;

        let (child, output) = match spawn_with_merged_output(self.command(job)) {
            Ok(spawned) => spawned,
            Err(e) => {
                tracing::warn!(
                    job_id = %id,
                    program = %self.settings.program,
                    error = %e,
                    "Failed to spawn external tool",
                );
                self.finish(id, Err(FailureReason::Spawn(e))).await;
                return None;
            }
        };

        tracing::info!(
            job_id = %id,
            pid = child.id(),
            mode = %job.mode,
            quality = %job.quality,
            "External tool started",
        );

        if let Err(e) = self.store.update(id, |j| {
            j.mark_running();
        })
        .await
        {
            tracing::warn!(job_id = %id, error = %e, "Job vanished before it started");
        }

        let driver = Arc::clone(self).drive(id, child, output, cancel);
        Some(tokio::spawn(Arc::clone(self).supervise(id, driver)))
    }

    /// Run `driver` in its own task and record whatever way it ends,
    /// including a panic.
    async fn supervise<F>(self: Arc<Self>, id: JobId, driver: F)
    where
        F: Future<Output = Result<(), FailureReason>> + Send + 'static,
    {
        let outcome = match tokio::spawn(driver).await {
            Ok(outcome) => outcome,
            Err(e) => Err(join_failure(id, e)),
        };

        self.finish(id, outcome).await;
    }

    /// Pump output lines into the job record until the process exits, is
    /// cancelled, or goes idle.
    async fn drive(
        self: Arc<Self>,
        id: JobId,
        mut child: Child,
        output: pipe::Receiver,
        cancel: CancellationToken,
    ) -> Result<(), FailureReason> {
        let mut lines = spawn_line_reader(output);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    self.terminate(id, &mut child).await;
                    return Err(FailureReason::Cancelled);
                }
                next = within(self.settings.idle_timeout, lines.recv()) => match next {
                    Some(Some(line)) => self.apply_line(id, &line).await,
                    Some(None) => break,
                    None => {
                        self.terminate(id, &mut child).await;
                        return Err(self.idle_failure());
                    }
                },
            }
        }

        let status = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                self.terminate(id, &mut child).await;
                return Err(FailureReason::Cancelled);
            }
            status = within(self.settings.idle_timeout, child.wait()) => match status {
                Some(status) => status.map_err(FailureReason::Wait)?,
                None => {
                    self.terminate(id, &mut child).await;
                    return Err(self.idle_failure());
                }
            },
        };

        tracing::debug!(job_id = %id, %status, "External tool exited");

        if status.success() {
            Ok(())
        } else {
            match status.code() {
                Some(code) => Err(FailureReason::ExitCode(code)),
                None => Err(FailureReason::Signal),
            }
        }
    }

    async fn apply_line(&self, id: JobId, line: &str) {
        let mut advanced = None;
        let result = self
            .store
            .update(id, |job| advanced = job.record_line(line))
            .await;

        match result {
            Ok(_) => {
                if let Some(progress) = advanced {
                    tracing::debug!(job_id = %id, progress, "Progress advanced");
                }
            }
            Err(e) => tracing::warn!(job_id = %id, error = %e, "Dropped output line"),
        }
    }

    /// Write the terminal state for `id`.
    async fn finish(&self, id: JobId, outcome: Result<(), FailureReason>) {
        let result = self
            .store
            .update(id, |job| match &outcome {
                Ok(()) => job.complete(),
                Err(reason) => job.fail(reason),
            })
            .await;

        match result {
            Ok(job) if job.state == JobState::Done => {
                tracing::info!(job_id = %id, "Job finished");
            }
            Ok(job) => {
                tracing::warn!(
                    job_id = %id,
                    error = job.error.as_deref().unwrap_or_default(),
                    "Job failed",
                );
            }
            Err(e) => {
                tracing::warn!(job_id = %id, error = %e, "Could not record job outcome");
            }
        }
    }

    /// Ask the process group to exit, then kill it after the grace period.
    async fn terminate(&self, id: JobId, child: &mut Child) {
        if let Some(pid) = child.id() {
            match signal_group(pid, libc::SIGTERM) {
                Ok(()) => {
                    match tokio::time::timeout(self.settings.cancel_grace, child.wait()).await {
                        Ok(Ok(status)) => {
                            tracing::debug!(job_id = %id, %status, "External tool terminated");
                            // Helpers that ignored SIGTERM must not outlive the job.
                            let _ = signal_group(pid, libc::SIGKILL);
                            return;
                        }
                        Ok(Err(e)) => {
                            tracing::warn!(job_id = %id, error = %e, "Wait after SIGTERM failed");
                        }
                        Err(_) => {
                            tracing::warn!(
                                job_id = %id,
                                grace_ms = self.settings.cancel_grace.as_millis() as u64,
                                "External tool ignored SIGTERM, killing",
                            );
                        }
                    }
                    let _ = signal_group(pid, libc::SIGKILL);
                }
                Err(e) => {
                    tracing::warn!(job_id = %id, pid, error = %e, "Failed to send SIGTERM");
                }
            }
        }

        if let Err(e) = child.kill().await {
            tracing::warn!(job_id = %id, error = %e, "Failed to kill external tool");
        }
    }

    fn idle_failure(&self) -> FailureReason {
        FailureReason::Idle {
            secs: self.settings.idle_timeout.unwrap_or_default().as_secs(),
        }
    }
}

/// Await `fut`, giving up after `limit` if one is set.
async fn within<F: Future>(limit: Option<Duration>, fut: F) -> Option<F::Output> {
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Translate a driver task that did not return normally into a failure.
fn join_failure(id: JobId, err: JoinError) -> FailureReason {
    if err.is_panic() {
        let payload = err.into_panic();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(job_id = %id, panic = %message, "Launcher task panicked");
        FailureReason::Crashed(message)
    } else {
        FailureReason::Cancelled
    }
}

/// Send `signal` to the process group led by `pid`.
fn signal_group(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pid).map_err(std::io::Error::other)?;
    // SAFETY: `kill` has no memory-safety preconditions; the group was
    // created for a child this launcher still owns.
    let rc = unsafe { libc::kill(-pgid, signal) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Spawn `cmd` with stdout and stderr both writing into one pipe.
///
/// The parent's copies of the write end are dropped with `cmd`, so the read
/// end reaches EOF once the child and anything inheriting its output exit.
fn spawn_with_merged_output(mut cmd: Command) -> std::io::Result<(Child, pipe::Receiver)> {
    let (reader, writer) = std::io::pipe()?;
    let writer_err = writer.try_clone()?;
    cmd.stdout(writer).stderr(writer_err);

    let child = cmd.spawn()?;
    drop(cmd);

    let output = pipe::Receiver::from_owned_fd(OwnedFd::from(reader))?;
    Ok((child, output))
}

/// Read the merged output into a channel of lines.
///
/// The channel closes at EOF.
fn spawn_line_reader(output: pipe::Receiver) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(LINE_BUFFER);
    tokio::spawn(forward_lines(output, tx));
    rx
}

/// Split `stream` on `\n` and `\r` and send each non-empty line.
///
/// Carriage returns count as separators because progress bars redraw in
/// place. Bytes are decoded lossily once a line is complete.
async fn forward_lines<R>(stream: R, tx: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(stream);
    let mut line: Vec<u8> = Vec::new();

    loop {
        let mut ready = Vec::new();
        let consumed = match reader.fill_buf().await {
            Ok(chunk) if chunk.is_empty() => break,
            Ok(chunk) => {
                for &byte in chunk {
                    if byte == b'\n' || byte == b'\r' {
                        if !line.is_empty() {
                            ready.push(String::from_utf8_lossy(&line).into_owned());
                            line.clear();
                        }
                    } else if line.len() < MAX_LINE_BYTES {
                        line.push(byte);
                    }
                }
                chunk.len()
            }
            Err(e) => {
                tracing::debug!(error = %e, "Output stream read failed");
                break;
            }
        };
        reader.consume(consumed);

        for text in ready {
            if tx.send(text).await.is_err() {
                return;
            }
        }
    }

    if !line.is_empty() {
        let _ = tx.send(String::from_utf8_lossy(&line).into_owned()).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
