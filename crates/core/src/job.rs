//! Download job model, submission validation and the job state machine.
//!
//! A [`Job`] only moves forward: `pending -> running -> {done, failed}`
//! (or straight from `pending` to `failed` when the tool cannot be
//! started). Every mutator is a no-op once the job is terminal, so callers
//! never need to re-check state before writing.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::progress::parse_progress;
use crate::types::{JobId, Timestamp};

// ---------------------------------------------------------------------------
// Mode and quality constants
// ---------------------------------------------------------------------------

/// Audio bitrates (kbit/s) accepted for `audio` jobs.
pub const AUDIO_QUALITIES: &[&str] = &["320", "192", "128"];

/// Sentinel quality selecting the best available video stream.
pub const VIDEO_QUALITY_BEST: &str = "best";

/// Height caps accepted for `video` jobs, plus [`VIDEO_QUALITY_BEST`].
pub const VIDEO_QUALITIES: &[&str] = &[VIDEO_QUALITY_BEST, "1080", "720"];

/// Mode used when a submission omits it.
pub const DEFAULT_MODE: &str = "audio";

/// Quality used when a submission omits it.
pub const DEFAULT_QUALITY: &str = "320";

/// Error text of an unknown-job snapshot.
pub const UNKNOWN_JOB_MESSAGE: &str = "Unknown job_id";

/// Error text when a job record is evicted while being watched.
pub const VANISHED_JOB_MESSAGE: &str = "Job disappeared";

/// What the external tool should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobMode {
    Audio,
    Video,
}

impl JobMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Audio => "audio",
            Self::Video => "video",
        }
    }

    /// Quality tokens accepted for this mode.
    pub fn allowed_qualities(self) -> &'static [&'static str] {
        match self {
            Self::Audio => AUDIO_QUALITIES,
            Self::Video => VIDEO_QUALITIES,
        }
    }
}

impl std::str::FromStr for JobMode {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "audio" => Ok(Self::Audio),
            "video" => Ok(Self::Video),
            other => Err(CoreError::Validation(format!(
                "Unknown mode: '{other}'. Valid modes: audio, video"
            ))),
        }
    }
}

impl std::fmt::Display for JobMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }
}

// ---------------------------------------------------------------------------
// Submission
// ---------------------------------------------------------------------------

/// Raw submission body. Fields are validated by [`DownloadRequest::validate`].
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadRequest {
    #[serde(default)]
    pub url: String,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_quality")]
    pub quality: String,
}

fn default_mode() -> String {
    DEFAULT_MODE.to_string()
}

fn default_quality() -> String {
    DEFAULT_QUALITY.to_string()
}

/// A validated submission, ready to be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewJob {
    pub url: String,
    pub mode: JobMode,
    pub quality: String,
}

impl DownloadRequest {
    /// Check the request and turn it into a [`NewJob`].
    ///
    /// Rejects an empty url, an unknown mode, or a quality outside the
    /// allowed set for the mode. The url is trimmed.
    pub fn validate(self) -> Result<NewJob, CoreError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(CoreError::Validation("url is required".to_string()));
        }

        let mode: JobMode = self.mode.trim().parse()?;

        let quality = self.quality.trim();
        let allowed = mode.allowed_qualities();
        if !allowed.contains(&quality) {
            return Err(CoreError::Validation(format!(
                "Unknown {mode} quality: '{quality}'. Valid qualities: {}",
                allowed.join(", ")
            )));
        }

        Ok(NewJob {
            url: url.to_string(),
            mode,
            quality: quality.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Failure reasons
// ---------------------------------------------------------------------------

/// Why a job ended in [`JobState::Failed`].
///
/// The `Display` text is what gets stored as the job error, except for
/// process exits where the last diagnostic line from the tool is more
/// useful and takes precedence (see [`Job::fail`]).
#[derive(Debug, thiserror::Error)]
pub enum FailureReason {
    #[error("failed to start external tool: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("external tool failed with code {0}")]
    ExitCode(i32),

    #[error("external tool terminated by signal")]
    Signal,

    #[error("failed to wait for external tool: {0}")]
    Wait(#[source] std::io::Error),

    #[error("cancelled")]
    Cancelled,

    #[error("idle timeout: no output for {secs}s")]
    Idle { secs: u64 },

    #[error("launcher crashed: {0}")]
    Crashed(String),
}

impl FailureReason {
    /// Whether the tool's own last output line describes this failure better
    /// than the synthesized text.
    fn prefers_diagnostic(&self) -> bool {
        matches!(self, Self::ExitCode(_) | Self::Signal)
    }
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One download job as stored in the job store.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: JobId,
    pub url: String,
    pub mode: JobMode,
    pub quality: String,
    pub progress: u8,
    pub state: JobState,
    pub last_message: Option<String>,
    pub error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

impl Job {
    /// Build a fresh pending job with zero progress.
    pub fn new(id: JobId, new_job: NewJob) -> Self {
        let now = chrono::Utc::now();
        Self {
            id,
            url: new_job.url,
            mode: new_job.mode,
            quality: new_job.quality,
            progress: 0,
            state: JobState::Pending,
            last_message: None,
            error: None,
            created_at: now,
            updated_at: now,
            finished_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    /// Move a pending job to running. Returns `false` for any other state.
    pub fn mark_running(&mut self) -> bool {
        if self.state != JobState::Pending {
            return false;
        }
        self.state = JobState::Running;
        self.touch();
        true
    }

    /// Record one line of tool output.
    ///
    /// Empty lines are ignored. Otherwise the line becomes `last_message`
    /// and, if it carries a percentage, progress advances to it (clamped
    /// to 100) unless that would move backwards. Returns the new progress
    /// when it changed.
    pub fn record_line(&mut self, line: &str) -> Option<u8> {
        if self.is_terminal() {
            return None;
        }
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        self.last_message = Some(line.to_string());
        self.touch();

        let percent = parse_progress(line)?.min(100);
        if self.state == JobState::Running && percent > self.progress {
            self.progress = percent;
            return Some(percent);
        }
        None
    }

    /// Finish successfully: progress is forced to 100.
    pub fn complete(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.progress = 100;
        self.state = JobState::Done;
        self.finish();
    }

    /// Finish with a failure. Progress is left where it was.
    pub fn fail(&mut self, reason: &FailureReason) {
        if self.is_terminal() {
            return;
        }
        let diagnostic = self
            .last_message
            .as_deref()
            .filter(|m| reason.prefers_diagnostic() && !m.is_empty());
        let message = match diagnostic {
            Some(m) => m.to_string(),
            None => reason.to_string(),
        };
        self.error = Some(message);
        self.state = JobState::Failed;
        self.finish();
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            progress: self.progress,
            state: Some(self.state),
            done: self.is_terminal(),
            error: self.error.clone(),
        }
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now();
    }

    fn finish(&mut self) {
        self.touch();
        self.finished_at = Some(self.updated_at);
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of a job, as pushed to observers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<JobState>,
    pub done: bool,
    pub error: Option<String>,
}

impl JobSnapshot {
    /// Terminal snapshot for an id that was never issued.
    pub fn unknown() -> Self {
        Self::terminal_error(UNKNOWN_JOB_MESSAGE)
    }

    /// Terminal snapshot for a record that vanished mid-subscription.
    pub fn vanished() -> Self {
        Self::terminal_error(VANISHED_JOB_MESSAGE)
    }

    fn terminal_error(message: &str) -> Self {
        Self {
            progress: 0,
            state: None,
            done: true,
            error: Some(message.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
