//! Download job engine.
//!
//! The launcher runs `yt-dlp` for one job and records its outcome, the
//! notifier turns a job record into a stream of status snapshots, and the
//! gateway ties both to the job store for the HTTP layer.

pub mod gateway;
pub mod launcher;
pub mod notifier;

pub use gateway::JobService;
