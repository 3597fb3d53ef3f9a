//! Domain types and pure logic for the tubefetch download service.
//!
//! Nothing in this crate performs I/O: the job model and its state
//! machine, the progress-line parser and the `yt-dlp` argument builder are
//! all plain functions so they can be tested without spawning processes.

pub mod error;
pub mod job;
pub mod progress;
pub mod types;
pub mod ytdlp;
