//! WebSocket endpoints.
//!
//! Each connection follows a single job and is driven by its own notifier
//! subscription; there is no shared connection registry.

mod job_stream;

pub use job_stream::job_stream_handler;
