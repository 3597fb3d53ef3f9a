//! Percentage extraction from unstructured `yt-dlp` output.
//!
//! The external tool's output format is the least stable part of the
//! system, so the parser lives on its own and knows nothing about jobs or
//! processes. Callers are responsible for clamping and ordering.

use std::sync::LazyLock;

use regex::Regex;

/// A decimal number immediately followed by a percent sign.
const PERCENT_PATTERN: &str = r"(\d+)(?:\.\d+)?%";

static PERCENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(PERCENT_PATTERN).expect("valid regex"));

/// Return the integer part of the first `NN%` / `NN.N%` in `line`.
///
/// Values above 100 are returned unchanged (saturating at `u8::MAX`);
/// clamping to a valid percentage is the caller's job.
pub fn parse_progress(line: &str) -> Option<u8> {
    let caps = PERCENT_RE.captures(line)?;
    let whole = caps.get(1)?.as_str();
    let value = whole.parse::<u64>().unwrap_or(u64::MAX);
    Some(u8::try_from(value).unwrap_or(u8::MAX))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
