//! `yt-dlp` command-line construction.
//!
//! Only argument vectors are built here; spawning and supervising the
//! process is the launcher's concern.

use std::path::Path;

use crate::job::{JobMode, VIDEO_QUALITY_BEST};

/// Container audio is extracted to.
pub const AUDIO_FORMAT: &str = "mp3";

/// Container video streams are merged into.
pub const MERGE_FORMAT: &str = "mp4";

/// Output file name template, relative to the download directory.
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

/// Everything needed to build one `yt-dlp` invocation.
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub url: &'a str,
    pub mode: JobMode,
    pub quality: &'a str,
    pub download_dir: &'a Path,
    /// Extra arguments placed before the mode flags (cookies, runtimes).
    pub extra_args: &'a [String],
}

/// `-f` selector for a video quality token.
pub fn video_format_selector(quality: &str) -> String {
    if quality == VIDEO_QUALITY_BEST {
        "bestvideo+bestaudio/best".to_string()
    } else {
        format!("bv*[height<={quality}]+ba/b")
    }
}

/// Full output path template rooted at `download_dir`.
pub fn output_template(download_dir: &Path) -> String {
    download_dir.join(OUTPUT_TEMPLATE).to_string_lossy().into_owned()
}

/// Build the argument vector (without the program name).
///
/// The url always comes last, after `--`, so it can never be read as an
/// option.
pub fn build_args(inv: &Invocation<'_>) -> Vec<String> {
    let mut args: Vec<String> = inv.extra_args.to_vec();

    match inv.mode {
        JobMode::Audio => {
            args.extend([
                "-x".to_string(),
                "--audio-format".to_string(),
                AUDIO_FORMAT.to_string(),
                "--audio-quality".to_string(),
                format!("{}K", inv.quality),
            ]);
        }
        JobMode::Video => {
            args.extend([
                "-f".to_string(),
                video_format_selector(inv.quality),
                "--merge-output-format".to_string(),
                MERGE_FORMAT.to_string(),
            ]);
        }
    }

    args.extend([
        "--newline".to_string(),
        "--no-playlist".to_string(),
        "-o".to_string(),
        output_template(inv.download_dir),
        "--".to_string(),
        inv.url.to_string(),
    ]);
    args
}

/// Credential-related arguments.
///
/// The cookies file is only passed when it exists; an empty `js_runtimes`
/// disables that flag.
pub fn credential_args(cookies_file: Option<&Path>, js_runtimes: &str) -> Vec<String> {
    let mut args = Vec::new();
    if let Some(path) = cookies_file.filter(|p| p.is_file()) {
        args.push("--cookies".to_string());
        args.push(path.to_string_lossy().into_owned());
    }
    let js_runtimes = js_runtimes.trim();
    if !js_runtimes.is_empty() {
        args.push("--js-runtimes".to_string());
        args.push(js_runtimes.to_string());
    }
    args
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn args_for(mode: JobMode, quality: &str) -> Vec<String> {
        let dir = PathBuf::from("downloads");
        build_args(&Invocation {
            url: "https://example/video",
            mode,
            quality,
            download_dir: &dir,
            extra_args: &[],
        })
    }

    fn has_pair(args: &[String], flag: &str, value: &str) -> bool {
        args.windows(2).any(|w| w[0] == flag && w[1] == value)
    }

    #[test]
    fn audio_extracts_mp3_at_bitrate() {
        let args = args_for(JobMode::Audio, "192");
        assert!(args.contains(&"-x".to_string()));
        assert!(has_pair(&args, "--audio-format", "mp3"));
        assert!(has_pair(&args, "--audio-quality", "192K"));
        assert!(args.contains(&"--no-playlist".to_string()));
        assert!(!args.contains(&"-f".to_string()));
    }

    #[test]
    fn video_best_uses_best_combined_stream() {
        let args = args_for(JobMode::Video, "best");
        assert!(has_pair(&args, "-f", "bestvideo+bestaudio/best"));
        assert!(has_pair(&args, "--merge-output-format", "mp4"));
    }

    #[test]
    fn video_height_is_capped() {
        let args = args_for(JobMode::Video, "720");
        assert!(has_pair(&args, "-f", "bv*[height<=720]+ba/b"));
    }

    #[test]
    fn output_template_and_url_come_last() {
        let args = args_for(JobMode::Audio, "320");
        let n = args.len();
        let expected = PathBuf::from("downloads")
            .join("%(title)s.%(ext)s")
            .to_string_lossy()
            .into_owned();
        assert_eq!(args[n - 4], "-o");
        assert_eq!(args[n - 3], expected);
        assert_eq!(args[n - 2], "--");
        assert_eq!(args[n - 1], "https://example/video");
    }

    #[test]
    fn extra_args_are_prepended() {
        let dir = PathBuf::from("downloads");
        let extra = vec!["--js-runtimes".to_string(), "deno".to_string()];
        let args = build_args(&Invocation {
            url: "https://example/video",
            mode: JobMode::Video,
            quality: "1080",
            download_dir: &dir,
            extra_args: &extra,
        });
        assert_eq!(&args[..2], extra.as_slice());
    }

    #[test]
    fn credential_args_skip_missing_cookies() {
        let args = credential_args(Some(Path::new("/definitely/not/here.txt")), "");
        assert!(args.is_empty());
    }

    #[test]
    fn credential_args_pass_js_runtimes() {
        let args = credential_args(None, " node:/usr/bin/node ");
        assert_eq!(args, vec!["--js-runtimes", "node:/usr/bin/node"]);
    }
}
