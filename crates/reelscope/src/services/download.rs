//! Video download through the yt-dlp binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info};
use url::Url;

use crate::config::DownloadConfig;
use crate::sanitize;

use super::{last_stderr_line, DownloadError, Downloader};

const UNSUPPORTED_MARKERS: &[&str] = &[
    "unsupported url",
    "no suitable extractor",
    "is not a valid url",
];

const NOT_FOUND_MARKERS: &[&str] = &[
    "video unavailable",
    "private video",
    "this video is private",
    "has been removed",
    "does not exist",
    "no video formats found",
];

// "HTTP Error 404: Not Found" as printed by yt-dlp's extractors
static RE_HTTP_STATUS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)http error (\d{3})").unwrap());

/// Statuses meaning the video is gone rather than temporarily unreachable.
const GONE_STATUSES: &[u16] = &[404, 410];

pub struct YtDlpDownloader {
    binary: String,
    user_agent: String,
    cookies_file: Option<PathBuf>,
    format: String,
}

impl YtDlpDownloader {
    pub fn from_config(config: &DownloadConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            user_agent: config.user_agent.clone(),
            cookies_file: config.cookies_file.as_ref().map(PathBuf::from),
            format: config.format.clone(),
        }
    }

    fn build_args(&self, url: &str, dest: &Path) -> Vec<String> {
        let mut args = vec![
            "-f".to_string(),
            self.format.clone(),
            "--no-playlist".to_string(),
            "--no-check-certificate".to_string(),
            "--no-progress".to_string(),
            "--user-agent".to_string(),
            self.user_agent.clone(),
            "-o".to_string(),
            dest.to_string_lossy().into_owned(),
        ];

        if let Some(cookies) = self.cookies_file.as_ref().filter(|p| p.is_file()) {
            args.push("--cookies".to_string());
            args.push(cookies.to_string_lossy().into_owned());
        }

        args.push(url.to_string());
        args
    }
}

impl Downloader for YtDlpDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<PathBuf, DownloadError> {
        let parsed = Url::parse(url).map_err(|e| DownloadError::Unsupported(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::Unsupported(format!(
                "scheme '{}' is not http(s)",
                parsed.scheme()
            )));
        }

        debug!(url = %sanitize::redact_url(url), "Running {}", self.binary);

        let output = Command::new(&self.binary)
            .args(self.build_args(url, dest))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| DownloadError::Network(format!("failed to run {}: {}", self.binary, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!("{} stderr: {}", self.binary, stderr);
            return Err(classify_stderr(&stderr));
        }

        if !dest.is_file() {
            return Err(DownloadError::Network(format!(
                "{} exited successfully but wrote no file",
                self.binary
            )));
        }

        let size = dest.metadata().map(|m| m.len()).unwrap_or(0);
        info!(
            url = %sanitize::redact_url(url),
            size_mb = size as f64 / (1024.0 * 1024.0),
            "Downloaded video"
        );
        Ok(dest.to_path_buf())
    }
}

/// Maps yt-dlp's stderr to a download error. Anything unrecognized is
/// treated as a transient network problem.
pub fn classify_stderr(stderr: &str) -> DownloadError {
    let lower = stderr.to_lowercase();
    let message = last_stderr_line(stderr.as_bytes());

    let gone = RE_HTTP_STATUS
        .captures(stderr)
        .and_then(|caps| caps[1].parse::<u16>().ok())
        .is_some_and(|status| GONE_STATUSES.contains(&status));

    if UNSUPPORTED_MARKERS.iter().any(|m| lower.contains(m)) {
        DownloadError::Unsupported(message)
    } else if gone || NOT_FOUND_MARKERS.iter().any(|m| lower.contains(m)) {
        DownloadError::NotFound(message)
    } else {
        DownloadError::Network(message)
    }
}
