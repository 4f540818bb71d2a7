//! External collaborators behind narrow traits.
//!
//! The pipeline only sees these traits; the production implementations shell
//! out to yt-dlp and ffmpeg and call the Gemini or OpenAI HTTP APIs.

pub mod ai;
pub mod download;
pub mod preflight;
pub mod transcode;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::{FramesConfig, PromptConfig};
use crate::job::FailureKind;
use crate::pipeline::outcome::{ClassifiedError, FailureClass};

pub use ai::{AnalysisResult, GeminiProvider, OpenAiProvider};
pub use download::YtDlpDownloader;
pub use transcode::FfmpegTranscoder;

pub trait Downloader: Send + Sync {
    /// Downloads `url` to `dest` and returns the written file.
    fn download(&self, url: &str, dest: &Path) -> Result<PathBuf, DownloadError>;
}

pub trait Transcoder: Send + Sync {
    fn extract_audio(&self, video: &Path, dest: &Path) -> Result<PathBuf, TranscodeError>;

    /// Writes ordered `frame_NNN.jpg` files into `dest_dir`.
    fn extract_frames(
        &self,
        video: &Path,
        policy: &FramesConfig,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, TranscodeError>;
}

pub trait AiProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    fn analyze(
        &self,
        audio: &Path,
        frames: &[PathBuf],
        prompt: &PromptConfig,
    ) -> Result<AnalysisResult, ProviderError>;
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Unsupported URL: {0}")]
    Unsupported(String),

    #[error("Video not found: {0}")]
    NotFound(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ClassifiedError for DownloadError {
    fn kind(&self) -> FailureKind {
        match self {
            DownloadError::Unsupported(_) => FailureKind::Unsupported,
            DownloadError::NotFound(_) => FailureKind::NotFound,
            DownloadError::Network(_) => FailureKind::Network,
        }
    }

    fn class(&self) -> FailureClass {
        match self {
            DownloadError::Network(_) => FailureClass::Retryable,
            DownloadError::Unsupported(_) | DownloadError::NotFound(_) => FailureClass::Fatal,
        }
    }
}

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

impl ClassifiedError for TranscodeError {
    fn kind(&self) -> FailureKind {
        match self {
            TranscodeError::Decode(_) => FailureKind::Decode,
            TranscodeError::UnsupportedFormat(_) => FailureKind::UnsupportedFormat,
        }
    }

    fn class(&self) -> FailureClass {
        match self {
            TranscodeError::Decode(_) => FailureClass::Retryable,
            TranscodeError::UnsupportedFormat(_) => FailureClass::Fatal,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Provider error: {message}")]
    Provider { message: String, transient: bool },
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        ProviderError::Provider {
            message: message.into(),
            transient: true,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        ProviderError::Provider {
            message: message.into(),
            transient: false,
        }
    }
}

impl ClassifiedError for ProviderError {
    fn kind(&self) -> FailureKind {
        match self {
            ProviderError::RateLimited(_) => FailureKind::RateLimited,
            ProviderError::InvalidResponse(_) => FailureKind::InvalidResponse,
            ProviderError::Provider { .. } => FailureKind::Provider,
        }
    }

    fn class(&self) -> FailureClass {
        match self {
            ProviderError::RateLimited(_) => FailureClass::Retryable,
            ProviderError::InvalidResponse(_) => FailureClass::Fatal,
            ProviderError::Provider { transient, .. } => {
                if *transient {
                    FailureClass::Retryable
                } else {
                    FailureClass::Fatal
                }
            }
        }
    }
}

/// Reads a child's stderr into a short single-line message.
pub(crate) fn last_stderr_line(stderr: &[u8]) -> String {
    String::from_utf8_lossy(stderr)
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .last()
        .unwrap_or("unknown error")
        .to_string()
}
