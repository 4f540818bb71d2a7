//! Audio and key-frame extraction through the ffmpeg binary.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use tracing::debug;

use crate::config::{FramesConfig, TranscoderConfig};

use super::{last_stderr_line, TranscodeError, Transcoder};

const UNSUPPORTED_MARKERS: &[&str] = &[
    "invalid data found when processing input",
    "could not find codec parameters",
    "unknown format",
    "does not contain any stream",
    "matches no streams",
    "no such file or directory",
];

/// Frame file name pattern; numbering starts at 0.
const FRAME_PATTERN: &str = "frame_%03d.jpg";

pub struct FfmpegTranscoder {
    binary: String,
    audio_quality: u8,
}

impl FfmpegTranscoder {
    pub fn from_config(config: &TranscoderConfig) -> Self {
        Self {
            binary: config.binary.clone(),
            audio_quality: config.audio_quality.min(9),
        }
    }

    fn run(&self, args: &[String]) -> Result<(), TranscodeError> {
        debug!("Running {} {}", self.binary, args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .map_err(|e| TranscodeError::Decode(format!("failed to run {}: {}", self.binary, e)))?;

        if output.status.success() {
            return Ok(());
        }
        Err(classify_stderr(&String::from_utf8_lossy(&output.stderr)))
    }

    fn audio_args(&self, video: &Path, dest: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-v".to_string(),
            "error".to_string(),
            "-i".to_string(),
            video.to_string_lossy().into_owned(),
            "-vn".to_string(),
            "-acodec".to_string(),
            "libmp3lame".to_string(),
            "-q:a".to_string(),
            self.audio_quality.to_string(),
            dest.to_string_lossy().into_owned(),
        ]
    }

    fn frame_args(&self, video: &Path, policy: &FramesConfig, dest_dir: &Path) -> Vec<String> {
        vec![
            "-y".to_string(),
            "-v".to_string(),
            "error".to_string(),
            "-i".to_string(),
            video.to_string_lossy().into_owned(),
            "-vf".to_string(),
            format!("fps=1/{}", policy.interval_secs.max(1)),
            "-frames:v".to_string(),
            policy.max_frames.max(1).to_string(),
            "-q:v".to_string(),
            "2".to_string(),
            "-start_number".to_string(),
            "0".to_string(),
            dest_dir.join(FRAME_PATTERN).to_string_lossy().into_owned(),
        ]
    }
}

impl Transcoder for FfmpegTranscoder {
    fn extract_audio(&self, video: &Path, dest: &Path) -> Result<PathBuf, TranscodeError> {
        self.run(&self.audio_args(video, dest))?;
        if !dest.is_file() {
            return Err(TranscodeError::Decode(format!(
                "{} produced no audio file",
                self.binary
            )));
        }
        Ok(dest.to_path_buf())
    }

    fn extract_frames(
        &self,
        video: &Path,
        policy: &FramesConfig,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, TranscodeError> {
        std::fs::create_dir_all(dest_dir)
            .map_err(|e| TranscodeError::Decode(format!("cannot create frame directory: {}", e)))?;

        self.run(&self.frame_args(video, policy, dest_dir))?;

        let frames = list_frames(dest_dir)
            .map_err(|e| TranscodeError::Decode(format!("cannot list frames: {}", e)))?;
        if frames.is_empty() {
            return Err(TranscodeError::UnsupportedFormat(
                "input has no decodable video frames".to_string(),
            ));
        }
        Ok(frames)
    }
}

/// Lists `*.jpg` files of a frame directory in name order.
pub fn list_frames(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut frames: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("jpg"))
        })
        .collect();
    frames.sort();
    Ok(frames)
}

/// Maps ffmpeg's stderr to a transcode error. Unrecognized failures are
/// treated as transient decode errors.
pub fn classify_stderr(stderr: &str) -> TranscodeError {
    let lower = stderr.to_lowercase();
    let message = last_stderr_line(stderr.as_bytes());
    if UNSUPPORTED_MARKERS.iter().any(|m| lower.contains(m)) {
        TranscodeError::UnsupportedFormat(message)
    } else {
        TranscodeError::Decode(message)
    }
}
