use std::fmt;

use serde::{Deserialize, Serialize};

/// Pipeline stage of a job.
///
/// Declaration order is the forward order of the pipeline; `Failed` is
/// reachable from every non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Queued,
    Downloading,
    ExtractingAudio,
    ExtractingFrames,
    Analyzing,
    Exporting,
    Done,
    Failed,
}

impl Stage {
    /// Stages that perform work and produce an artifact, in pipeline order.
    pub const WORK: [Stage; 5] = [
        Stage::Downloading,
        Stage::ExtractingAudio,
        Stage::ExtractingFrames,
        Stage::Analyzing,
        Stage::Exporting,
    ];

    /// The stage that follows a successful completion of `self`.
    pub fn next(self) -> Option<Stage> {
        match self {
            Stage::Queued => Some(Stage::Downloading),
            Stage::Downloading => Some(Stage::ExtractingAudio),
            Stage::ExtractingAudio => Some(Stage::ExtractingFrames),
            Stage::ExtractingFrames => Some(Stage::Analyzing),
            Stage::Analyzing => Some(Stage::Exporting),
            Stage::Exporting => Some(Stage::Done),
            Stage::Done | Stage::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Done | Stage::Failed)
    }

    /// The artifact a work stage produces.
    pub fn artifact_kind(self) -> Option<ArtifactKind> {
        match self {
            Stage::Downloading => Some(ArtifactKind::VideoFile),
            Stage::ExtractingAudio => Some(ArtifactKind::AudioFile),
            Stage::ExtractingFrames => Some(ArtifactKind::FrameSet),
            Stage::Analyzing => Some(ArtifactKind::AnalysisResult),
            Stage::Exporting => Some(ArtifactKind::Export),
            _ => None,
        }
    }

    /// Only the analysis stage talks to the external AI provider.
    pub fn uses_provider(self) -> bool {
        matches!(self, Stage::Analyzing)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Queued => write!(f, "Queued"),
            Stage::Downloading => write!(f, "Downloading"),
            Stage::ExtractingAudio => write!(f, "ExtractingAudio"),
            Stage::ExtractingFrames => write!(f, "ExtractingFrames"),
            Stage::Analyzing => write!(f, "Analyzing"),
            Stage::Exporting => write!(f, "Exporting"),
            Stage::Done => write!(f, "Done"),
            Stage::Failed => write!(f, "Failed"),
        }
    }
}

/// Kind of artifact persisted for a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    VideoFile,
    AudioFile,
    FrameSet,
    AnalysisResult,
    Export,
}

impl ArtifactKind {
    /// File (or directory) name inside the job directory.
    pub fn file_name(self) -> &'static str {
        match self {
            ArtifactKind::VideoFile => "video.mp4",
            ArtifactKind::AudioFile => "audio.mp3",
            ArtifactKind::FrameSet => "frames",
            ArtifactKind::AnalysisResult => "analysis.json",
            ArtifactKind::Export => "export.json",
        }
    }

    pub fn is_directory(self) -> bool {
        matches!(self, ArtifactKind::FrameSet)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::VideoFile => write!(f, "video"),
            ArtifactKind::AudioFile => write!(f, "audio"),
            ArtifactKind::FrameSet => write!(f, "frames"),
            ArtifactKind::AnalysisResult => write!(f, "analysis"),
            ArtifactKind::Export => write!(f, "export"),
        }
    }
}
