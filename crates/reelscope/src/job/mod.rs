//! Per-video job state.
//!
//! A [`Job`] tracks one URL through the pipeline. Its stage only moves
//! forward; retries re-enter the current stage and are counted in
//! `attempts` without producing a transition. Mutation is crate-private so
//! only the stage executor and pipeline runner can drive the state machine.

pub mod id;
pub mod stage;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use id::JobId;
pub use stage::{ArtifactKind, Stage};

/// Reference to a persisted artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
}

impl ArtifactRef {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

/// What went wrong, independent of whether it was retryable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Unsupported,
    NotFound,
    Network,
    Decode,
    UnsupportedFormat,
    RateLimited,
    InvalidResponse,
    Provider,
    Storage,
    /// A collaborator panicked while the job was running.
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureKind::Unsupported => "unsupported",
            FailureKind::NotFound => "not_found",
            FailureKind::Network => "network",
            FailureKind::Decode => "decode",
            FailureKind::UnsupportedFormat => "unsupported_format",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::InvalidResponse => "invalid_response",
            FailureKind::Provider => "provider",
            FailureKind::Storage => "storage",
            FailureKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Last error of a failed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureDescriptor {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
    /// True when the error was retryable but the attempt cap was reached.
    #[serde(default)]
    pub retries_exhausted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: Stage,
    pub to: Stage,
    pub at: DateTime<Utc>,
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum JobError {
    #[error("Job {id} is terminal ({stage}) and cannot change")]
    Terminal { id: JobId, stage: Stage },

    #[error("Invalid transition for job {id}: {from} -> {to}")]
    InvalidTransition { id: JobId, from: Stage, to: Stage },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    id: JobId,
    url: String,
    normalized_url: String,
    stage: Stage,
    #[serde(default)]
    artifacts: BTreeMap<ArtifactKind, ArtifactRef>,
    #[serde(default)]
    attempts: BTreeMap<Stage, u32>,
    #[serde(default)]
    failure: Option<FailureDescriptor>,
    #[serde(default)]
    history: Vec<StageTransition>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a queued job. The id is derived from `normalized_url`.
    pub fn new(url: impl Into<String>, normalized_url: impl Into<String>) -> Self {
        let normalized_url = normalized_url.into();
        let now = Utc::now();
        Self {
            id: JobId::from_normalized(&normalized_url),
            url: url.into(),
            normalized_url,
            stage: Stage::Queued,
            artifacts: BTreeMap::new(),
            attempts: BTreeMap::new(),
            failure: None,
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn normalized_url(&self) -> &str {
        &self.normalized_url
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    pub fn artifacts(&self) -> &BTreeMap<ArtifactKind, ArtifactRef> {
        &self.artifacts
    }

    pub fn artifact(&self, kind: ArtifactKind) -> Option<&ArtifactRef> {
        self.artifacts.get(&kind)
    }

    pub fn attempts(&self, stage: Stage) -> u32 {
        self.attempts.get(&stage).copied().unwrap_or(0)
    }

    pub fn attempts_by_stage(&self) -> &BTreeMap<Stage, u32> {
        &self.attempts
    }

    pub fn total_attempts(&self) -> u32 {
        self.attempts.values().sum()
    }

    pub fn failure(&self) -> Option<&FailureDescriptor> {
        self.failure.as_ref()
    }

    pub fn history(&self) -> &[StageTransition] {
        &self.history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// The stage the job was in when it stopped: the failing stage for a
    /// failed job, otherwise the current stage.
    pub fn final_stage(&self) -> Stage {
        match &self.failure {
            Some(failure) => failure.stage,
            None => self.stage,
        }
    }

    /// Queued -> Downloading.
    pub(crate) fn start(&mut self) -> Result<(), JobError> {
        self.ensure_live()?;
        if self.stage != Stage::Queued {
            return Err(JobError::InvalidTransition {
                id: self.id.clone(),
                from: self.stage,
                to: Stage::Downloading,
            });
        }
        self.transition(Stage::Downloading);
        Ok(())
    }

    /// Counts one attempt of the current stage and returns the new count.
    pub(crate) fn record_attempt(&mut self) -> Result<u32, JobError> {
        self.ensure_live()?;
        let count = self.attempts.entry(self.stage).or_insert(0);
        *count += 1;
        let count = *count;
        self.updated_at = Utc::now();
        Ok(count)
    }

    /// Attaches the current stage's artifact and advances to the next stage.
    pub(crate) fn complete_stage(&mut self, artifact: ArtifactRef) -> Result<Stage, JobError> {
        self.ensure_live()?;
        let (kind, next) = match (self.stage.artifact_kind(), self.stage.next()) {
            (Some(kind), Some(next)) => (kind, next),
            _ => {
                return Err(JobError::InvalidTransition {
                    id: self.id.clone(),
                    from: self.stage,
                    to: self.stage.next().unwrap_or(self.stage),
                })
            }
        };
        self.artifacts.insert(kind, artifact);
        self.transition(next);
        Ok(next)
    }

    /// Moves the job to `Failed`, recording the current stage as the culprit.
    pub(crate) fn fail(
        &mut self,
        kind: FailureKind,
        message: impl Into<String>,
        retries_exhausted: bool,
    ) -> Result<(), JobError> {
        self.ensure_live()?;
        self.failure = Some(FailureDescriptor {
            stage: self.stage,
            kind,
            message: message.into(),
            retries_exhausted,
        });
        self.transition(Stage::Failed);
        Ok(())
    }

    fn ensure_live(&self) -> Result<(), JobError> {
        if self.stage.is_terminal() {
            return Err(JobError::Terminal {
                id: self.id.clone(),
                stage: self.stage,
            });
        }
        Ok(())
    }

    fn transition(&mut self, to: Stage) {
        let now = Utc::now();
        self.history.push(StageTransition {
            from: self.stage,
            to,
            at: now,
        });
        self.stage = to;
        self.updated_at = now;
    }
}

/// Returns true when `history` never moves backwards.
///
/// `Failed` is allowed from any non-terminal stage; every other transition
/// must go to the immediate successor.
pub fn is_monotonic(history: &[StageTransition]) -> bool {
    let mut previous: Option<Stage> = None;
    for t in history {
        if let Some(prev) = previous {
            if t.from != prev {
                return false;
            }
        }
        let valid = match t.to {
            Stage::Failed => !t.from.is_terminal(),
            to => t.from.next() == Some(to),
        };
        if !valid {
            return false;
        }
        previous = Some(t.to);
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job() -> Job {
        Job::new("https://site/a", "https://site/a")
    }

    fn artifact(name: &str) -> ArtifactRef {
        ArtifactRef::new(PathBuf::from(name))
    }

    #[test]
    fn test_new_job_is_queued() {
        let job = job();
        assert_eq!(job.stage(), Stage::Queued);
        assert!(job.artifacts().is_empty());
        assert!(job.failure().is_none());
        assert_eq!(job.id(), &JobId::from_normalized("https://site/a"));
    }

    #[test]
    fn test_full_forward_walk_reaches_done() {
        let mut job = job();
        job.start().unwrap();
        for stage in Stage::WORK {
            assert_eq!(job.stage(), stage);
            job.record_attempt().unwrap();
            job.complete_stage(artifact(&stage.to_string())).unwrap();
        }
        assert_eq!(job.stage(), Stage::Done);
        assert_eq!(job.artifacts().len(), 5);
        assert!(is_monotonic(job.history()));
        assert_eq!(job.history().len(), 6);
    }

    #[test]
    fn test_complete_stage_attaches_artifact_of_current_stage() {
        let mut job = job();
        job.start().unwrap();
        job.complete_stage(artifact("video.mp4")).unwrap();
        assert_eq!(
            job.artifact(ArtifactKind::VideoFile).unwrap().path,
            PathBuf::from("video.mp4")
        );
        assert!(job.artifact(ArtifactKind::AudioFile).is_none());
    }

    #[test]
    fn test_attempts_are_counted_per_stage_without_transitions() {
        let mut job = job();
        job.start().unwrap();
        assert_eq!(job.record_attempt().unwrap(), 1);
        assert_eq!(job.record_attempt().unwrap(), 2);
        assert_eq!(job.attempts(Stage::Downloading), 2);
        assert_eq!(job.history().len(), 1);
        assert_eq!(job.stage(), Stage::Downloading);
    }

    #[test]
    fn test_fail_records_descriptor_for_current_stage() {
        let mut job = job();
        job.start().unwrap();
        job.fail(FailureKind::NotFound, "gone", false).unwrap();
        assert_eq!(job.stage(), Stage::Failed);
        let failure = job.failure().unwrap();
        assert_eq!(failure.stage, Stage::Downloading);
        assert_eq!(failure.kind, FailureKind::NotFound);
        assert_eq!(job.final_stage(), Stage::Downloading);
        assert!(is_monotonic(job.history()));
    }

    #[test]
    fn test_terminal_job_rejects_mutation() {
        let mut job = job();
        job.start().unwrap();
        job.fail(FailureKind::Unsupported, "nope", false).unwrap();

        assert!(matches!(
            job.record_attempt(),
            Err(JobError::Terminal { .. })
        ));
        assert!(matches!(
            job.complete_stage(artifact("x")),
            Err(JobError::Terminal { .. })
        ));
        assert!(matches!(
            job.fail(FailureKind::Network, "again", false),
            Err(JobError::Terminal { .. })
        ));
    }

    #[test]
    fn test_start_twice_is_invalid() {
        let mut job = job();
        job.start().unwrap();
        assert!(matches!(
            job.start(),
            Err(JobError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_complete_stage_from_queued_is_invalid() {
        let mut job = job();
        assert!(matches!(
            job.complete_stage(artifact("x")),
            Err(JobError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_is_monotonic_rejects_regression() {
        let now = Utc::now();
        let history = vec![
            StageTransition {
                from: Stage::Queued,
                to: Stage::Downloading,
                at: now,
            },
            StageTransition {
                from: Stage::Downloading,
                to: Stage::Queued,
                at: now,
            },
        ];
        assert!(!is_monotonic(&history));
    }

    #[test]
    fn test_is_monotonic_rejects_skips() {
        let now = Utc::now();
        let history = vec![StageTransition {
            from: Stage::Queued,
            to: Stage::Analyzing,
            at: now,
        }];
        assert!(!is_monotonic(&history));
    }

    #[test]
    fn test_job_record_round_trips_through_json() {
        let mut job = job();
        job.start().unwrap();
        job.record_attempt().unwrap();
        job.complete_stage(artifact("video.mp4")).unwrap();

        let json = serde_json::to_string(&job).unwrap();
        let restored: Job = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.id(), job.id());
        assert_eq!(restored.stage(), Stage::ExtractingAudio);
        assert_eq!(restored.attempts(Stage::Downloading), 1);
        assert_eq!(restored.history().len(), 2);
    }
}
