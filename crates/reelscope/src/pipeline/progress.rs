use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::broadcast::job_progress::{JobProgressEvent, JobStatus};
use crate::job::{Job, Stage};
use crate::sanitize;

/// Events emitted while a job moves through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    StageStarted {
        stage: Stage,
        attempt: u32,
    },
    RetryScheduled {
        stage: Stage,
        attempt: u32,
        delay: Duration,
        reason: String,
    },
    ArtifactReused {
        stage: Stage,
        artifact: PathBuf,
    },
    StageCompleted {
        stage: Stage,
        artifact: PathBuf,
    },
    Completed,
    Failed {
        stage: Stage,
        error: String,
    },
    Interrupted {
        stage: Stage,
    },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, job: &Job, event: ProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _job: &Job, _event: ProgressEvent) {}
}

/// Writes every event to the log.
pub struct LogProgress;

impl ProgressReporter for LogProgress {
    fn report(&self, job: &Job, event: ProgressEvent) {
        let id = job.id();
        match event {
            ProgressEvent::StageStarted { stage, attempt } => {
                tracing::debug!(job_id = %id, %stage, attempt, "Stage started");
            }
            ProgressEvent::RetryScheduled {
                stage,
                attempt,
                delay,
                reason,
            } => {
                tracing::warn!(
                    job_id = %id,
                    %stage,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying after failure: {}",
                    reason
                );
            }
            ProgressEvent::ArtifactReused { stage, artifact } => {
                tracing::info!(
                    job_id = %id,
                    %stage,
                    artifact = %sanitize::redact_path(&artifact),
                    "Reusing existing artifact"
                );
            }
            ProgressEvent::StageCompleted { stage, artifact } => {
                tracing::info!(
                    job_id = %id,
                    %stage,
                    artifact = %sanitize::redact_path(&artifact),
                    "Stage completed"
                );
            }
            ProgressEvent::Completed => tracing::info!(job_id = %id, "Job done"),
            ProgressEvent::Failed { stage, error } => {
                tracing::error!(job_id = %id, %stage, "Job failed: {}", error);
            }
            ProgressEvent::Interrupted { stage } => {
                tracing::warn!(job_id = %id, %stage, "Job interrupted");
            }
        }
    }
}

/// Bridges pipeline events to the broadcast channel.
pub struct BroadcastProgress {
    sender: Arc<broadcast::Sender<JobProgressEvent>>,
}

impl BroadcastProgress {
    pub fn new(sender: Arc<broadcast::Sender<JobProgressEvent>>) -> Self {
        Self { sender }
    }

    fn to_event(job: &Job, event: ProgressEvent) -> JobProgressEvent {
        let id = job.id().as_str();
        let url = sanitize::redact_url(job.url());
        match event {
            ProgressEvent::StageStarted { stage, attempt } => JobProgressEvent::new(
                id,
                &url,
                stage,
                JobStatus::Processing,
                &format!("{} started", stage),
            )
            .with_attempt(attempt),
            ProgressEvent::RetryScheduled {
                stage,
                attempt,
                delay,
                reason,
            } => JobProgressEvent::new(
                id,
                &url,
                stage,
                JobStatus::Processing,
                &format!("Retrying in {} ms", delay.as_millis()),
            )
            .with_attempt(attempt)
            .with_error(&reason),
            ProgressEvent::ArtifactReused { stage, artifact } => JobProgressEvent::new(
                id,
                &url,
                stage,
                JobStatus::Processing,
                "Reusing existing artifact",
            )
            .with_artifact(&artifact.display().to_string()),
            ProgressEvent::StageCompleted { stage, artifact } => JobProgressEvent::new(
                id,
                &url,
                stage,
                JobStatus::Processing,
                &format!("{} completed", stage),
            )
            .with_artifact(&artifact.display().to_string()),
            ProgressEvent::Completed => JobProgressEvent::new(
                id,
                &url,
                Stage::Done,
                JobStatus::Completed,
                "Processing completed successfully",
            ),
            ProgressEvent::Failed { stage, error } => JobProgressEvent::new(
                id,
                &url,
                stage,
                JobStatus::Failed,
                &format!("Failed at {}", stage),
            )
            .with_error(&error),
            ProgressEvent::Interrupted { stage } => JobProgressEvent::new(
                id,
                &url,
                stage,
                JobStatus::Interrupted,
                "Interrupted by shutdown",
            ),
        }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, job: &Job, event: ProgressEvent) {
        // No subscribers is fine.
        let _ = self.sender.send(Self::to_event(job, event));
    }
}

/// Forwards every event to each inner reporter.
pub struct FanoutProgress {
    reporters: Vec<Box<dyn ProgressReporter>>,
}

impl FanoutProgress {
    pub fn new(reporters: Vec<Box<dyn ProgressReporter>>) -> Self {
        Self { reporters }
    }
}

impl ProgressReporter for FanoutProgress {
    fn report(&self, job: &Job, event: ProgressEvent) {
        for reporter in &self.reporters {
            reporter.report(job, event.clone());
        }
    }
}
