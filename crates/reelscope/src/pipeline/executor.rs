use tracing::debug;

use crate::job::{ArtifactRef, FailureKind, Job, JobError};
use crate::shutdown::Shutdown;
use crate::storage::ArtifactStore;

use super::outcome::{StageExecution, StageFailure, StageOutcome};
use super::progress::{ProgressEvent, ProgressReporter};
use super::retry::RetryPolicy;

/// Runs one stage of one job with reuse, retry and failure handling.
///
/// The stage function receives the job (read-only) and the 1-based attempt
/// number. It may be invoked several times and must be safe to re-run.
#[derive(Debug, Clone)]
pub struct StageExecutor {
    store: ArtifactStore,
    policy: RetryPolicy,
    force_refresh: bool,
    shutdown: Shutdown,
}

impl StageExecutor {
    pub fn new(
        store: ArtifactStore,
        policy: RetryPolicy,
        force_refresh: bool,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            store,
            policy,
            force_refresh,
            shutdown,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn run<F>(
        &self,
        job: &mut Job,
        progress: &dyn ProgressReporter,
        mut stage_fn: F,
    ) -> Result<StageExecution, JobError>
    where
        F: FnMut(&Job, u32) -> StageOutcome,
    {
        let stage = job.stage();
        let kind = stage.artifact_kind().ok_or_else(|| JobError::InvalidTransition {
            id: job.id().clone(),
            from: stage,
            to: stage.next().unwrap_or(stage),
        })?;

        if !self.force_refresh && self.store.exists(job.id(), kind) {
            let artifact = ArtifactRef::new(self.store.path_for(job.id(), kind));
            job.complete_stage(artifact.clone())?;
            progress.report(
                job,
                ProgressEvent::ArtifactReused {
                    stage,
                    artifact: artifact.path.clone(),
                },
            );
            return Ok(StageExecution::Reused(artifact));
        }

        loop {
            if self.shutdown.is_triggered() {
                progress.report(job, ProgressEvent::Interrupted { stage });
                return Ok(StageExecution::Interrupted);
            }

            let attempt = job.record_attempt()?;
            progress.report(job, ProgressEvent::StageStarted { stage, attempt });

            let failure = match stage_fn(job, attempt) {
                StageOutcome::Success(payload) => {
                    match self.store.persist(job.id(), kind, payload) {
                        Ok(artifact) => {
                            job.complete_stage(artifact.clone())?;
                            progress.report(
                                job,
                                ProgressEvent::StageCompleted {
                                    stage,
                                    artifact: artifact.path.clone(),
                                },
                            );
                            return Ok(StageExecution::Advanced(artifact));
                        }
                        Err(e) => StageFailure::new(FailureKind::Storage, e.to_string()),
                    }
                }
                StageOutcome::RetryableFailure(failure) => failure,
                StageOutcome::FatalFailure(failure) => {
                    return self.fail(job, failure, false, progress);
                }
            };

            // A retryable failure caused by cancellation is not the stage's fault.
            if self.shutdown.is_triggered() {
                progress.report(job, ProgressEvent::Interrupted { stage });
                return Ok(StageExecution::Interrupted);
            }

            if !self.policy.allows_retry(attempt) {
                return self.fail(job, failure, true, progress);
            }

            let delay = self.policy.backoff(attempt);
            debug!(
                job_id = %job.id(),
                %stage,
                attempt,
                "Retryable failure, backing off {:?}: {}",
                delay,
                failure
            );
            progress.report(
                job,
                ProgressEvent::RetryScheduled {
                    stage,
                    attempt,
                    delay,
                    reason: failure.to_string(),
                },
            );

            if !self.shutdown.sleep(delay) {
                progress.report(job, ProgressEvent::Interrupted { stage });
                return Ok(StageExecution::Interrupted);
            }
        }
    }

    fn fail(
        &self,
        job: &mut Job,
        failure: StageFailure,
        retries_exhausted: bool,
        progress: &dyn ProgressReporter,
    ) -> Result<StageExecution, JobError> {
        let stage = job.stage();
        let message = if retries_exhausted {
            format!(
                "{} (gave up after {} attempts)",
                failure.message,
                job.attempts(stage)
            )
        } else {
            failure.message
        };

        job.fail(failure.kind, message.clone(), retries_exhausted)?;
        progress.report(
            job,
            ProgressEvent::Failed {
                stage,
                error: format!("{}: {}", failure.kind, message),
            },
        );

        let descriptor = job.failure().cloned().ok_or_else(|| JobError::InvalidTransition {
            id: job.id().clone(),
            from: stage,
            to: job.stage(),
        })?;
        Ok(StageExecution::Failed(descriptor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{ArtifactKind, Stage};
    use crate::pipeline::progress::NoopProgress;
    use crate::storage::ArtifactPayload;
    use crate::testing::RecordingProgress;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup(max_attempts: u32, force_refresh: bool) -> (TempDir, StageExecutor, Shutdown) {
        let dir = TempDir::new().unwrap();
        let shutdown = Shutdown::new();
        let executor = StageExecutor::new(
            ArtifactStore::new(dir.path()),
            RetryPolicy::immediate(max_attempts),
            force_refresh,
            shutdown.clone(),
        );
        (dir, executor, shutdown)
    }

    fn downloading_job() -> Job {
        let mut job = Job::new("https://site/a", "https://site/a");
        job.start().unwrap();
        job
    }

    fn bytes(data: &[u8]) -> StageOutcome {
        StageOutcome::Success(ArtifactPayload::Bytes(data.to_vec()))
    }

    #[test]
    fn test_success_persists_and_advances() {
        let (_dir, executor, _) = setup(3, false);
        let mut job = downloading_job();

        let result = executor
            .run(&mut job, &NoopProgress, |_, _| bytes(b"video"))
            .unwrap();

        let StageExecution::Advanced(artifact) = result else {
            panic!("expected Advanced, got {:?}", result);
        };
        assert_eq!(std::fs::read(&artifact.path).unwrap(), b"video");
        assert_eq!(job.stage(), Stage::ExtractingAudio);
        assert_eq!(job.attempts(Stage::Downloading), 1);
        assert_eq!(job.artifact(ArtifactKind::VideoFile), Some(&artifact));
    }

    #[test]
    fn test_existing_artifact_is_reused_without_calling_stage() {
        let (_dir, executor, _) = setup(3, false);
        let mut job = downloading_job();
        executor
            .store()
            .write(job.id(), ArtifactKind::VideoFile, b"cached")
            .unwrap();

        let result = executor
            .run(&mut job, &NoopProgress, |_, _| panic!("stage must not run"))
            .unwrap();

        assert!(matches!(result, StageExecution::Reused(_)));
        assert_eq!(job.stage(), Stage::ExtractingAudio);
        assert_eq!(job.attempts(Stage::Downloading), 0);
    }

    #[test]
    fn test_force_refresh_recomputes() {
        let (_dir, executor, _) = setup(3, true);
        let mut job = downloading_job();
        executor
            .store()
            .write(job.id(), ArtifactKind::VideoFile, b"cached")
            .unwrap();

        let result = executor
            .run(&mut job, &NoopProgress, |_, _| bytes(b"fresh"))
            .unwrap();

        let StageExecution::Advanced(artifact) = result else {
            panic!("expected Advanced");
        };
        assert_eq!(std::fs::read(artifact.path).unwrap(), b"fresh");
    }

    #[test]
    fn test_retryable_then_success_counts_attempts() {
        let (_dir, executor, _) = setup(3, false);
        let mut job = downloading_job();

        let result = executor
            .run(&mut job, &NoopProgress, |_, attempt| {
                if attempt < 3 {
                    StageOutcome::retryable(FailureKind::Network, "reset")
                } else {
                    bytes(b"ok")
                }
            })
            .unwrap();

        assert!(result.advanced());
        assert_eq!(job.attempts(Stage::Downloading), 3);
        assert_eq!(job.history().len(), 2);
    }

    #[test]
    fn test_always_retryable_hits_cap_then_fails() {
        let (_dir, executor, _) = setup(4, false);
        let mut job = downloading_job();
        let mut calls = 0;

        let result = executor
            .run(&mut job, &NoopProgress, |_, _| {
                calls += 1;
                StageOutcome::retryable(FailureKind::Network, "timeout")
            })
            .unwrap();

        assert_eq!(calls, 4);
        assert_eq!(job.attempts(Stage::Downloading), 4);
        assert_eq!(job.stage(), Stage::Failed);
        let StageExecution::Failed(descriptor) = result else {
            panic!("expected Failed");
        };
        assert!(descriptor.retries_exhausted);
        assert_eq!(descriptor.kind, FailureKind::Network);
        assert_eq!(descriptor.stage, Stage::Downloading);
    }

    #[test]
    fn test_fatal_fails_immediately() {
        let (_dir, executor, _) = setup(5, false);
        let mut job = downloading_job();

        let result = executor
            .run(&mut job, &NoopProgress, |_, _| {
                StageOutcome::fatal(FailureKind::NotFound, "404")
            })
            .unwrap();

        assert!(matches!(result, StageExecution::Failed(ref d) if !d.retries_exhausted));
        assert_eq!(job.attempts(Stage::Downloading), 1);
        assert!(!executor.store().exists(job.id(), ArtifactKind::VideoFile));
    }

    #[test]
    fn test_persist_failure_is_retried() {
        let (_dir, executor, _) = setup(3, false);
        let mut job = downloading_job();

        let result = executor
            .run(&mut job, &NoopProgress, |_, attempt| {
                if attempt == 1 {
                    StageOutcome::Success(ArtifactPayload::StagedFile(PathBuf::from(
                        "/nonexistent/staged.mp4",
                    )))
                } else {
                    bytes(b"ok")
                }
            })
            .unwrap();

        assert!(result.advanced());
        assert_eq!(job.attempts(Stage::Downloading), 2);
    }

    #[test]
    fn test_cancelled_before_start_is_interrupted() {
        let (_dir, executor, shutdown) = setup(3, false);
        let mut job = downloading_job();
        shutdown.trigger();

        let result = executor
            .run(&mut job, &NoopProgress, |_, _| panic!("stage must not run"))
            .unwrap();

        assert_eq!(result, StageExecution::Interrupted);
        assert_eq!(job.stage(), Stage::Downloading);
        assert_eq!(job.attempts(Stage::Downloading), 0);
    }

    #[test]
    fn test_cancelled_during_backoff_is_interrupted() {
        let dir = TempDir::new().unwrap();
        let shutdown = Shutdown::new();
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_secs(30),
            multiplier: 1.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        };
        let executor =
            StageExecutor::new(ArtifactStore::new(dir.path()), policy, false, shutdown.clone());
        let mut job = downloading_job();

        let trigger = shutdown.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.trigger();
        });

        let result = executor
            .run(&mut job, &NoopProgress, |_, _| {
                StageOutcome::retryable(FailureKind::RateLimited, "429")
            })
            .unwrap();
        handle.join().unwrap();

        assert_eq!(result, StageExecution::Interrupted);
        assert_eq!(job.stage(), Stage::Downloading);
        assert_eq!(job.attempts(Stage::Downloading), 1);
    }

    #[test]
    fn test_progress_events_for_retry() {
        let (_dir, executor, _) = setup(2, false);
        let mut job = downloading_job();
        let recorder = RecordingProgress::new();

        executor
            .run(&mut job, &recorder, |_, attempt| {
                if attempt == 1 {
                    StageOutcome::retryable(FailureKind::Network, "reset")
                } else {
                    bytes(b"ok")
                }
            })
            .unwrap();

        let kinds: Vec<&str> = recorder
            .events()
            .iter()
            .map(|(_, e)| match e {
                ProgressEvent::StageStarted { .. } => "started",
                ProgressEvent::RetryScheduled { .. } => "retry",
                ProgressEvent::StageCompleted { .. } => "completed",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["started", "retry", "started", "completed"]);
    }

    #[test]
    fn test_non_work_stage_is_rejected() {
        let (_dir, executor, _) = setup(3, false);
        let mut job = Job::new("https://site/a", "https://site/a");
        let result = executor.run(&mut job, &NoopProgress, |_, _| bytes(b"x"));
        assert!(matches!(result, Err(JobError::InvalidTransition { .. })));
    }
}
