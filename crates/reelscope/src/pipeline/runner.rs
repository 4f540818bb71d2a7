use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, info_span, warn};

use crate::gate::ProviderGate;
use crate::job::{ArtifactKind, FailureKind, Job, JobError, Stage};
use crate::sanitize;
use crate::services::transcode::list_frames;
use crate::services::{AiProvider, AnalysisResult, Downloader, Transcoder};
use crate::shutdown::Shutdown;
use crate::storage::{ArtifactPayload, ArtifactStore};
use crate::urls;

use super::config::PipelineConfig;
use super::executor::StageExecutor;
use super::outcome::{StageExecution, StageOutcome};
use super::progress::{ProgressEvent, ProgressReporter};

/// The external tools a pipeline drives.
#[derive(Clone)]
pub struct Collaborators {
    pub downloader: Arc<dyn Downloader>,
    pub transcoder: Arc<dyn Transcoder>,
    pub provider: Arc<dyn AiProvider>,
}

/// Final per-video document written by the export stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportRecord {
    pub job_id: String,
    pub url: String,
    pub normalized_url: String,
    pub provider: String,
    pub model: String,
    pub fields: BTreeMap<String, Value>,
    pub artifacts: BTreeMap<String, PathBuf>,
    pub exported_at: DateTime<Utc>,
}

pub struct Pipeline {
    config: Arc<PipelineConfig>,
    executor: StageExecutor,
    collaborators: Collaborators,
    gate: Arc<ProviderGate>,
    shutdown: Shutdown,
}

impl Pipeline {
    pub fn new(
        config: Arc<PipelineConfig>,
        collaborators: Collaborators,
        gate: Arc<ProviderGate>,
        shutdown: Shutdown,
    ) -> Self {
        let executor = StageExecutor::new(
            ArtifactStore::new(&config.output_directory),
            config.retry.clone(),
            config.force_refresh,
            shutdown.clone(),
        );
        Self {
            config,
            executor,
            collaborators,
            gate,
            shutdown,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        self.executor.store()
    }

    pub fn gate(&self) -> &ProviderGate {
        &self.gate
    }

    pub fn shutdown(&self) -> &Shutdown {
        &self.shutdown
    }

    /// Drives one job until it is Done, Failed or interrupted by shutdown.
    ///
    /// The job record is saved after every stage so a later `report` run can
    /// rebuild the aggregate from disk.
    pub fn run(&self, mut job: Job, progress: &dyn ProgressReporter) -> Job {
        let url = sanitize::redact_url(job.url());
        let _pipeline_span = info_span!("pipeline", job_id = %job.id(), url = %url).entered();

        if job.is_terminal() {
            debug!("Job already terminal ({}), nothing to do", job.stage());
            return job;
        }

        if let Err(e) = self.store().clear_staging(job.id()) {
            warn!("Could not clear staging area: {}", e);
        }

        if job.stage() == Stage::Queued {
            if let Err(e) = job.start() {
                error!("Cannot start job: {}", e);
                return job;
            }
        }

        while !job.is_terminal() {
            let stage = job.stage();
            let result = {
                let _step = info_span!("stage", stage = %stage).entered();
                match stage {
                    Stage::Downloading => self.step_download(&mut job, progress),
                    Stage::ExtractingAudio => self.step_extract_audio(&mut job, progress),
                    Stage::ExtractingFrames => self.step_extract_frames(&mut job, progress),
                    Stage::Analyzing => self.step_analyze(&mut job, progress),
                    Stage::Exporting => self.step_export(&mut job, progress),
                    Stage::Queued | Stage::Done | Stage::Failed => break,
                }
            };

            match result {
                Ok(StageExecution::Interrupted) => {
                    self.save_record(&job);
                    return job;
                }
                Ok(_) => self.save_record(&job),
                Err(e) => {
                    error!("Stage {} left the job inconsistent: {}", stage, e);
                    break;
                }
            }
        }

        if job.stage() == Stage::Done {
            progress.report(&job, ProgressEvent::Completed);
        }
        if job.is_terminal() {
            if let Err(e) = self.store().clear_staging(job.id()) {
                warn!("Could not clear staging area: {}", e);
            }
        }
        self.save_record(&job);
        job
    }

    /// Fails a job whose run panicked.
    ///
    /// The saved record is preferred over `job` when it was written during
    /// this run, so artifacts produced before the panic stay attached.
    pub fn recover_panicked(
        &self,
        job: Job,
        panic_message: &str,
        progress: &dyn ProgressReporter,
    ) -> Job {
        let mut job = match self.store().load_record(job.id()) {
            Ok(saved) if saved.updated_at() >= job.updated_at() => saved,
            _ => job,
        };
        if job.is_terminal() {
            return job;
        }

        if job.stage() == Stage::Queued {
            if let Err(e) = job.start() {
                error!("Cannot start panicked job {}: {}", job.id(), e);
                return job;
            }
        }
        let stage = job.stage();
        let message = format!("worker panicked: {}", panic_message);
        if let Err(e) = job.fail(FailureKind::Internal, message.clone(), false) {
            error!("Cannot fail panicked job {}: {}", job.id(), e);
            return job;
        }
        progress.report(
            &job,
            ProgressEvent::Failed {
                stage,
                error: format!("{}: {}", FailureKind::Internal, message),
            },
        );

        if let Err(e) = self.store().clear_staging(job.id()) {
            warn!("Could not clear staging area: {}", e);
        }
        self.save_record(&job);
        job
    }

    fn save_record(&self, job: &Job) {
        if let Err(e) = self.store().save_record(job) {
            warn!("Could not save job record: {}", e);
        }
    }

    /// Path of an upstream artifact, from the job or the store layout.
    fn input_path(&self, job: &Job, kind: ArtifactKind) -> PathBuf {
        job.artifact(kind)
            .map(|a| a.path.clone())
            .unwrap_or_else(|| self.store().path_for(job.id(), kind))
    }

    fn staging(&self, job: &Job, kind: ArtifactKind) -> Result<PathBuf, StageOutcome> {
        self.store()
            .staging_path(job.id(), kind)
            .map_err(|e| StageOutcome::retryable(FailureKind::Storage, e.to_string()))
    }

    fn step_download(
        &self,
        job: &mut Job,
        progress: &dyn ProgressReporter,
    ) -> Result<StageExecution, JobError> {
        self.executor.run(job, progress, |job, _| {
            if !urls::is_supported(job.url()) {
                return StageOutcome::fatal(
                    FailureKind::Unsupported,
                    format!("not an http(s) URL: {}", sanitize::redact_url(job.url())),
                );
            }
            let dest = match self.staging(job, ArtifactKind::VideoFile) {
                Ok(dest) => dest,
                Err(outcome) => return outcome,
            };
            StageOutcome::from_result(
                self.collaborators.downloader.download(job.url(), &dest),
                ArtifactPayload::StagedFile,
            )
        })
    }

    fn step_extract_audio(
        &self,
        job: &mut Job,
        progress: &dyn ProgressReporter,
    ) -> Result<StageExecution, JobError> {
        self.executor.run(job, progress, |job, _| {
            let video = self.input_path(job, ArtifactKind::VideoFile);
            let dest = match self.staging(job, ArtifactKind::AudioFile) {
                Ok(dest) => dest,
                Err(outcome) => return outcome,
            };
            StageOutcome::from_result(
                self.collaborators.transcoder.extract_audio(&video, &dest),
                ArtifactPayload::StagedFile,
            )
        })
    }

    fn step_extract_frames(
        &self,
        job: &mut Job,
        progress: &dyn ProgressReporter,
    ) -> Result<StageExecution, JobError> {
        self.executor.run(job, progress, |job, _| {
            let video = self.input_path(job, ArtifactKind::VideoFile);
            let dest = match self.staging(job, ArtifactKind::FrameSet) {
                Ok(dest) => dest,
                Err(outcome) => return outcome,
            };
            let result =
                self.collaborators
                    .transcoder
                    .extract_frames(&video, &self.config.frames, &dest);
            StageOutcome::from_result(result, |_| ArtifactPayload::StagedDir(dest.clone()))
        })
    }

    fn step_analyze(
        &self,
        job: &mut Job,
        progress: &dyn ProgressReporter,
    ) -> Result<StageExecution, JobError> {
        self.executor.run(job, progress, |job, _| {
            let audio = self.input_path(job, ArtifactKind::AudioFile);
            let frames = match list_frames(&self.input_path(job, ArtifactKind::FrameSet)) {
                Ok(frames) => frames,
                Err(e) => {
                    return StageOutcome::retryable(
                        FailureKind::Storage,
                        format!("cannot list frames: {}", e),
                    )
                }
            };

            let result = {
                let _permit = match self.gate.acquire_cancellable(&self.shutdown) {
                    Ok(permit) => permit,
                    Err(e) => return StageOutcome::retryable(FailureKind::Provider, e.to_string()),
                };
                debug!(
                    provider = self.collaborators.provider.name(),
                    in_flight = self.gate.in_flight(),
                    "Calling provider"
                );
                self.collaborators
                    .provider
                    .analyze(&audio, &frames, &self.config.prompt)
            };

            match result {
                Ok(analysis) => match serde_json::to_vec_pretty(&analysis) {
                    Ok(bytes) => StageOutcome::Success(ArtifactPayload::Bytes(bytes)),
                    Err(e) => StageOutcome::fatal(FailureKind::InvalidResponse, e.to_string()),
                },
                Err(e) => StageOutcome::from_error(&e),
            }
        })
    }

    fn step_export(
        &self,
        job: &mut Job,
        progress: &dyn ProgressReporter,
    ) -> Result<StageExecution, JobError> {
        self.executor.run(job, progress, |job, _| {
            let path = self.input_path(job, ArtifactKind::AnalysisResult);
            let analysis = match load_analysis(&path) {
                Ok(analysis) => analysis,
                Err(outcome) => return outcome,
            };

            let record = ExportRecord {
                job_id: job.id().to_string(),
                url: job.url().to_string(),
                normalized_url: job.normalized_url().to_string(),
                provider: analysis.provider,
                model: analysis.model,
                fields: analysis.fields,
                artifacts: job
                    .artifacts()
                    .iter()
                    .map(|(kind, artifact)| (kind.to_string(), artifact.path.clone()))
                    .collect(),
                exported_at: Utc::now(),
            };

            match serde_json::to_vec_pretty(&record) {
                Ok(bytes) => StageOutcome::Success(ArtifactPayload::Bytes(bytes)),
                Err(e) => StageOutcome::fatal(FailureKind::Storage, e.to_string()),
            }
        })
    }
}

/// Reads a persisted `analysis.json`.
fn load_analysis(path: &Path) -> Result<AnalysisResult, StageOutcome> {
    let bytes = std::fs::read(path).map_err(|e| {
        StageOutcome::retryable(
            FailureKind::Storage,
            format!("cannot read '{}': {}", sanitize::redact_path(path), e),
        )
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        StageOutcome::fatal(
            FailureKind::Storage,
            format!("corrupt analysis '{}': {}", sanitize::redact_path(path), e),
        )
    })
}
