//! Test harness for isolated batch runs.
//!
//! The `TestHarness` struct wires the real pipeline, gate and scheduler to
//! scripted collaborators inside a temporary output directory, so every
//! test gets its own job records, artifacts and report files.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use reelscope::config::{FramesConfig, NormalizationConfig, PromptConfig};
use reelscope::pipeline::{
    Collaborators, NoopProgress, Pipeline, PipelineConfig, ProgressReporter, RetryPolicy,
};
use reelscope::report::{
    CsvReportWriter, JsonReportWriter, ReportAggregator, ReportWriter, XlsxReportWriter,
};
use reelscope::{urls, AggregateReport, ArtifactStore, Job, JobScheduler, ProviderGate, Shutdown};

use super::fakes::{CountingTranscoder, ScriptedDownloader, ScriptedProvider};

/// Jobs and report produced by one batch run.
pub struct RunOutcome {
    pub jobs: Vec<Job>,
    pub report: AggregateReport,
    /// Files written by the report writers.
    pub report_files: Vec<PathBuf>,
}

impl RunOutcome {
    pub fn job_for(&self, url_fragment: &str) -> &Job {
        self.jobs
            .iter()
            .find(|j| j.url().contains(url_fragment))
            .unwrap_or_else(|| panic!("no job for {}", url_fragment))
    }
}

/// Isolated environment for running batches end to end.
pub struct TestHarness {
    temp_dir: TempDir,
    /// Where job directories and report files land.
    pub output_dir: PathBuf,
    pub downloader: Arc<ScriptedDownloader>,
    pub transcoder: Arc<CountingTranscoder>,
    pub provider: Arc<ScriptedProvider>,
    pub gate: Arc<ProviderGate>,
    pub shutdown: Shutdown,
    max_attempts: u32,
    workers: usize,
    force_refresh: bool,
}

impl TestHarness {
    /// Two workers, three attempts per stage, one provider call at a time.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let output_dir = temp_dir.path().join("output");
        std::fs::create_dir_all(&output_dir).expect("Failed to create output dir");

        Self {
            temp_dir,
            output_dir,
            downloader: ScriptedDownloader::new(),
            transcoder: CountingTranscoder::new(3),
            provider: ScriptedProvider::new(),
            gate: Arc::new(ProviderGate::new(1, Duration::ZERO)),
            shutdown: Shutdown::new(),
            max_attempts: 3,
            workers: 2,
            force_refresh: false,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.gate = Arc::new(ProviderGate::new(max_concurrent, Duration::ZERO));
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_provider(mut self, provider: Arc<ScriptedProvider>) -> Self {
        self.provider = provider;
        self
    }

    pub fn with_force_refresh(mut self, force_refresh: bool) -> Self {
        self.force_refresh = force_refresh;
        self
    }

    /// Fresh shutdown signal for the next run, as a restarted process has.
    pub fn reset_shutdown(&mut self) {
        self.shutdown = Shutdown::new();
    }

    pub fn base_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn store(&self) -> ArtifactStore {
        ArtifactStore::new(&self.output_dir)
    }

    pub fn csv_path(&self) -> PathBuf {
        self.output_dir.join("report.csv")
    }

    pub fn json_path(&self) -> PathBuf {
        self.output_dir.join("report.json")
    }

    pub fn xlsx_path(&self) -> PathBuf {
        self.output_dir.join("report.xlsx")
    }

    pub fn pipeline(&self) -> Arc<Pipeline> {
        let config = PipelineConfig {
            output_directory: self.output_dir.clone(),
            force_refresh: self.force_refresh,
            retry: RetryPolicy::immediate(self.max_attempts),
            frames: FramesConfig::default(),
            prompt: PromptConfig::default(),
        };
        Arc::new(Pipeline::new(
            Arc::new(config),
            Collaborators {
                downloader: self.downloader.clone(),
                transcoder: self.transcoder.clone(),
                provider: self.provider.clone(),
            },
            Arc::clone(&self.gate),
            self.shutdown.clone(),
        ))
    }

    pub fn aggregator(&self) -> ReportAggregator {
        let writers: Vec<Box<dyn ReportWriter>> = vec![
            Box::new(CsvReportWriter::new(self.csv_path())),
            Box::new(JsonReportWriter::new(self.json_path())),
            Box::new(XlsxReportWriter::new(self.xlsx_path())),
        ];
        ReportAggregator::new(writers)
    }

    /// Builds jobs from `input` the way the CLI does and runs the batch.
    pub fn run_urls(&self, input: &[&str]) -> RunOutcome {
        self.run_urls_with(input, Arc::new(NoopProgress))
    }

    pub fn run_urls_with(
        &self,
        input: &[&str],
        progress: Arc<dyn ProgressReporter>,
    ) -> RunOutcome {
        let input: Vec<String> = input.iter().map(|u| u.to_string()).collect();
        let jobs = urls::build_jobs(&input, &NormalizationConfig::default());
        self.run_jobs(jobs, progress)
    }

    pub fn run_jobs(&self, jobs: Vec<Job>, progress: Arc<dyn ProgressReporter>) -> RunOutcome {
        let scheduler =
            JobScheduler::new(self.workers, self.pipeline(), progress, self.shutdown.clone());
        let jobs = scheduler.run_batch(jobs).expect("batch run failed");

        let aggregator = self.aggregator();
        let report = aggregator.aggregate(&jobs);
        let report_files = aggregator.publish(&report).expect("report publish failed");

        RunOutcome {
            jobs,
            report,
            report_files,
        }
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
