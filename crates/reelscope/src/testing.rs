//! In-process collaborators for unit tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use crate::config::{FramesConfig, PromptConfig};
use crate::gate::ProviderGate;
use crate::job::Job;
use crate::pipeline::{
    Collaborators, Pipeline, PipelineConfig, ProgressEvent, ProgressReporter, RetryPolicy,
};
use crate::services::{
    AiProvider, AnalysisResult, DownloadError, Downloader, ProviderError, TranscodeError,
    Transcoder,
};
use crate::shutdown::Shutdown;

pub struct FakeDownloader {
    pub error: Option<fn() -> DownloadError>,
    pub calls: AtomicU32,
}

impl FakeDownloader {
    pub fn ok() -> Arc<Self> {
        Arc::new(Self {
            error: None,
            calls: AtomicU32::new(0),
        })
    }

    pub fn failing(error: fn() -> DownloadError) -> Arc<Self> {
        Arc::new(Self {
            error: Some(error),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Downloader for FakeDownloader {
    fn download(&self, _url: &str, dest: &Path) -> Result<PathBuf, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(make) = self.error {
            return Err(make());
        }
        std::fs::write(dest, b"video").map_err(|e| DownloadError::Network(e.to_string()))?;
        Ok(dest.to_path_buf())
    }
}

pub struct FakeTranscoder;

impl Transcoder for FakeTranscoder {
    fn extract_audio(&self, _video: &Path, dest: &Path) -> Result<PathBuf, TranscodeError> {
        std::fs::write(dest, b"audio").map_err(|e| TranscodeError::Decode(e.to_string()))?;
        Ok(dest.to_path_buf())
    }

    fn extract_frames(
        &self,
        _video: &Path,
        policy: &FramesConfig,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, TranscodeError> {
        std::fs::create_dir_all(dest_dir).map_err(|e| TranscodeError::Decode(e.to_string()))?;
        (0..policy.max_frames.min(2))
            .map(|i| {
                let path = dest_dir.join(format!("frame_{:03}.jpg", i));
                std::fs::write(&path, b"jpg")
                    .map(|_| path)
                    .map_err(|e| TranscodeError::Decode(e.to_string()))
            })
            .collect()
    }
}

/// Answers with a fixed summary after an optional delay, tracking how many
/// calls overlap.
pub struct FakeProvider {
    pub delay: Duration,
    pub calls: AtomicU32,
    pub frames_seen: AtomicUsize,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl FakeProvider {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            calls: AtomicU32::new(0),
            frames_seen: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl AiProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    fn model(&self) -> &str {
        "fake-1"
    }

    fn analyze(
        &self,
        _audio: &Path,
        frames: &[PathBuf],
        _prompt: &PromptConfig,
    ) -> Result<AnalysisResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.frames_seen.store(frames.len(), Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut fields = BTreeMap::new();
        fields.insert("summary".to_string(), Value::String("a video".to_string()));
        Ok(AnalysisResult::new("fake", "fake-1", fields))
    }
}

pub fn pipeline_config(output: &Path, max_attempts: u32) -> Arc<PipelineConfig> {
    Arc::new(PipelineConfig {
        output_directory: output.to_path_buf(),
        force_refresh: false,
        retry: RetryPolicy::immediate(max_attempts),
        frames: FramesConfig::default(),
        prompt: PromptConfig::default(),
    })
}

pub fn pipeline(
    output: &Path,
    downloader: Arc<FakeDownloader>,
    provider: Arc<FakeProvider>,
    max_concurrent: usize,
    shutdown: Shutdown,
) -> Pipeline {
    Pipeline::new(
        pipeline_config(output, 2),
        Collaborators {
            downloader,
            transcoder: Arc::new(FakeTranscoder),
            provider,
        },
        Arc::new(ProviderGate::new(max_concurrent, Duration::ZERO)),
        shutdown,
    )
}

/// Keeps every event in memory, paired with the job id.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<(String, ProgressEvent)>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<(String, ProgressEvent)> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, job: &Job, event: ProgressEvent) {
        self.events
            .lock()
            .unwrap()
            .push((job.id().to_string(), event));
    }
}
