//! Scripted collaborators for integration tests.
//!
//! Each fake counts its calls so tests can assert that reruns reuse
//! persisted artifacts instead of calling the services again.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;

use reelscope::config::{FramesConfig, PromptConfig};
use reelscope::pipeline::{ProgressEvent, ProgressReporter};
use reelscope::services::{
    AiProvider, AnalysisResult, DownloadError, Downloader, ProviderError, TranscodeError,
    Transcoder,
};
use reelscope::{Job, Shutdown};

/// Downloader that writes a small file, or fails for URLs registered with
/// [`ScriptedDownloader::fail_url`].
#[derive(Default)]
pub struct ScriptedDownloader {
    failures: Mutex<HashMap<String, fn() -> DownloadError>>,
    calls: AtomicU32,
}

impl ScriptedDownloader {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every download of a URL containing `needle` fails with `error`.
    pub fn fail_url(&self, needle: &str, error: fn() -> DownloadError) {
        self.failures
            .lock()
            .unwrap()
            .insert(needle.to_string(), error);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Downloader for ScriptedDownloader {
    fn download(&self, url: &str, dest: &Path) -> Result<PathBuf, DownloadError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failure = self
            .failures
            .lock()
            .unwrap()
            .iter()
            .find(|(needle, _)| url.contains(needle.as_str()))
            .map(|(_, make)| *make);
        if let Some(make) = failure {
            return Err(make());
        }
        std::fs::write(dest, url.as_bytes()).map_err(|e| DownloadError::Network(e.to_string()))?;
        Ok(dest.to_path_buf())
    }
}

/// Transcoder that writes placeholder audio and `frame_count` frames.
pub struct CountingTranscoder {
    frame_count: usize,
    audio_calls: AtomicU32,
    frame_calls: AtomicU32,
}

impl CountingTranscoder {
    pub fn new(frame_count: usize) -> Arc<Self> {
        Arc::new(Self {
            frame_count,
            audio_calls: AtomicU32::new(0),
            frame_calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.audio_calls.load(Ordering::SeqCst) + self.frame_calls.load(Ordering::SeqCst)
    }
}

impl Transcoder for CountingTranscoder {
    fn extract_audio(&self, _video: &Path, dest: &Path) -> Result<PathBuf, TranscodeError> {
        self.audio_calls.fetch_add(1, Ordering::SeqCst);
        std::fs::write(dest, b"mp3").map_err(|e| TranscodeError::Decode(e.to_string()))?;
        Ok(dest.to_path_buf())
    }

    fn extract_frames(
        &self,
        _video: &Path,
        policy: &FramesConfig,
        dest_dir: &Path,
    ) -> Result<Vec<PathBuf>, TranscodeError> {
        self.frame_calls.fetch_add(1, Ordering::SeqCst);
        std::fs::create_dir_all(dest_dir).map_err(|e| TranscodeError::Decode(e.to_string()))?;
        (0..self.frame_count.min(policy.max_frames))
            .map(|i| {
                let path = dest_dir.join(format!("frame_{:03}.jpg", i));
                std::fs::write(&path, b"jpg")
                    .map(|_| path)
                    .map_err(|e| TranscodeError::Decode(e.to_string()))
            })
            .collect()
    }
}

/// Provider that plays back queued failures before answering, and can pull
/// the shutdown trigger from inside a call.
pub struct ScriptedProvider {
    delay: Duration,
    failures: Mutex<VecDeque<fn() -> ProviderError>>,
    trigger_on_call: Mutex<Option<Shutdown>>,
    calls: AtomicU32,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            failures: Mutex::new(VecDeque::new()),
            trigger_on_call: Mutex::new(None),
            calls: AtomicU32::new(0),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        })
    }

    /// Queues `count` failures returned by the next calls, in order.
    pub fn fail_next(&self, count: usize, error: fn() -> ProviderError) {
        let mut failures = self.failures.lock().unwrap();
        for _ in 0..count {
            failures.push_back(error);
        }
    }

    /// Triggers `shutdown` at the start of the next call, which still succeeds.
    pub fn trigger_on_next_call(&self, shutdown: Shutdown) {
        *self.trigger_on_call.lock().unwrap() = Some(shutdown);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

impl AiProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted-1"
    }

    fn analyze(
        &self,
        _audio: &Path,
        frames: &[PathBuf],
        _prompt: &PromptConfig,
    ) -> Result<AnalysisResult, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(shutdown) = self.trigger_on_call.lock().unwrap().take() {
            shutdown.trigger();
        }

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(make) = self.failures.lock().unwrap().pop_front() {
            return Err(make());
        }

        let mut fields = BTreeMap::new();
        fields.insert("summary".to_string(), Value::String("a cooking clip".to_string()));
        fields.insert("frame_count".to_string(), Value::from(frames.len()));
        fields.insert(
            "tags".to_string(),
            Value::Array(vec![Value::from("food"), Value::from("howto")]),
        );
        Ok(AnalysisResult::new("scripted", "scripted-1", fields))
    }
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
