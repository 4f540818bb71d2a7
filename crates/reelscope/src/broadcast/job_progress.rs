//! Job progress events for live status streaming.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::job::Stage;

/// Default capacity of the progress channel. Slow subscribers lag instead of
/// blocking workers.
pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Processing,
    Completed,
    Failed,
    Interrupted,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgressEvent {
    pub job_id: String,
    /// Source URL with query and userinfo removed.
    pub url: String,
    pub stage: Stage,
    pub status: JobStatus,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobProgressEvent {
    pub fn new(job_id: &str, url: &str, stage: Stage, status: JobStatus, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            url: url.to_string(),
            stage,
            status,
            message: message.to_string(),
            timestamp: Utc::now(),
            attempt: None,
            artifact_path: None,
            error: None,
        }
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = Some(attempt);
        self
    }

    pub fn with_artifact(mut self, path: &str) -> Self {
        self.artifact_path = Some(path.to_string());
        self
    }

    pub fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Creates a progress channel. Events sent with no subscriber are dropped.
pub fn channel(
    capacity: usize,
) -> (
    Arc<broadcast::Sender<JobProgressEvent>>,
    broadcast::Receiver<JobProgressEvent>,
) {
    let (tx, rx) = broadcast::channel(capacity.max(1));
    (Arc::new(tx), rx)
}
