use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ReportError;
use crate::job::{ArtifactKind, Job, Stage};
use crate::services::ai::value_to_text;
use crate::services::AnalysisResult;
use crate::storage::ArtifactStore;

use super::writer::ReportWriter;

/// Columns every row carries, ahead of the analysis fields.
pub const FIXED_COLUMNS: [&str; 15] = [
    "job_id",
    "url",
    "status",
    "stage",
    "attempts",
    "failure_kind",
    "failure_message",
    "retries_exhausted",
    "video",
    "audio",
    "frames",
    "analysis",
    "export",
    "provider",
    "model",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    Done,
    Failed,
    /// Stopped by cancellation before reaching a terminal stage.
    Interrupted,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::Done => write!(f, "done"),
            RowStatus::Failed => write!(f, "failed"),
            RowStatus::Interrupted => write!(f, "interrupted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRow {
    pub job_id: String,
    pub url: String,
    pub status: RowStatus,
    /// Stage the job stopped in: the failing stage for failed jobs.
    pub stage: Stage,
    pub attempts: u32,
    pub failure_kind: Option<String>,
    pub failure_message: Option<String>,
    pub retries_exhausted: bool,
    pub artifacts: BTreeMap<ArtifactKind, PathBuf>,
    pub provider: Option<String>,
    pub model: Option<String>,
    /// Analysis fields rendered as text.
    pub fields: BTreeMap<String, String>,
}

impl ReportRow {
    fn from_job(job: &Job) -> Self {
        let status = match job.stage() {
            Stage::Done => RowStatus::Done,
            Stage::Failed => RowStatus::Failed,
            _ => RowStatus::Interrupted,
        };

        let analysis = job
            .artifact(ArtifactKind::AnalysisResult)
            .and_then(|artifact| read_analysis(&artifact.path));

        let (provider, model, fields) = match analysis {
            Some(analysis) => (
                Some(analysis.provider),
                Some(analysis.model),
                analysis
                    .fields
                    .iter()
                    .map(|(k, v)| (field_column(k), value_to_text(v)))
                    .collect(),
            ),
            None => (None, None, BTreeMap::new()),
        };

        Self {
            job_id: job.id().to_string(),
            url: job.url().to_string(),
            status,
            stage: job.final_stage(),
            attempts: job.total_attempts(),
            failure_kind: job.failure().map(|f| f.kind.to_string()),
            failure_message: job.failure().map(|f| f.message.clone()),
            retries_exhausted: job.failure().is_some_and(|f| f.retries_exhausted),
            artifacts: job
                .artifacts()
                .iter()
                .map(|(kind, artifact)| (*kind, artifact.path.clone()))
                .collect(),
            provider,
            model,
            fields,
        }
    }

    fn artifact_cell(&self, kind: ArtifactKind) -> String {
        self.artifacts
            .get(&kind)
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }

    /// Cells in the order of [`AggregateReport::columns`].
    pub fn cells(&self, field_columns: &[String]) -> Vec<String> {
        let mut cells = vec![
            self.job_id.clone(),
            self.url.clone(),
            self.status.to_string(),
            self.stage.to_string(),
            self.attempts.to_string(),
            self.failure_kind.clone().unwrap_or_default(),
            self.failure_message.clone().unwrap_or_default(),
            self.retries_exhausted.to_string(),
            self.artifact_cell(ArtifactKind::VideoFile),
            self.artifact_cell(ArtifactKind::AudioFile),
            self.artifact_cell(ArtifactKind::FrameSet),
            self.artifact_cell(ArtifactKind::AnalysisResult),
            self.artifact_cell(ArtifactKind::Export),
            self.provider.clone().unwrap_or_default(),
            self.model.clone().unwrap_or_default(),
        ];
        cells.extend(
            field_columns
                .iter()
                .map(|c| self.fields.get(c).cloned().unwrap_or_default()),
        );
        cells
    }
}

/// Column name for an analysis field; names taken by a fixed column get an
/// `analysis_` prefix.
fn field_column(name: &str) -> String {
    if FIXED_COLUMNS.contains(&name) {
        format!("analysis_{}", name)
    } else {
        name.to_string()
    }
}

fn read_analysis(path: &Path) -> Option<AnalysisResult> {
    let parsed: Result<AnalysisResult, String> = std::fs::read(path)
        .map_err(|e| e.to_string())
        .and_then(|bytes| serde_json::from_slice(&bytes).map_err(|e| e.to_string()));
    match parsed {
        Ok(analysis) => Some(analysis),
        Err(e) => {
            log::warn!(
                "Cannot read analysis '{}': {}",
                crate::sanitize::redact_path(path),
                e
            );
            None
        }
    }
}

/// Done / failed / interrupted counts of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub total: usize,
    pub done: usize,
    pub failed: usize,
    pub interrupted: usize,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} jobs: {} done, {} failed, {} interrupted",
            self.total, self.done, self.failed, self.interrupted
        )
    }
}

/// One row per job plus the union of analysis field names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateReport {
    pub generated_at: DateTime<Utc>,
    pub field_columns: Vec<String>,
    pub rows: Vec<ReportRow>,
}

impl AggregateReport {
    pub fn columns(&self) -> Vec<String> {
        FIXED_COLUMNS
            .iter()
            .map(|c| c.to_string())
            .chain(self.field_columns.iter().cloned())
            .collect()
    }

    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary {
            total: self.rows.len(),
            ..RunSummary::default()
        };
        for row in &self.rows {
            match row.status {
                RowStatus::Done => summary.done += 1,
                RowStatus::Failed => summary.failed += 1,
                RowStatus::Interrupted => summary.interrupted += 1,
            }
        }
        summary
    }

    pub fn row(&self, job_id: &str) -> Option<&ReportRow> {
        self.rows.iter().find(|r| r.job_id == job_id)
    }
}

/// Builds the cross-job report and hands it to every configured writer.
pub struct ReportAggregator {
    writers: Vec<Box<dyn ReportWriter>>,
}

impl ReportAggregator {
    pub fn new(writers: Vec<Box<dyn ReportWriter>>) -> Self {
        Self { writers }
    }

    /// One row per job, in input order. Jobs are never dropped; unreadable
    /// analysis artifacts only leave the field columns empty.
    pub fn aggregate(&self, jobs: &[Job]) -> AggregateReport {
        let rows: Vec<ReportRow> = jobs.iter().map(ReportRow::from_job).collect();
        let field_columns: BTreeSet<String> = rows
            .iter()
            .flat_map(|row| row.fields.keys().cloned())
            .collect();

        AggregateReport {
            generated_at: Utc::now(),
            field_columns: field_columns.into_iter().collect(),
            rows,
        }
    }

    /// Rebuilds the report from the `job.json` records under `store`.
    pub fn aggregate_store(&self, store: &ArtifactStore) -> Result<AggregateReport, ReportError> {
        let jobs = store.load_records()?;
        Ok(self.aggregate(&jobs))
    }

    /// Writes the report with every writer and returns their locations.
    pub fn publish(&self, report: &AggregateReport) -> Result<Vec<PathBuf>, ReportError> {
        let mut locations = Vec::with_capacity(self.writers.len());
        for writer in &self.writers {
            let location = writer.write(report)?;
            log::info!(
                "Wrote {} report ({} rows) to {}",
                writer.name(),
                report.rows.len(),
                location.display()
            );
            locations.push(location);
        }
        Ok(locations)
    }
}
