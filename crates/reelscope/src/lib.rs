pub mod broadcast;
pub mod config;
pub mod error;
pub mod gate;
pub mod job;
pub mod logging;
pub mod pipeline;
pub mod report;
pub mod sanitize;
pub mod secrets;
pub mod services;
pub mod shutdown;
pub mod storage;
pub mod urls;
pub mod worker;

#[cfg(test)]
mod testing;

pub use broadcast::{JobProgressEvent, JobStatus};
pub use config::{load_config, Config};
pub use error::{
    ConfigError, InputError, ReelscopeError, ReportError, Result, StorageError, WorkerError,
};
pub use gate::{ProviderGate, ProviderPermit};
pub use job::{ArtifactKind, ArtifactRef, FailureDescriptor, FailureKind, Job, JobError, JobId, Stage};
pub use pipeline::{Collaborators, Pipeline, PipelineConfig, ProgressEvent, ProgressReporter};
pub use report::{AggregateReport, ReportAggregator, ReportRow, RunSummary};
pub use secrets::{resolve_api_key, resolve_secret, SecretError};
pub use shutdown::Shutdown;
pub use storage::ArtifactStore;
pub use worker::JobScheduler;
