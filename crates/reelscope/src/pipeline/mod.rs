pub mod config;
pub mod executor;
pub mod outcome;
pub mod progress;
pub mod retry;
pub mod runner;

pub use config::PipelineConfig;
pub use executor::StageExecutor;
pub use outcome::{ClassifiedError, FailureClass, StageExecution, StageFailure, StageOutcome};
pub use progress::{
    BroadcastProgress, FanoutProgress, LogProgress, NoopProgress, ProgressEvent, ProgressReporter,
};
pub use retry::RetryPolicy;
pub use runner::{Collaborators, ExportRecord, Pipeline};
