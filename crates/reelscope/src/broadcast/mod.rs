pub mod job_progress;

pub use job_progress::{channel, JobProgressEvent, JobStatus};
