use std::fmt;

use crate::job::{ArtifactRef, FailureDescriptor, FailureKind};
use crate::storage::ArtifactPayload;

/// Whether a failure is worth another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    Retryable,
    Fatal,
}

/// Implemented by collaborator errors so stages can map them uniformly.
pub trait ClassifiedError: fmt::Display {
    fn kind(&self) -> FailureKind;
    fn class(&self) -> FailureClass;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Result of one attempt of a stage function.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    Success(ArtifactPayload),
    RetryableFailure(StageFailure),
    FatalFailure(StageFailure),
}

impl StageOutcome {
    pub fn retryable(kind: FailureKind, message: impl Into<String>) -> Self {
        StageOutcome::RetryableFailure(StageFailure::new(kind, message))
    }

    pub fn fatal(kind: FailureKind, message: impl Into<String>) -> Self {
        StageOutcome::FatalFailure(StageFailure::new(kind, message))
    }

    /// Maps a collaborator error to the matching failure variant.
    pub fn from_error<E: ClassifiedError>(error: &E) -> Self {
        let failure = StageFailure::new(error.kind(), error.to_string());
        match error.class() {
            FailureClass::Retryable => StageOutcome::RetryableFailure(failure),
            FailureClass::Fatal => StageOutcome::FatalFailure(failure),
        }
    }

    pub fn from_result<T, E, F>(result: Result<T, E>, into_payload: F) -> Self
    where
        E: ClassifiedError,
        F: FnOnce(T) -> ArtifactPayload,
    {
        match result {
            Ok(value) => StageOutcome::Success(into_payload(value)),
            Err(e) => StageOutcome::from_error(&e),
        }
    }
}

/// What the executor did with a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageExecution {
    /// The stage ran and its artifact was committed.
    Advanced(ArtifactRef),
    /// The artifact was already on disk and was reused.
    Reused(ArtifactRef),
    /// The job is now Failed.
    Failed(FailureDescriptor),
    /// Cancellation stopped the stage; the job is unchanged apart from
    /// attempt counts.
    Interrupted,
}

impl StageExecution {
    pub fn advanced(&self) -> bool {
        matches!(self, StageExecution::Advanced(_) | StageExecution::Reused(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Flaky(bool);

    impl fmt::Display for Flaky {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "flaky")
        }
    }

    impl ClassifiedError for Flaky {
        fn kind(&self) -> FailureKind {
            FailureKind::Network
        }

        fn class(&self) -> FailureClass {
            if self.0 {
                FailureClass::Retryable
            } else {
                FailureClass::Fatal
            }
        }
    }

    #[test]
    fn test_from_error_follows_class() {
        assert!(matches!(
            StageOutcome::from_error(&Flaky(true)),
            StageOutcome::RetryableFailure(_)
        ));
        assert!(matches!(
            StageOutcome::from_error(&Flaky(false)),
            StageOutcome::FatalFailure(_)
        ));
    }

    #[test]
    fn test_from_result_success_maps_payload() {
        let result: Result<Vec<u8>, Flaky> = Ok(b"data".to_vec());
        let outcome = StageOutcome::from_result(result, ArtifactPayload::Bytes);
        assert_eq!(outcome, StageOutcome::Success(ArtifactPayload::Bytes(b"data".to_vec())));
    }

    #[test]
    fn test_failure_display() {
        let failure = StageFailure::new(FailureKind::RateLimited, "429");
        assert_eq!(failure.to_string(), "rate_limited: 429");
    }
}
