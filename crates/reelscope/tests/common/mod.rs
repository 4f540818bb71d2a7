//! Shared test utilities for reelscope integration tests.
//!
//! This module provides:
//! - `TestHarness` for running batches against fake collaborators in a temp directory
//! - Scripted fakes for the downloader, transcoder and AI provider
//! - Builders for config JSON

pub mod builders;
pub mod fakes;
pub mod harness;

pub use builders::*;
pub use fakes::*;
pub use harness::{RunOutcome, TestHarness};
