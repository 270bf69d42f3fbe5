//! `queuectl-core`: job queue domain building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! the job record, its state machine, and the retry/backoff arithmetic.

pub mod error;
pub mod id;
pub mod job;

pub use error::{DomainError, DomainResult};
pub use id::JobId;
pub use job::{
    AttemptOutput, DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY, FailureOutcome, Job, JobState,
    retry_delay,
};
