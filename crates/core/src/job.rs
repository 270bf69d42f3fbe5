//! Job record, lifecycle state machine, and retry arithmetic.

use core::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;
use crate::id::JobId;

/// Priority assigned when the submitter does not choose one.
pub const DEFAULT_PRIORITY: i32 = 5;

/// Retry budget assigned when neither the submitter nor configuration choose one.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Upper bound on a single backoff delay.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Lifecycle state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Queued, waiting to be claimed
    Pending,
    /// Claimed by exactly one worker and executing
    Processing,
    /// Finished successfully
    Completed,
    /// Failed, waiting for its backoff to elapse
    Failed,
    /// Retries exhausted; sits in the dead-letter queue
    Dead,
}

impl JobState {
    pub const ALL: [JobState; 5] = [
        JobState::Pending,
        JobState::Processing,
        JobState::Completed,
        JobState::Failed,
        JobState::Dead,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Processing => "processing",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Dead => "dead",
        }
    }

    /// `Completed` and `Dead` accept no further worker transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Dead)
    }

    /// States a worker may claim from.
    pub fn is_claimable(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Failed)
    }
}

impl core::fmt::Display for JobState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                DomainError::validation(format!(
                    "unknown job state '{s}' (expected one of: pending, processing, completed, failed, dead)"
                ))
            })
    }
}

/// Backoff delay after the given number of failed attempts: `backoff_base ^ attempts` seconds.
///
/// Non-finite or out-of-range results are clamped to one year.
pub fn retry_delay(backoff_base: f64, attempts: u32) -> Duration {
    let exponent = i32::try_from(attempts).unwrap_or(i32::MAX);
    let secs = backoff_base.powi(exponent);
    Duration::try_from_secs_f64(secs)
        .map(|d| d.min(MAX_RETRY_DELAY))
        .unwrap_or(MAX_RETRY_DELAY)
}

/// Captured output of one execution attempt.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttemptOutput {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    /// Wall-clock duration of the attempt, in seconds.
    pub elapsed_seconds: f64,
}

/// What a failed attempt did to the job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FailureOutcome {
    /// Job is `Failed` and becomes eligible again after `delay`.
    Retry { delay: Duration },
    /// Retry budget exhausted; job is `Dead`.
    Dead,
}

/// A queued shell-command job.
///
/// Field names and layout are the persisted record format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub command: String,
    pub state: JobState,
    /// Failed execution attempts so far
    #[serde(default)]
    pub attempts: u32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Higher runs sooner
    #[serde(default = "default_priority")]
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Not eligible before this instant
    #[serde(default)]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub next_retry_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    /// Seconds taken by the last attempt
    #[serde(default)]
    pub execution_time: Option<f64>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

impl Job {
    /// Create a new `Pending` job.
    pub fn new(id: JobId, command: impl Into<String>) -> Result<Self, DomainError> {
        let command = command.into();
        if command.trim().is_empty() {
            return Err(DomainError::validation("job command must not be empty"));
        }

        let now = Utc::now();
        Ok(Self {
            id,
            command,
            state: JobState::Pending,
            attempts: 0,
            max_retries: DEFAULT_MAX_RETRIES,
            priority: DEFAULT_PRIORITY,
            created_at: now,
            updated_at: now,
            run_at: None,
            next_retry_at: None,
            error_message: None,
            stdout: None,
            stderr: None,
            execution_time: None,
            started_at: None,
            completed_at: None,
        })
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Hold the job back until `at`.
    pub fn with_run_at(mut self, at: DateTime<Utc>) -> Self {
        self.run_at = Some(at);
        self
    }

    /// `Pending` and past its `run_at` (if any).
    pub fn is_eligible_pending(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Pending && self.run_at.is_none_or(|at| at <= now)
    }

    /// `Failed`, budget remaining, and past its `next_retry_at` (if any).
    pub fn is_eligible_retry(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Failed
            && self.attempts < self.max_retries
            && self.next_retry_at.is_none_or(|at| at <= now)
    }

    /// `Pending | Failed → Processing`.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if !self.state.is_claimable() {
            return Err(DomainError::invalid_transition(
                self.id.as_str(),
                self.state,
                "be claimed",
            ));
        }
        self.state = JobState::Processing;
        self.next_retry_at = None;
        self.started_at = Some(now);
        self.completed_at = None;
        self.updated_at = now;
        Ok(())
    }

    /// `Processing → Completed`.
    pub fn complete(&mut self, output: AttemptOutput, now: DateTime<Utc>) -> Result<(), DomainError> {
        self.ensure_processing("complete")?;
        self.record_attempt(output, now);
        self.state = JobState::Completed;
        self.error_message = None;
        self.next_retry_at = None;
        Ok(())
    }

    /// `Processing → Failed` (budget remains) or `Processing → Dead`.
    ///
    /// Counts the attempt, then schedules the next retry `backoff_base ^ attempts`
    /// seconds from `now` when `attempts < max_retries`.
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        output: AttemptOutput,
        backoff_base: f64,
        now: DateTime<Utc>,
    ) -> Result<FailureOutcome, DomainError> {
        self.ensure_processing("fail")?;
        let error = error.into();
        self.record_attempt(output, now);
        self.attempts = self.attempts.saturating_add(1);

        if self.attempts < self.max_retries {
            let delay = retry_delay(backoff_base, self.attempts);
            let step = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
            self.state = JobState::Failed;
            self.next_retry_at = Some(now.checked_add_signed(step).unwrap_or(DateTime::<Utc>::MAX_UTC));
            self.error_message = Some(error);
            Ok(FailureOutcome::Retry { delay })
        } else {
            self.state = JobState::Dead;
            self.next_retry_at = None;
            self.error_message = Some(format!(
                "Max retries ({}) exceeded. Last error: {error}",
                self.max_retries
            ));
            Ok(FailureOutcome::Dead)
        }
    }

    /// `Dead → Pending` with a fresh retry budget.
    pub fn requeue(&mut self, now: DateTime<Utc>) -> Result<(), DomainError> {
        if self.state != JobState::Dead {
            return Err(DomainError::invalid_transition(
                self.id.as_str(),
                self.state,
                "be requeued",
            ));
        }
        self.state = JobState::Pending;
        self.attempts = 0;
        self.error_message = None;
        self.next_retry_at = None;
        self.updated_at = now;
        Ok(())
    }

    fn ensure_processing(&self, action: &'static str) -> Result<(), DomainError> {
        if self.state != JobState::Processing {
            return Err(DomainError::invalid_transition(self.id.as_str(), self.state, action));
        }
        Ok(())
    }

    fn record_attempt(&mut self, output: AttemptOutput, now: DateTime<Utc>) {
        self.stdout = output.stdout;
        self.stderr = output.stderr;
        self.execution_time = Some(output.elapsed_seconds);
        self.completed_at = Some(now);
        self.updated_at = now;
    }
}
