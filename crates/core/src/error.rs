//! Domain error model.

use thiserror::Error;

use crate::job::JobState;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, caller-visible failures (validation,
/// missing records, illegal transitions). Storage concerns belong elsewhere.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. empty command).
    #[error("validation failed: {0}")]
    Validation(String),

    /// No job with this id exists.
    #[error("job not found: {0}")]
    NotFound(String),

    /// A job with this id already exists.
    #[error("job already exists: {0}")]
    AlreadyExists(String),

    /// The job is not in a state that permits the requested transition.
    #[error("job {id} cannot {action} while {from}")]
    InvalidTransition {
        id: String,
        from: JobState,
        action: &'static str,
    },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn already_exists(id: impl Into<String>) -> Self {
        Self::AlreadyExists(id.into())
    }

    pub fn invalid_transition(id: impl Into<String>, from: JobState, action: &'static str) -> Self {
        Self::InvalidTransition {
            id: id.into(),
            from,
            action,
        }
    }
}
