//! Error types for the scheduler.

use thiserror::Error;

/// Errors that can occur in scheduler operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Trigger configuration was rejected at construction.
    #[error("invalid trigger: {0}")]
    InvalidTrigger(String),

    /// A job or trigger name is already registered.
    #[error("duplicate identity: {0}")]
    DuplicateIdentity(String),

    /// The scheduler has been shut down and accepts no new registrations.
    #[error("scheduler is shut down")]
    ShutDown,
}

/// Failure produced by a job's own execute action.
///
/// Recovered locally by the scheduler: logged, reported to the observer,
/// never allowed to halt the dispatch loop or disturb other entries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct JobError(pub String);

impl JobError {
    /// Create a new job error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for JobError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for JobError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}
