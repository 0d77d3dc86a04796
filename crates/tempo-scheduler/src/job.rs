//! Job definitions and execution context.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::JobError;
use crate::scheduler::Scheduler;

/// Type alias for a job's boxed async action.
pub type JobAction =
    Arc<dyn Fn(JobContext) -> Pin<Box<dyn Future<Output = Result<(), JobError>> + Send>> + Send + Sync>;

/// A named unit of work, immutable after registration.
#[derive(Clone)]
pub struct Job {
    name: String,
    action: JobAction,
}

impl Job {
    /// Create a job from an async closure.
    pub fn new<F, Fut>(name: impl Into<String>, action: F) -> Self
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), JobError>> + Send + 'static,
    {
        let action: JobAction = Arc::new(move |ctx| Box::pin(action(ctx)));
        Self {
            name: name.into(),
            action,
        }
    }

    /// The job's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn action(&self) -> JobAction {
        self.action.clone()
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job").field("name", &self.name).finish()
    }
}

/// Context handed to a job on each firing.
#[derive(Clone)]
pub struct JobContext {
    /// Name of the job being executed.
    pub job_name: String,
    /// Name of the trigger that fired.
    pub trigger_name: String,
    /// The logical occurrence this firing belongs to.
    pub scheduled_for: DateTime<Utc>,
    /// When dispatch actually happened (later than `scheduled_for` when
    /// catching up after a late wake).
    pub fired_at: DateTime<Utc>,
    /// Handle back to the scheduler, e.g. to unschedule from inside a job.
    pub scheduler: Scheduler,
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("job_name", &self.job_name)
            .field("trigger_name", &self.trigger_name)
            .field("scheduled_for", &self.scheduled_for)
            .field("fired_at", &self.fired_at)
            .finish_non_exhaustive()
    }
}
