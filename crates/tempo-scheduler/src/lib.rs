//! In-process job scheduler for Tempo.
//!
//! This crate provides a small scheduler that:
//! - Supports one-shot and recurring interval triggers
//! - Keeps interval firings on a drift-free grid
//! - Dispatches job executions on their own tasks so a slow job never
//!   delays a sibling's fire time
//! - Fires simultaneous triggers in deterministic registration order
//!
//! Timing goes through the [`Clock`] trait, so tests drive the scheduler
//! with a [`VirtualClock`] instead of waiting on the wall clock.

mod clock;
mod error;
mod job;
mod scheduler;
mod trigger;

pub use clock::{Clock, SystemClock, VirtualClock};
pub use error::{JobError, SchedulerError};
pub use job::{Job, JobAction, JobContext};
pub use scheduler::{EntryHandle, FireReport, Scheduler, SchedulerObserver};
pub use trigger::{Schedule, Trigger};
