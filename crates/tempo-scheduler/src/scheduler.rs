//! Scheduler implementation.
//!
//! One dispatch loop owns all timing decisions; job executions are spawned
//! onto their own tasks so a slow job never delays a sibling's fire time.
//! Registry mutations wake the loop early so an entry due sooner than the
//! current sleep target is honored immediately.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::job::{Job, JobAction, JobContext};
use crate::trigger::Trigger;
use crate::{JobError, SchedulerError};

/// One firing of a registered entry, as reported to the observer.
#[derive(Debug, Clone, Serialize)]
pub struct FireReport {
    /// Name of the job that was dispatched.
    pub job_name: String,
    /// Name of the trigger that fired.
    pub trigger_name: String,
    /// The logical occurrence that fired.
    pub scheduled_for: DateTime<Utc>,
    /// When the dispatch loop actually fired it.
    pub fired_at: DateTime<Utc>,
}

/// Callbacks for observing dispatch.
///
/// `job_fired` runs synchronously inside the dispatch loop, in firing order,
/// so simultaneous triggers are observed in their deterministic registration
/// order. `job_finished` runs on the job's own task when execution completes.
pub trait SchedulerObserver: Send + Sync {
    /// An entry became due and its job was dispatched.
    fn job_fired(&self, _report: &FireReport) {}

    /// A dispatched job execution finished.
    fn job_finished(&self, _job_name: &str, _result: &Result<(), JobError>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Stopped,
    Running,
    ShutDown,
}

/// One registered (job, trigger) pair.
struct Entry {
    job_name: String,
    trigger: Trigger,
    action: JobAction,
    next_fire: DateTime<Utc>,
    /// Registration sequence, the FIFO tie-break for simultaneous fires.
    seq: u64,
}

struct State {
    phase: Phase,
    entries: Vec<Entry>,
    next_seq: u64,
    loop_task: Option<JoinHandle<()>>,
}

struct Inner {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
    /// Wakes the dispatch loop out of its sleep on registry mutation or
    /// shutdown. `Notify` stores a permit, so a wake sent while the loop is
    /// between sleeps is never lost.
    wake: Notify,
    observer: Option<Arc<dyn SchedulerObserver>>,
    jobs_in_flight: TaskTracker,
}

/// The job scheduler.
///
/// Cheap to clone; all clones share the same registry and dispatch loop.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    /// Create a scheduler on the system wall clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a scheduler on an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::build(clock, None)
    }

    /// Create a scheduler with an injected clock and observer.
    pub fn with_observer(clock: Arc<dyn Clock>, observer: Arc<dyn SchedulerObserver>) -> Self {
        Self::build(clock, Some(observer))
    }

    fn build(clock: Arc<dyn Clock>, observer: Option<Arc<dyn SchedulerObserver>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                clock,
                state: Mutex::new(State {
                    phase: Phase::Stopped,
                    entries: Vec::new(),
                    next_seq: 0,
                    loop_task: None,
                }),
                wake: Notify::new(),
                observer,
                jobs_in_flight: TaskTracker::new(),
            }),
        }
    }

    /// Start the dispatch loop.
    ///
    /// Idempotent: calling on a running scheduler is a no-op. A shut-down
    /// scheduler stays shut down.
    pub async fn start(&self) {
        let mut state = self.inner.state.lock().await;
        match state.phase {
            Phase::Running => {}
            Phase::ShutDown => {
                warn!("start called on a shut-down scheduler, ignoring");
            }
            Phase::Stopped => {
                state.phase = Phase::Running;
                state.loop_task = Some(tokio::spawn(self.clone().dispatch_loop()));
                info!("scheduler started");
            }
        }
    }

    /// Register a job with the trigger that fires it.
    ///
    /// Fails with [`SchedulerError::DuplicateIdentity`] when either name is
    /// already registered. Accepted while stopped (the entry waits for
    /// [`start`](Self::start)) or running; refused after shutdown. Wakes the
    /// dispatch loop so a fire time earlier than its current sleep target is
    /// honored immediately.
    pub async fn schedule(&self, job: Job, trigger: Trigger) -> Result<EntryHandle, SchedulerError> {
        let trigger_name = trigger.name().to_string();
        {
            let mut state = self.inner.state.lock().await;
            if state.phase == Phase::ShutDown {
                return Err(SchedulerError::ShutDown);
            }
            if state.entries.iter().any(|e| e.job_name == job.name()) {
                return Err(SchedulerError::DuplicateIdentity(format!(
                    "job '{}' is already registered",
                    job.name()
                )));
            }
            if state.entries.iter().any(|e| e.trigger.name() == trigger_name) {
                return Err(SchedulerError::DuplicateIdentity(format!(
                    "trigger '{trigger_name}' is already registered"
                )));
            }

            let next_fire = trigger.initial_fire_time(self.inner.clock.now());
            let seq = state.next_seq;
            state.next_seq += 1;
            debug!(
                job = %job.name(),
                trigger = %trigger_name,
                next_fire = %next_fire,
                "registered entry"
            );
            state.entries.push(Entry {
                job_name: job.name().to_string(),
                action: job.action(),
                trigger,
                next_fire,
                seq,
            });
        }
        self.inner.wake.notify_one();

        Ok(EntryHandle {
            scheduler: self.clone(),
            trigger_name,
        })
    }

    /// Remove the entry registered under `trigger_name`.
    ///
    /// Returns whether it existed. Safe to call concurrently with dispatch: a
    /// firing whose fire-and-reschedule step already ran is not aborted, the
    /// cancellation takes effect from the next occurrence.
    pub async fn unschedule(&self, trigger_name: &str) -> bool {
        let removed = {
            let mut state = self.inner.state.lock().await;
            let before = state.entries.len();
            state.entries.retain(|e| e.trigger.name() != trigger_name);
            state.entries.len() < before
        };
        if removed {
            info!(trigger = trigger_name, "unscheduled entry");
            self.inner.wake.notify_one();
        }
        removed
    }

    /// Stop the dispatch loop. No entry fires after this returns.
    ///
    /// With `wait_for_jobs`, blocks until every in-flight job execution has
    /// completed; otherwise in-flight executions finish on their own.
    pub async fn shutdown(&self, wait_for_jobs: bool) {
        let loop_task = {
            let mut state = self.inner.state.lock().await;
            state.phase = Phase::ShutDown;
            state.loop_task.take()
        };
        self.inner.wake.notify_one();
        if let Some(task) = loop_task {
            // The loop only exits through its shutdown check, so join errors
            // can only come from a panicking job-free loop body.
            let _ = task.await;
        }
        self.inner.jobs_in_flight.close();
        if wait_for_jobs {
            self.inner.jobs_in_flight.wait().await;
        }
        info!(wait_for_jobs, "scheduler shut down");
    }

    /// Number of live entries in the registry.
    pub async fn entry_count(&self) -> usize {
        self.inner.state.lock().await.entries.len()
    }

    /// The pending fire time of the entry registered under `trigger_name`,
    /// or `None` if no such entry is live.
    pub async fn next_fire_time(&self, trigger_name: &str) -> Option<DateTime<Utc>> {
        self.inner
            .state
            .lock()
            .await
            .entries
            .iter()
            .find(|e| e.trigger.name() == trigger_name)
            .map(|e| e.next_fire)
    }

    async fn dispatch_loop(self) {
        debug!("dispatch loop started");
        loop {
            let now = self.inner.clock.now();
            let mut fired: Vec<(FireReport, JobAction)> = Vec::new();

            let earliest = {
                let mut state = self.inner.state.lock().await;
                if state.phase == Phase::ShutDown {
                    break;
                }

                // Due entries fire ordered by fire time, ties broken by
                // registration order.
                let mut due: Vec<(DateTime<Utc>, u64, usize)> = state
                    .entries
                    .iter()
                    .enumerate()
                    .filter(|(_, e)| e.next_fire <= now)
                    .map(|(idx, e)| (e.next_fire, e.seq, idx))
                    .collect();
                due.sort();

                let mut exhausted: Vec<u64> = Vec::new();
                for (scheduled_for, seq, idx) in due {
                    let entry = &mut state.entries[idx];
                    fired.push((
                        FireReport {
                            job_name: entry.job_name.clone(),
                            trigger_name: entry.trigger.name().to_string(),
                            scheduled_for,
                            fired_at: now,
                        },
                        entry.action.clone(),
                    ));
                    // Advance from the scheduled occurrence, not from now:
                    // this is what keeps intervals drift-free and makes each
                    // occurrence fire at most once.
                    match entry.trigger.next_fire_time(scheduled_for) {
                        Some(next) => entry.next_fire = next,
                        None => exhausted.push(seq),
                    }
                }
                if !exhausted.is_empty() {
                    state.entries.retain(|e| !exhausted.contains(&e.seq));
                }

                state.entries.iter().map(|e| e.next_fire).min()
            };

            for (report, action) in fired {
                if let Some(observer) = &self.inner.observer {
                    observer.job_fired(&report);
                }
                debug!(
                    job = %report.job_name,
                    trigger = %report.trigger_name,
                    scheduled_for = %report.scheduled_for,
                    "dispatching job"
                );
                let ctx = JobContext {
                    job_name: report.job_name.clone(),
                    trigger_name: report.trigger_name.clone(),
                    scheduled_for: report.scheduled_for,
                    fired_at: report.fired_at,
                    scheduler: self.clone(),
                };
                let observer = self.inner.observer.clone();
                self.inner.jobs_in_flight.spawn(async move {
                    let result = action(ctx).await;
                    if let Err(error) = &result {
                        warn!(job = %report.job_name, %error, "job execution failed");
                    }
                    if let Some(observer) = observer {
                        observer.job_finished(&report.job_name, &result);
                    }
                });
            }

            match earliest {
                // Something is already due again (catch-up after a late
                // wake); loop straight back around without sleeping.
                Some(deadline) if deadline <= self.inner.clock.now() => {}
                Some(deadline) => {
                    tokio::select! {
                        _ = self.inner.clock.sleep_until(deadline) => {}
                        _ = self.inner.wake.notified() => {}
                    }
                }
                None => self.inner.wake.notified().await,
            }
        }
        debug!("dispatch loop exited");
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler").finish_non_exhaustive()
    }
}

/// Handle returned by a successful registration.
#[derive(Debug, Clone)]
pub struct EntryHandle {
    scheduler: Scheduler,
    trigger_name: String,
}

impl EntryHandle {
    /// Name of the trigger this handle refers to.
    pub fn trigger_name(&self) -> &str {
        &self.trigger_name
    }

    /// Unschedule the entry. Returns whether it was still registered.
    pub async fn cancel(&self) -> bool {
        self.scheduler.unschedule(&self.trigger_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    use crate::clock::VirtualClock;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn noop_job(name: &str) -> Job {
        Job::new(name, |_ctx| async { Ok(()) })
    }

    #[tokio::test]
    async fn duplicate_job_name_is_rejected() {
        let scheduler = Scheduler::with_clock(Arc::new(VirtualClock::new(t0())));
        scheduler
            .schedule(noop_job("a"), Trigger::once("t1", t0() + Duration::hours(1)))
            .await
            .unwrap();

        let err = scheduler
            .schedule(noop_job("a"), Trigger::once("t2", t0() + Duration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateIdentity(_)));
        assert_eq!(scheduler.entry_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_trigger_name_is_rejected() {
        let scheduler = Scheduler::with_clock(Arc::new(VirtualClock::new(t0())));
        scheduler
            .schedule(noop_job("a"), Trigger::once("t", t0() + Duration::hours(1)))
            .await
            .unwrap();

        let err = scheduler
            .schedule(noop_job("b"), Trigger::once("t", t0() + Duration::hours(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::DuplicateIdentity(_)));
    }

    #[tokio::test]
    async fn unschedule_unknown_trigger_returns_false() {
        let scheduler = Scheduler::with_clock(Arc::new(VirtualClock::new(t0())));
        assert!(!scheduler.unschedule("missing").await);
    }

    #[tokio::test]
    async fn handle_cancels_its_entry() {
        let scheduler = Scheduler::with_clock(Arc::new(VirtualClock::new(t0())));
        let handle = scheduler
            .schedule(noop_job("a"), Trigger::once("t", t0() + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(handle.trigger_name(), "t");
        assert!(handle.cancel().await);
        assert!(!handle.cancel().await);
        assert_eq!(scheduler.entry_count().await, 0);
    }

    #[tokio::test]
    async fn schedule_after_shutdown_is_refused() {
        let scheduler = Scheduler::with_clock(Arc::new(VirtualClock::new(t0())));
        scheduler.start().await;
        scheduler.shutdown(false).await;

        let err = scheduler
            .schedule(noop_job("a"), Trigger::once("t", t0()))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ShutDown));
    }
}
