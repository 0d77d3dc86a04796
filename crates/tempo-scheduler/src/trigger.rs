//! Trigger types and fire-time arithmetic.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::SchedulerError;

/// When a trigger fires.
///
/// Deserialization runs the same period validation as the constructors, so
/// a decoded schedule is as well-formed as a constructed one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", try_from = "RawSchedule")]
pub enum Schedule {
    /// Fire exactly once at a specific instant.
    Once { at: DateTime<Utc> },
    /// Fire every `seconds` starting at `start_at` (registration time when
    /// `None`), repeating indefinitely.
    Every {
        seconds: u64,
        start_at: Option<DateTime<Utc>>,
    },
}

/// Unvalidated wire form of [`Schedule`].
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RawSchedule {
    Once { at: DateTime<Utc> },
    Every {
        seconds: u64,
        start_at: Option<DateTime<Utc>>,
    },
}

impl TryFrom<RawSchedule> for Schedule {
    type Error = SchedulerError;

    fn try_from(raw: RawSchedule) -> Result<Self, Self::Error> {
        match raw {
            RawSchedule::Once { at } => Ok(Schedule::Once { at }),
            RawSchedule::Every { seconds, start_at } => {
                check_period_seconds(seconds)?;
                Ok(Schedule::Every { seconds, start_at })
            }
        }
    }
}

/// Period invariant shared by the constructors and deserialization: at least
/// one second, and small enough for fire-time arithmetic.
fn check_period_seconds(seconds: u64) -> Result<(), SchedulerError> {
    if seconds == 0 {
        return Err(SchedulerError::InvalidTrigger(
            "interval period must be a positive number of seconds, got 0".to_string(),
        ));
    }
    if i64::try_from(seconds)
        .ok()
        .and_then(Duration::try_seconds)
        .is_none()
    {
        return Err(SchedulerError::InvalidTrigger(format!(
            "interval period of {seconds} seconds is too large"
        )));
    }
    Ok(())
}

/// A named trigger bound to one job at registration.
///
/// Periods are validated at construction; a `Trigger` that exists is always
/// well-formed, so fire-time computation never fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    name: String,
    schedule: Schedule,
}

impl Trigger {
    /// Create a one-shot trigger firing at `at`.
    ///
    /// An instant already in the past is accepted: the scheduler's misfire
    /// policy fires it immediately on the next dispatch iteration.
    pub fn once(name: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            schedule: Schedule::Once { at },
        }
    }

    /// Create a repeating trigger that fires every `period`, starting at
    /// registration time.
    ///
    /// Fails with [`SchedulerError::InvalidTrigger`] when `period` is zero,
    /// negative, or finer than one second.
    pub fn every(name: impl Into<String>, period: Duration) -> Result<Self, SchedulerError> {
        Self::every_starting_at_inner(name.into(), period, None)
    }

    /// Create a repeating trigger with an explicit first fire time.
    ///
    /// A `start_at` in the past means "start now": the first fire happens at
    /// registration, with subsequent fires one `period` apart from it.
    pub fn every_starting_at(
        name: impl Into<String>,
        period: Duration,
        start_at: DateTime<Utc>,
    ) -> Result<Self, SchedulerError> {
        Self::every_starting_at_inner(name.into(), period, Some(start_at))
    }

    fn every_starting_at_inner(
        name: String,
        period: Duration,
        start_at: Option<DateTime<Utc>>,
    ) -> Result<Self, SchedulerError> {
        if period < Duration::seconds(1) {
            return Err(SchedulerError::InvalidTrigger(format!(
                "interval period must be a positive number of seconds, got {period}"
            )));
        }
        Ok(Self {
            name,
            schedule: Schedule::Every {
                seconds: period.num_seconds() as u64,
                start_at,
            },
        })
    }

    /// The trigger's unique name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying schedule.
    pub fn schedule(&self) -> &Schedule {
        &self.schedule
    }

    /// First fire time for a trigger registered at `now`.
    ///
    /// One-shot triggers return their instant even when it has passed, so the
    /// scheduler can apply its fire-immediately misfire policy.
    pub fn initial_fire_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match &self.schedule {
            Schedule::Once { at } => *at,
            Schedule::Every { start_at, .. } => match start_at {
                Some(start) if *start > now => *start,
                _ => now,
            },
        }
    }

    /// Fire time following the occurrence at `last_fire`, or `None` once the
    /// trigger is exhausted.
    ///
    /// Computed from the scheduled occurrence rather than from "now", so a
    /// late dispatch never shifts the interval grid (no drift accumulation).
    pub fn next_fire_time(&self, last_fire: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match &self.schedule {
            Schedule::Once { .. } => None,
            Schedule::Every { seconds, .. } => {
                Some(last_fire + Duration::seconds(*seconds as i64))
            }
        }
    }
}
