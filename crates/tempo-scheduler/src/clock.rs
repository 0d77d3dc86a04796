//! Clock abstraction.
//!
//! The scheduler never calls `Utc::now()` or `tokio::time::sleep` directly;
//! it goes through a [`Clock`] so tests can drive time by hand with a
//! [`VirtualClock`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;

/// Source of "now" and "sleep until" for the scheduler.
#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Block the calling task until the clock reaches `deadline`.
    ///
    /// Returns immediately if the deadline has already passed. Callers that
    /// need to wake early race this against their own wake signal.
    async fn sleep_until(&self, deadline: DateTime<Utc>);
}

/// Wall-clock implementation backed by the tokio timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        // A past deadline converts to a negative chrono duration, which
        // to_std rejects; treat that as "already due".
        if let Ok(wait) = (deadline - Utc::now()).to_std() {
            tokio::time::sleep(wait).await;
        }
    }
}

/// Manually driven clock for deterministic tests.
///
/// Time only moves when [`advance`](VirtualClock::advance) or
/// [`set`](VirtualClock::set) is called; every pending `sleep_until` re-checks
/// its deadline on each movement.
#[derive(Debug)]
pub struct VirtualClock {
    now: watch::Sender<DateTime<Utc>>,
}

impl VirtualClock {
    /// Create a virtual clock frozen at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        let (now, _) = watch::channel(start);
        Self { now }
    }

    /// Move the clock forward by `step`, waking any due sleepers.
    pub fn advance(&self, step: Duration) {
        self.now.send_modify(|t| *t = *t + step);
    }

    /// Jump the clock to an absolute instant, waking any due sleepers.
    pub fn set(&self, to: DateTime<Utc>) {
        self.now.send_replace(to);
    }
}

#[async_trait]
impl Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.borrow()
    }

    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let mut ticks = self.now.subscribe();
        loop {
            if *ticks.borrow_and_update() >= deadline {
                return;
            }
            if ticks.changed().await.is_err() {
                // Clock dropped while we were sleeping; nothing left to wait for.
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn virtual_clock_advance_and_set() {
        let clock = VirtualClock::new(t0());
        assert_eq!(clock.now(), t0());

        clock.advance(Duration::seconds(5));
        assert_eq!(clock.now(), t0() + Duration::seconds(5));

        clock.set(t0() + Duration::seconds(60));
        assert_eq!(clock.now(), t0() + Duration::seconds(60));
    }

    #[tokio::test]
    async fn virtual_sleep_wakes_when_deadline_reached() {
        let clock = std::sync::Arc::new(VirtualClock::new(t0()));
        let deadline = t0() + Duration::seconds(10);

        let sleeper = {
            let clock = clock.clone();
            tokio::spawn(async move { clock.sleep_until(deadline).await })
        };

        // Not enough: sleeper must still be pending.
        clock.advance(Duration::seconds(9));
        tokio::task::yield_now().await;
        assert!(!sleeper.is_finished());

        clock.advance(Duration::seconds(1));
        sleeper.await.unwrap();
    }

    #[tokio::test]
    async fn virtual_sleep_past_deadline_returns_immediately() {
        let clock = VirtualClock::new(t0());
        clock.sleep_until(t0() - Duration::seconds(1)).await;
        clock.sleep_until(t0()).await;
    }
}
