//! Delayed jobs that post events back onto the coordinator queue.

use crate::event::{Event, EventSender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// The sweep never runs more often than once a minute.
pub const MIN_KEYSTORE_UPDATE_INTERVAL_MS: i64 = 60_000;
/// The sweep always runs at least once a day.
pub const MAX_KEYSTORE_UPDATE_INTERVAL_MS: i64 = 86_400_000;

/// Delay before the next expiration sweep, given
/// `AuthorizationLedger::next_expiration_time`.
///
/// `-1` schedules nothing and `0` runs right away. Anything else is clamped
/// into the one minute to one day band.
pub fn expiration_delay(next_expiration_ms: i64) -> Option<Duration> {
    match next_expiration_ms {
        ms if ms < 0 => None,
        0 => Some(Duration::ZERO),
        ms => {
            let clamped = ms.clamp(
                MIN_KEYSTORE_UPDATE_INTERVAL_MS,
                MAX_KEYSTORE_UPDATE_INTERVAL_MS,
            );
            Some(Duration::from_millis(clamped as u64))
        }
    }
}

/// At most one job per slot is pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerSlot {
    KeyStoreUpdate,
    PairingTimeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerJob {
    KeyStoreUpdate,
    PairingTimeout { session_id: u64 },
}

impl TimerJob {
    pub fn slot(&self) -> TimerSlot {
        match self {
            TimerJob::KeyStoreUpdate => TimerSlot::KeyStoreUpdate,
            TimerJob::PairingTimeout { .. } => TimerSlot::PairingTimeout,
        }
    }

    pub fn event(&self) -> Event {
        match *self {
            TimerJob::KeyStoreUpdate => Event::ExpirationSweepDue,
            TimerJob::PairingTimeout { session_id } => Event::PairingTimedOut { session_id },
        }
    }
}

pub trait Scheduler: Send + Sync {
    /// Run `job` after `delay`, replacing whatever was pending in its slot.
    fn schedule(&self, job: TimerJob, delay: Duration);

    fn cancel(&self, slot: TimerSlot);
}

/// Scheduler backed by tokio timers.
///
/// Timers only post events; the coordinator does the work when it drains
/// them.
pub struct TokioScheduler {
    runtime: Handle,
    events: EventSender,
    pending: Mutex<HashMap<TimerSlot, JoinHandle<()>>>,
}

impl TokioScheduler {
    pub fn new(runtime: Handle, events: EventSender) -> Self {
        Self {
            runtime,
            events,
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&self, job: TimerJob, delay: Duration) {
        let events = self.events.clone();
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(job.event());
        });

        debug!(job = ?job, delay_ms = delay.as_millis() as u64, "Timer scheduled");
        if let Some(previous) = self.pending.lock().insert(job.slot(), task) {
            previous.abort();
        }
    }

    fn cancel(&self, slot: TimerSlot) {
        if let Some(task) = self.pending.lock().remove(&slot) {
            task.abort();
            debug!(slot = ?slot, "Timer cancelled");
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.pending.lock().drain() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use tokio::time::Instant;

    const MINUTE_MS: i64 = 60_000;
    const HOUR_MS: i64 = 60 * MINUTE_MS;
    const DAY_MS: i64 = 24 * HOUR_MS;

    // ========================================================================
    // expiration_delay
    // ========================================================================

    #[test]
    fn nothing_to_expire_schedules_nothing() {
        assert_eq!(expiration_delay(-1), None);
    }

    #[test]
    fn already_expired_runs_immediately() {
        assert_eq!(expiration_delay(0), Some(Duration::ZERO));
    }

    #[test]
    fn short_delays_are_raised_to_a_minute() {
        assert_eq!(expiration_delay(30_000), Some(Duration::from_secs(60)));
        assert_eq!(expiration_delay(1), Some(Duration::from_secs(60)));
    }

    #[test]
    fn delays_inside_the_band_are_kept() {
        assert_eq!(
            expiration_delay(2 * HOUR_MS),
            Some(Duration::from_millis(2 * HOUR_MS as u64))
        );
    }

    #[test]
    fn long_delays_are_capped_at_a_day() {
        assert_eq!(
            expiration_delay(3 * DAY_MS),
            Some(Duration::from_millis(DAY_MS as u64))
        );
    }

    // ========================================================================
    // TokioScheduler
    // ========================================================================

    #[tokio::test(start_paused = true)]
    async fn scheduled_job_posts_its_event() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler::new(Handle::current(), tx);
        let start = Instant::now();

        scheduler.schedule(TimerJob::KeyStoreUpdate, Duration::from_secs(60));

        assert_eq!(rx.recv().await, Some(Event::ExpirationSweepDue));
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_job_never_fires() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler::new(Handle::current(), tx);

        scheduler.schedule(TimerJob::KeyStoreUpdate, Duration::from_secs(60));
        scheduler.cancel(TimerSlot::KeyStoreUpdate);

        let waited = tokio::time::timeout(Duration::from_secs(3_600), rx.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_replaces_pending_job() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler::new(Handle::current(), tx);
        let start = Instant::now();

        scheduler.schedule(TimerJob::KeyStoreUpdate, Duration::from_secs(10));
        scheduler.schedule(TimerJob::KeyStoreUpdate, Duration::from_secs(30));

        assert_eq!(rx.recv().await, Some(Event::ExpirationSweepDue));
        assert!(start.elapsed() >= Duration::from_secs(30));

        let waited = tokio::time::timeout(Duration::from_secs(3_600), rx.recv()).await;
        assert!(waited.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn slots_are_independent() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let scheduler = TokioScheduler::new(Handle::current(), tx);

        scheduler.schedule(
            TimerJob::PairingTimeout { session_id: 7 },
            Duration::from_secs(5),
        );
        scheduler.schedule(TimerJob::KeyStoreUpdate, Duration::from_secs(60));
        scheduler.cancel(TimerSlot::KeyStoreUpdate);

        assert_eq!(
            rx.recv().await,
            Some(Event::PairingTimedOut { session_id: 7 })
        );
    }
}
