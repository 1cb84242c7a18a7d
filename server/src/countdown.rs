//! Phase countdowns
//!
//! Each session owns one `Countdown` slot. Arming records a deadline and asks a
//! `TimerDriver` to deliver exactly one `TimerFired` later. The slot refuses to
//! arm while a timer is pending, so callers must cancel first and timers can
//! never overlap. Every arm gets a fresh generation number; an expiry carrying
//! an old generation is ignored, which covers the window where a cancelled
//! task already sent its message. The slot also carries the epoch of the
//! session that owns it, so a session recreated under the same code never
//! accepts an expiry meant for its predecessor.

use crate::error::{SessionError, SessionResult};
use crate::utils::get_timestamp;
use log::debug;
use shared::{CountdownView, TimerContext};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// Expiry notice delivered back to the coordinator loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFired {
    pub session: String,
    pub epoch: u64,
    pub generation: u64,
}

/// Handle to one scheduled expiry.
pub trait PendingExpiry: Send + Sync {
    fn cancel(&self);
}

/// Schedules expiries. The tokio driver is used at runtime; tests use
/// `RecordingTimerDriver` and fire expiries by hand.
pub trait TimerDriver: Send + Sync {
    fn schedule(
        &self,
        session: &str,
        epoch: u64,
        generation: u64,
        after: Duration,
    ) -> Box<dyn PendingExpiry>;
}

pub struct TokioTimerDriver {
    tx: mpsc::UnboundedSender<TimerFired>,
}

impl TokioTimerDriver {
    pub fn new(tx: mpsc::UnboundedSender<TimerFired>) -> Self {
        Self { tx }
    }
}

struct TokioPending(AbortHandle);

impl PendingExpiry for TokioPending {
    fn cancel(&self) {
        self.0.abort();
    }
}

impl TimerDriver for TokioTimerDriver {
    fn schedule(
        &self,
        session: &str,
        epoch: u64,
        generation: u64,
        after: Duration,
    ) -> Box<dyn PendingExpiry> {
        let tx = self.tx.clone();
        let session = session.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let fired = TimerFired {
                session,
                epoch,
                generation,
            };
            if tx.send(fired).is_err() {
                debug!("Timer fired after the coordinator stopped");
            }
        });
        Box::new(TokioPending(handle.abort_handle()))
    }
}

#[derive(Debug, Clone)]
pub struct ScheduledExpiry {
    pub session: String,
    pub epoch: u64,
    pub generation: u64,
    pub after: Duration,
    cancelled: Arc<AtomicBool>,
}

impl ScheduledExpiry {
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

struct RecordedPending(Arc<AtomicBool>);

impl PendingExpiry for RecordedPending {
    fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Deterministic driver that only records what was scheduled or cancelled.
#[derive(Clone, Default)]
pub struct RecordingTimerDriver {
    scheduled: Arc<Mutex<Vec<ScheduledExpiry>>>,
}

impl RecordingTimerDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scheduled(&self) -> Vec<ScheduledExpiry> {
        self.scheduled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn pending(&self) -> Vec<ScheduledExpiry> {
        self.scheduled()
            .into_iter()
            .filter(|s| !s.is_cancelled())
            .collect()
    }

    pub fn pending_for(&self, session: &str) -> Option<ScheduledExpiry> {
        self.pending().into_iter().rev().find(|s| s.session == session)
    }
}

impl TimerDriver for RecordingTimerDriver {
    fn schedule(
        &self,
        session: &str,
        epoch: u64,
        generation: u64,
        after: Duration,
    ) -> Box<dyn PendingExpiry> {
        let cancelled = Arc::new(AtomicBool::new(false));
        self.scheduled
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(ScheduledExpiry {
                session: session.to_string(),
                epoch,
                generation,
                after,
                cancelled: Arc::clone(&cancelled),
            });
        Box::new(RecordedPending(cancelled))
    }
}

struct ArmedTimer {
    context: TimerContext,
    duration: Duration,
    deadline: Instant,
    deadline_epoch_ms: u64,
    generation: u64,
    pending: Box<dyn PendingExpiry>,
}

/// Single timer slot of one session.
#[derive(Default)]
pub struct Countdown {
    armed: Option<ArmedTimer>,
    epoch: u64,
    generation: u64,
}

impl fmt::Debug for Countdown {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Countdown")
            .field("context", &self.context())
            .field("epoch", &self.epoch)
            .field("generation", &self.generation)
            .field("remaining", &self.remaining())
            .finish()
    }
}

impl Countdown {
    pub fn new() -> Self {
        Self::default()
    }

    /// Slot owned by the session with the given epoch.
    pub fn for_epoch(epoch: u64) -> Self {
        Self {
            epoch,
            ..Self::default()
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Arms the slot and returns the deadline in epoch milliseconds.
    ///
    /// Fails when a timer is already pending; cancel it first.
    pub fn arm(
        &mut self,
        driver: &dyn TimerDriver,
        session: &str,
        duration: Duration,
        context: TimerContext,
    ) -> SessionResult<u64> {
        if self.armed.is_some() {
            return Err(SessionError::TimerAlreadyArmed);
        }

        self.generation += 1;
        let deadline_epoch_ms = get_timestamp() + duration.as_millis() as u64;
        let pending = driver.schedule(session, self.epoch, self.generation, duration);

        self.armed = Some(ArmedTimer {
            context,
            duration,
            deadline: Instant::now() + duration,
            deadline_epoch_ms,
            generation: self.generation,
            pending,
        });
        debug!(
            "Session {}: armed {:?} timer #{} for {:?}",
            session, context, self.generation, duration
        );
        Ok(deadline_epoch_ms)
    }

    /// Cancels the pending expiry. Returns whether anything was armed.
    pub fn cancel(&mut self) -> bool {
        match self.armed.take() {
            Some(timer) => {
                timer.pending.cancel();
                true
            }
            None => false,
        }
    }

    /// Consumes a fired expiry if it belongs to the timer currently armed.
    pub fn accept_expiry(&mut self, epoch: u64, generation: u64) -> Option<TimerContext> {
        if epoch != self.epoch {
            return None;
        }
        match &self.armed {
            Some(timer) if timer.generation == generation => {
                self.armed.take().map(|timer| timer.context)
            }
            _ => None,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.is_some()
    }

    pub fn context(&self) -> Option<TimerContext> {
        self.armed.as_ref().map(|t| t.context)
    }

    /// Generation of the most recent arm, whether or not it is still pending.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn armed_generation(&self) -> Option<u64> {
        self.armed.as_ref().map(|t| t.generation)
    }

    pub fn duration(&self) -> Option<Duration> {
        self.armed.as_ref().map(|t| t.duration)
    }

    /// Time left, clamped at zero.
    pub fn remaining(&self) -> Option<Duration> {
        self.armed
            .as_ref()
            .map(|t| t.deadline.saturating_duration_since(Instant::now()))
    }

    pub fn remaining_secs(&self) -> f64 {
        self.remaining().map(|d| d.as_secs_f64()).unwrap_or(0.0)
    }

    pub fn deadline_epoch_ms(&self) -> Option<u64> {
        self.armed.as_ref().map(|t| t.deadline_epoch_ms)
    }

    pub fn view(&self) -> Option<CountdownView> {
        self.armed.as_ref().map(|t| CountdownView {
            context: t.context,
            remaining_seconds: t
                .deadline
                .saturating_duration_since(Instant::now())
                .as_secs_f64(),
            deadline: t.deadline_epoch_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_arm_requires_cancel_first() {
        let driver = RecordingTimerDriver::new();
        let mut countdown = Countdown::new();

        assert_ok!(countdown.arm(&driver, "S", Duration::from_secs(10), TimerContext::GameStart));
        assert_err!(countdown.arm(&driver, "S", Duration::from_secs(5), TimerContext::PerGuess));
        assert_eq!(driver.scheduled().len(), 1);

        assert!(countdown.cancel());
        assert!(driver.scheduled()[0].is_cancelled());
        assert!(!countdown.cancel());

        assert_ok!(countdown.arm(&driver, "S", Duration::from_secs(5), TimerContext::PerGuess));
        assert_eq!(countdown.context(), Some(TimerContext::PerGuess));
        assert_eq!(driver.pending().len(), 1);
        assert_eq!(driver.pending()[0].generation, 2);
    }

    #[test]
    fn test_remaining_is_clamped() {
        let driver = RecordingTimerDriver::new();
        let mut countdown = Countdown::new();
        assert_eq!(countdown.remaining(), None);
        assert_eq!(countdown.remaining_secs(), 0.0);

        countdown
            .arm(&driver, "S", Duration::from_secs(30), TimerContext::GameStart)
            .unwrap();
        let left = countdown.remaining().unwrap();
        assert!(left <= Duration::from_secs(30));
        assert!(left > Duration::from_secs(29));

        countdown.cancel();
        countdown
            .arm(&driver, "S", Duration::ZERO, TimerContext::PerGuess)
            .unwrap();
        std::thread::sleep(Duration::from_millis(2));
        assert_eq!(countdown.remaining(), Some(Duration::ZERO));
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let driver = RecordingTimerDriver::new();
        let mut countdown = Countdown::new();
        countdown
            .arm(&driver, "S", Duration::from_secs(1), TimerContext::GameStart)
            .unwrap();
        let first = countdown.generation();
        countdown.cancel();
        countdown
            .arm(&driver, "S", Duration::from_secs(1), TimerContext::PerGuess)
            .unwrap();

        assert_eq!(countdown.accept_expiry(0, first), None);
        assert!(countdown.is_armed());

        let current = countdown.generation();
        assert_eq!(countdown.accept_expiry(0, current), Some(TimerContext::PerGuess));
        assert!(!countdown.is_armed());
        assert_eq!(countdown.accept_expiry(0, current), None, "fires once");
    }

    #[test]
    fn test_expiry_from_another_epoch_is_ignored() {
        let driver = RecordingTimerDriver::new();
        let mut previous = Countdown::for_epoch(1);
        previous
            .arm(&driver, "S", Duration::from_secs(1), TimerContext::GameStart)
            .unwrap();
        let stale = driver.pending_for("S").unwrap();
        assert_eq!((stale.epoch, stale.generation), (1, 1));

        // Same code, same generation, newer session.
        let mut current = Countdown::for_epoch(2);
        current
            .arm(&driver, "S", Duration::from_secs(1), TimerContext::GameStart)
            .unwrap();
        assert_eq!(current.accept_expiry(stale.epoch, stale.generation), None);
        assert!(current.is_armed());
        assert_eq!(
            current.accept_expiry(2, stale.generation),
            Some(TimerContext::GameStart)
        );
    }

    #[test]
    fn test_view_carries_deadline() {
        let driver = RecordingTimerDriver::new();
        let mut countdown = Countdown::new();
        let before = get_timestamp();
        let deadline = countdown
            .arm(&driver, "S", Duration::from_secs(20), TimerContext::GameStart)
            .unwrap();
        assert!(deadline >= before + 20_000);

        let view = countdown.view().unwrap();
        assert_eq!(view.deadline, deadline);
        assert_eq!(view.context, TimerContext::GameStart);
        assert!(view.remaining_seconds <= 20.0);
    }

    #[tokio::test]
    async fn test_tokio_driver_fires_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = TokioTimerDriver::new(tx);
        let mut countdown = Countdown::for_epoch(4);
        countdown
            .arm(&driver, "S", Duration::from_millis(10), TimerContext::PerGuess)
            .unwrap();

        let fired = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fired.session, "S");
        assert_eq!(
            countdown.accept_expiry(fired.epoch, fired.generation),
            Some(TimerContext::PerGuess)
        );
    }

    #[tokio::test]
    async fn test_tokio_driver_cancel_prevents_fire() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let driver = TokioTimerDriver::new(tx);
        let mut countdown = Countdown::new();
        countdown
            .arm(&driver, "S", Duration::from_millis(30), TimerContext::GameStart)
            .unwrap();
        countdown.cancel();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());
    }
}
