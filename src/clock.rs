//! Time sources for the windowed counter.
//!
//! Background tasks never sleep directly; they ask a [`Clock`] for a one-shot
//! notification so tests can drive advances and flushes by hand.

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::oneshot;

/// Source of wall-clock time and one-shot delays.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock instant.
    fn now(&self) -> SystemTime;

    /// Resolves no earlier than `duration` from now. Dropping the future
    /// cancels the wait.
    fn after(&self, duration: Duration) -> BoxFuture<'static, ()>;
}

/// Clock backed by the OS wall clock and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn after(&self, duration: Duration) -> BoxFuture<'static, ()> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Nanoseconds since the Unix epoch, clamped to the `u64` range.
pub fn unix_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// Inverse of [`unix_nanos`].
pub fn from_unix_nanos(nanos: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos)
}

/// Hand-driven clock for tests.
///
/// `now` only moves when told to, and every future returned by
/// [`Clock::after`] stays pending until [`ManualClock::notify`] is called,
/// regardless of the requested duration. Any number of waiters may be
/// outstanding at once.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: SystemTime,
    waiters: Vec<oneshot::Sender<()>>,
}

impl ManualClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now,
                waiters: Vec::new(),
            }),
        }
    }

    pub fn set_now(&self, now: SystemTime) {
        self.state.lock().now = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut state = self.state.lock();
        state.now += by;
    }

    /// Fire every pending notification. Returns how many waiters were woken.
    pub fn notify(&self) -> usize {
        let waiters = std::mem::take(&mut self.state.lock().waiters);
        waiters
            .into_iter()
            .filter_map(|tx| tx.send(()).ok())
            .count()
    }

    /// Number of waiters still listening.
    pub fn pending(&self) -> usize {
        let mut state = self.state.lock();
        state.waiters.retain(|tx| !tx.is_closed());
        state.waiters.len()
    }

    /// Yield to the runtime until at least `count` waiters are registered.
    pub async fn until_pending(&self, count: usize) {
        while self.pending() < count {
            tokio::task::yield_now().await;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(UNIX_EPOCH)
    }
}

impl Clock for ManualClock {
    fn now(&self) -> SystemTime {
        self.state.lock().now
    }

    fn after(&self, _duration: Duration) -> BoxFuture<'static, ()> {
        let (tx, rx) = oneshot::channel();
        self.state.lock().waiters.push(tx);
        Box::pin(async move {
            // A dropped clock never fires.
            if rx.await.is_err() {
                std::future::pending::<()>().await;
            }
        })
    }
}
