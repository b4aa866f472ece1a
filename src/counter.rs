//! Windowed request counter.
//!
//! The counter keeps a ring of `N` buckets, each covering one
//! `interval_duration`. Reads increment the current bucket and report it plus
//! a cached total of all buckets, so a read is O(1). A background task
//! advances the ring on every interval; for persistent counters a second task
//! flushes the backing file on its own cadence.
//!
//! # Word layout
//!
//! The counter array holds `N + 2` words:
//!
//! | word | meaning |
//! |------|---------|
//! | 0 | current bucket index, in `[0, N)` |
//! | 1 | nanoseconds since the Unix epoch of the last advance |
//! | 2..N+1 | one count per bucket |
//!
//! For persistent counters this is also the on-disk format.

use crate::clock::{unix_nanos, Clock};
use crate::error::{RequestCounterError, RequestCounterResult};
use crate::metrics::CounterMetrics;
use crate::storage::{self, Flush, Storage};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Word holding the current bucket index.
pub const INDEX_WORD: usize = 0;
/// Word holding the last advance timestamp.
pub const TIMESTAMP_WORD: usize = 1;
/// Word of bucket 0.
pub const FIRST_BUCKET_WORD: usize = 2;

/// Result of a counted read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestCount {
    pub count: u64,
}

/// Parameters for [`WindowedCounter::open`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterConfig {
    /// Number of buckets, `N`.
    pub interval_count: usize,
    /// Width of one bucket.
    pub interval_duration: Duration,
    /// Back the counters with a memory-mapped file.
    pub persistent: bool,
    /// Backing file, used only when `persistent`.
    pub filename: PathBuf,
    /// Flush cadence, used only when `persistent`.
    pub persist_duration: Duration,
}

impl CounterConfig {
    /// Total span covered by the ring.
    pub fn window(&self) -> Duration {
        self.interval_duration
            .saturating_mul(u32::try_from(self.interval_count).unwrap_or(u32::MAX))
    }

    fn words(&self) -> RequestCounterResult<usize> {
        if self.interval_count == 0 {
            return Err(RequestCounterError::InvalidArgument(
                "interval count must be greater than zero".into(),
            ));
        }
        if self.interval_duration.is_zero() {
            return Err(RequestCounterError::InvalidArgument(
                "interval duration must be greater than zero".into(),
            ));
        }
        if self.persistent && self.persist_duration.is_zero() {
            return Err(RequestCounterError::InvalidArgument(
                "persist duration must be greater than zero".into(),
            ));
        }
        self.interval_count
            .checked_add(FIRST_BUCKET_WORD)
            .ok_or_else(|| RequestCounterError::InvalidArgument("interval count too large".into()))
    }
}

/// Ring state. Every method expects to run under the counter's lock.
#[derive(Debug)]
struct Window {
    storage: Box<dyn Storage>,
    bucket_count: usize,
    cached_sum: u64,
}

impl Window {
    fn new(storage: Box<dyn Storage>, bucket_count: usize) -> Self {
        Self {
            storage,
            bucket_count,
            cached_sum: 0,
        }
    }

    fn current_index(&self) -> RequestCounterResult<usize> {
        let raw = self.storage.load(INDEX_WORD)?;
        usize::try_from(raw)
            .ok()
            .filter(|index| *index < self.bucket_count)
            .ok_or(RequestCounterError::OutOfBounds {
                index: usize::try_from(raw).unwrap_or(usize::MAX),
                len: self.bucket_count,
            })
    }

    fn bucket(&self, bucket: usize) -> RequestCounterResult<u64> {
        self.storage.load(FIRST_BUCKET_WORD + bucket)
    }

    fn set_bucket(&mut self, bucket: usize, value: u64) -> RequestCounterResult<()> {
        self.storage.store(FIRST_BUCKET_WORD + bucket, value)
    }

    /// Count one request and return the windowed total.
    fn increment(&mut self) -> RequestCounterResult<u64> {
        let current = self.current_index()?;
        let value = self.bucket(current)?.saturating_add(1);
        self.set_bucket(current, value)?;
        Ok(value.saturating_add(self.cached_sum))
    }

    /// Rotate onto the next bucket, zero it, and refresh the cached sum.
    fn advance(&mut self, now: SystemTime) -> RequestCounterResult<usize> {
        let next = (self.current_index()? + 1) % self.bucket_count;
        self.storage.store(INDEX_WORD, next as u64)?;
        self.storage.store(TIMESTAMP_WORD, unix_nanos(now))?;
        self.set_bucket(next, 0)?;
        self.recompute_sum()?;
        Ok(next)
    }

    fn recompute_sum(&mut self) -> RequestCounterResult<u64> {
        let mut sum = 0u64;
        for bucket in 0..self.bucket_count {
            sum = sum.saturating_add(self.bucket(bucket)?);
        }
        self.cached_sum = sum;
        Ok(sum)
    }

    /// Zero every bucket whose nominal start time has passed since the last
    /// recorded advance, then refresh the cached sum. Returns how many buckets
    /// were zeroed.
    ///
    /// Bucket `(I + 1 + i) mod N` is stale when `T0 + i * D <= now`, where `I`
    /// is the current index and `T0` the last advance. The current index is
    /// left as it is.
    fn recover(&mut self, now: SystemTime, bucket_duration: Duration) -> RequestCounterResult<usize> {
        let raw_index = self.storage.load(INDEX_WORD)?;
        if raw_index >= self.bucket_count as u64 {
            warn!(
                operation = "recover",
                stored_index = raw_index,
                bucket_count = self.bucket_count,
                "persisted bucket index is outside the ring, resetting to 0"
            );
            self.storage.store(INDEX_WORD, 0)?;
        }

        let current = self.current_index()?;
        let last_advance = u128::from(self.storage.load(TIMESTAMP_WORD)?);
        let now = u128::from(unix_nanos(now));
        let step = bucket_duration.as_nanos();

        let mut cleared = 0;
        for i in 0..self.bucket_count {
            let nominal = step.saturating_mul(i as u128).saturating_add(last_advance);
            if nominal > now {
                break;
            }
            self.set_bucket((current + 1 + i) % self.bucket_count, 0)?;
            cleared += 1;
        }

        self.recompute_sum()?;
        Ok(cleared)
    }

    fn words(&self) -> RequestCounterResult<Vec<u64>> {
        (0..self.storage.len()).map(|i| self.storage.load(i)).collect()
    }
}

type SharedWindow = Arc<Mutex<Option<Window>>>;

/// Approximate count of requests over a rolling window.
///
/// Lifecycle: [`open`](Self::open), [`start`](Self::start) once, any number of
/// [`get`](Self::get) calls, then [`close`](Self::close).
pub struct WindowedCounter {
    config: CounterConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<CounterMetrics>,
    /// `None` once closing has begun.
    window: SharedWindow,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl WindowedCounter {
    /// Allocate or map the counter array. Storage failures are fatal to startup.
    pub fn open(
        config: CounterConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<CounterMetrics>,
    ) -> RequestCounterResult<Self> {
        let words = config.words()?;
        let storage = storage::open(config.persistent, &config.filename, words)?;

        info!(
            operation = "counter_open",
            buckets = config.interval_count,
            bucket_ms = config.interval_duration.as_millis() as u64,
            persistent = config.persistent,
            filename = %config.filename.display(),
        );

        Ok(Self {
            window: Arc::new(Mutex::new(Some(Window::new(storage, config.interval_count)))),
            config,
            clock,
            metrics,
            shutdown: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    /// Recover stale buckets (persistent counters only), compute the cached
    /// sum, and launch the background tasks. Must run inside a tokio runtime.
    pub fn start(&self) -> RequestCounterResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(RequestCounterError::AlreadyStarted);
        }

        let flusher = {
            let mut guard = self.window.lock();
            let window = guard.as_mut().ok_or(RequestCounterError::Closed)?;

            if self.config.persistent {
                let cleared = window.recover(self.clock.now(), self.config.interval_duration)?;
                self.metrics.record_stale_cleared(cleared);
            } else {
                window.recompute_sum()?;
            }

            info!(
                operation = "counter_start",
                index = window.current_index()?,
                cached_sum = window.cached_sum,
            );
            window.storage.flusher()
        };

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(run_advance(
            Arc::clone(&self.window),
            Arc::clone(&self.clock),
            self.config.interval_duration,
            self.shutdown.clone(),
            Arc::clone(&self.metrics),
        )));

        if self.config.persistent {
            if let Some(flusher) = flusher {
                tasks.push(tokio::spawn(run_persist(
                    flusher,
                    Arc::clone(&self.clock),
                    self.config.persist_duration,
                    self.shutdown.clone(),
                    Arc::clone(&self.metrics),
                )));
            }
        }

        Ok(())
    }

    /// Count one request and return the windowed total.
    ///
    /// Returns [`RequestCounterError::Closed`] once [`close`](Self::close) has
    /// begun; callers should report that as temporarily unavailable.
    pub fn get(&self) -> RequestCounterResult<RequestCount> {
        let count = {
            let mut guard = self.window.lock();
            match guard.as_mut() {
                Some(window) => window.increment()?,
                None => {
                    self.metrics.record_closed_rejection();
                    return Err(RequestCounterError::Closed);
                }
            }
        };

        self.metrics.record_read();
        debug!(count = count, "counted request");
        Ok(RequestCount { count })
    }

    /// Raw counter words in storage order.
    pub fn snapshot(&self) -> RequestCounterResult<Vec<u64>> {
        let guard = self.window.lock();
        guard.as_ref().ok_or(RequestCounterError::Closed)?.words()
    }

    /// Cached total of all buckets as of the last advance or recovery.
    pub fn cached_sum(&self) -> RequestCounterResult<u64> {
        let guard = self.window.lock();
        Ok(guard.as_ref().ok_or(RequestCounterError::Closed)?.cached_sum)
    }

    pub fn is_closed(&self) -> bool {
        self.window.lock().is_none()
    }

    /// Stop both background tasks, wait for them to exit, mark the counter
    /// closed, then flush and release storage.
    ///
    /// Returns the first teardown error; later steps still run. A second call
    /// returns [`RequestCounterError::Closed`].
    pub async fn close(&self) -> RequestCounterResult<()> {
        self.shutdown.cancel();

        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                error!(operation = "counter_close", error = %e, "background task failed");
            }
        }

        let window = self.window.lock().take();
        let Some(window) = window else {
            return Err(RequestCounterError::Closed);
        };

        info!(
            operation = "counter_close",
            cached_sum = window.cached_sum,
            "releasing counter storage"
        );
        window.storage.close()
    }
}

impl Drop for WindowedCounter {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for WindowedCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowedCounter")
            .field("config", &self.config)
            .field("started", &self.started.load(Ordering::Relaxed))
            .field("closed", &self.is_closed())
            .finish()
    }
}

async fn run_advance(
    window: SharedWindow,
    clock: Arc<dyn Clock>,
    every: Duration,
    shutdown: CancellationToken,
    metrics: Arc<CounterMetrics>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = clock.after(every) => {}
        }

        let now = clock.now();
        let mut guard = window.lock();
        let Some(ring) = guard.as_mut() else {
            break;
        };
        match ring.advance(now) {
            Ok(index) => metrics.record_advance(index, ring.cached_sum),
            Err(e) => error!(operation = "advance", error = %e),
        }
    }
    debug!(operation = "advance", "advance task stopped");
}

async fn run_persist(
    flusher: Arc<dyn Flush>,
    clock: Arc<dyn Clock>,
    every: Duration,
    shutdown: CancellationToken,
    metrics: Arc<CounterMetrics>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = clock.after(every) => {}
        }

        let started = Instant::now();
        match flusher.flush() {
            Ok(()) => metrics.record_flush(started.elapsed()),
            Err(e) => metrics.record_flush_failure(&e.to_string()),
        }
    }
    debug!(operation = "persist", "persist task stopped");
}
