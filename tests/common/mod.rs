//! Common test utilities for request-counter
//!
//! Builders for counters driven by a [`ManualClock`], plus the HTTP router
//! wired to them.

#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use request_counter::api::{self, AppState};
use request_counter::metrics::{CounterMetrics, HttpMetrics};
use request_counter::{CounterConfig, ManualClock, WindowedCounter};

/// Volatile configuration with `buckets` one-second buckets.
pub fn volatile_config(buckets: usize) -> CounterConfig {
    CounterConfig {
        interval_count: buckets,
        interval_duration: Duration::from_secs(1),
        persistent: false,
        filename: "/tmp/requestcounter-unused.dat".into(),
        persist_duration: Duration::from_secs(5),
    }
}

/// Persistent configuration backed by `path`.
pub fn durable_config(buckets: usize, path: &Path) -> CounterConfig {
    CounterConfig {
        persistent: true,
        filename: path.to_path_buf(),
        ..volatile_config(buckets)
    }
}

/// A started counter and the clock that drives it.
pub struct TestCounter {
    pub counter: Arc<WindowedCounter>,
    pub clock: Arc<ManualClock>,
    pub metrics: Arc<CounterMetrics>,
}

impl TestCounter {
    pub fn start(config: CounterConfig, now: SystemTime) -> Self {
        let clock = Arc::new(ManualClock::new(now));
        let metrics = Arc::new(CounterMetrics::new());
        let counter = WindowedCounter::open(config, clock.clone(), metrics.clone())
            .expect("Failed to open counter");
        counter.start().expect("Failed to start counter");
        Self {
            counter: Arc::new(counter),
            clock,
            metrics,
        }
    }

    /// Fire every pending timer and wait until `tasks` background tasks are
    /// waiting again.
    pub async fn tick(&self, tasks: usize) {
        self.clock.until_pending(tasks).await;
        self.clock.notify();
        self.clock.until_pending(tasks).await;
    }

    pub fn app(&self) -> (axum::Router, Arc<HttpMetrics>) {
        let http = Arc::new(HttpMetrics::new());
        let state = AppState::new(Arc::clone(&self.counter), Arc::clone(&http));
        (api::router(state), http)
    }
}
