use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Metrics for the windowed counter
#[derive(Debug, Default)]
pub struct CounterMetrics {
    /// Total number of counted reads
    pub reads: AtomicU64,
    /// Reads rejected because the counter was closing
    pub closed_rejections: AtomicU64,
    /// Total number of bucket advances
    pub advances: AtomicU64,
    /// Buckets zeroed by startup recovery
    pub stale_buckets_cleared: AtomicU64,
    /// Successful periodic flushes
    pub flushes: AtomicU64,
    /// Failed periodic flushes
    pub flush_failures: AtomicU64,
}

impl CounterMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_closed_rejection(&self) {
        self.closed_rejections.fetch_add(1, Ordering::Relaxed);
        trace!(counter_op = "get", outcome = "closed");
    }

    pub fn record_advance(&self, index: usize, cached_sum: u64) {
        self.advances.fetch_add(1, Ordering::Relaxed);
        trace!(counter_op = "advance", index = index, cached_sum = cached_sum);
    }

    pub fn record_stale_cleared(&self, buckets: usize) {
        self.stale_buckets_cleared
            .fetch_add(buckets as u64, Ordering::Relaxed);
        debug!(counter_op = "recover", stale_buckets = buckets);
    }

    pub fn record_flush(&self, latency: Duration) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
        trace!(
            counter_op = "flush",
            latency_us = latency.as_micros() as u64
        );
    }

    pub fn record_flush_failure(&self, error: &str) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
        warn!(counter_op = "flush", error = error);
    }

    /// Get flush success rate as a percentage
    pub fn flush_success_rate(&self) -> f64 {
        let ok = self.flushes.load(Ordering::Relaxed);
        let failed = self.flush_failures.load(Ordering::Relaxed);
        let total = ok + failed;
        if total == 0 {
            return 100.0;
        }
        (ok as f64 / total as f64) * 100.0
    }

    /// Reads per second over `elapsed_secs`
    pub fn read_rate(&self, elapsed_secs: f64) -> f64 {
        if elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.reads.load(Ordering::Relaxed) as f64 / elapsed_secs
    }

    /// Log a summary of counter metrics
    pub fn log_summary(&self, elapsed_secs: f64) {
        info!(
            operation = "counter_metrics_summary",
            reads = self.reads.load(Ordering::Relaxed),
            reads_per_sec = self.read_rate(elapsed_secs),
            closed_rejections = self.closed_rejections.load(Ordering::Relaxed),
            advances = self.advances.load(Ordering::Relaxed),
            stale_buckets_cleared = self.stale_buckets_cleared.load(Ordering::Relaxed),
            flushes = self.flushes.load(Ordering::Relaxed),
            flush_failures = self.flush_failures.load(Ordering::Relaxed),
            flush_success_rate_pct = self.flush_success_rate(),
            duration_secs = elapsed_secs,
        );
    }
}

/// Metrics for the HTTP surface
#[derive(Debug, Default)]
pub struct HttpMetrics {
    /// Total number of requests handled
    pub requests: AtomicU64,
    /// Requests answered with 503 while shutting down
    pub unavailable: AtomicU64,
    /// Requests answered with any other error status
    pub errors: AtomicU64,
}

impl HttpMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, route: &str) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        trace!(http_op = "request", route = route);
    }

    pub fn record_error(&self, route: &str, status: u16) {
        if status == 503 {
            self.unavailable.fetch_add(1, Ordering::Relaxed);
        } else {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        debug!(http_op = "error", route = route, status = status);
    }

    /// Log a summary of HTTP metrics
    pub fn log_summary(&self) {
        info!(
            operation = "http_metrics_summary",
            requests = self.requests.load(Ordering::Relaxed),
            unavailable = self.unavailable.load(Ordering::Relaxed),
            errors = self.errors.load(Ordering::Relaxed),
        );
    }
}

/// Combined metrics for the entire service
pub struct Metrics {
    pub counter: Arc<CounterMetrics>,
    pub http: Arc<HttpMetrics>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counter: Arc::new(CounterMetrics::new()),
            http: Arc::new(HttpMetrics::new()),
            start_time: Instant::now(),
        }
    }

    /// Log a complete metrics summary
    pub fn log_full_summary(&self) {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        info!("=== request-counter Metrics Summary ===");
        self.counter.log_summary(elapsed);
        self.http.log_summary();
        info!("=======================================");
    }

    /// Create a periodic logging background task that exits once `stop` is cancelled
    pub fn spawn_periodic_logging(
        self: &Arc<Self>,
        interval_secs: u64,
        stop: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let metrics = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let elapsed = metrics.start_time.elapsed().as_secs_f64();
                info!("--- request-counter Metrics (periodic) ---");
                metrics.counter.log_summary(elapsed);
                metrics.http.log_summary();
            }
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_metrics() {
        let metrics = CounterMetrics::new();

        metrics.record_read();
        metrics.record_read();
        metrics.record_closed_rejection();
        metrics.record_advance(1, 2);
        metrics.record_stale_cleared(3);

        assert_eq!(metrics.reads.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.closed_rejections.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.advances.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.stale_buckets_cleared.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn test_flush_success_rate() {
        let metrics = CounterMetrics::new();
        assert_eq!(metrics.flush_success_rate(), 100.0);

        metrics.record_flush(Duration::from_micros(40));
        metrics.record_flush_failure("disk full");

        assert!((metrics.flush_success_rate() - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_read_rate() {
        let metrics = CounterMetrics::new();
        assert_eq!(metrics.read_rate(0.0), 0.0);

        for _ in 0..10 {
            metrics.record_read();
        }
        assert!((metrics.read_rate(2.0) - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_http_metrics_split_unavailable() {
        let metrics = HttpMetrics::new();
        metrics.record_request("/requestcount");
        metrics.record_error("/requestcount", 503);
        metrics.record_error("/requestcount", 500);

        assert_eq!(metrics.requests.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.unavailable.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.errors.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_periodic_logging_stops_on_cancel() {
        let metrics = Arc::new(Metrics::new());
        let stop = CancellationToken::new();
        let handle = metrics.spawn_periodic_logging(3600, stop.clone());

        stop.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("periodic logger did not stop")
            .unwrap();
    }
}
