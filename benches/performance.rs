//! Performance benchmarks for request-counter
//!
//! Run with: cargo bench
//!
//! These benchmarks measure:
//! - Single-threaded `get()` latency on volatile and durable storage
//! - Lock contention under concurrent readers
//! - Startup cost (map + recovery) for growing bucket counts

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::TempDir;
use tokio::runtime::Runtime;

use request_counter::metrics::CounterMetrics;
use request_counter::{CounterConfig, ManualClock, WindowedCounter};

/// Create a Tokio runtime for async benchmarks
fn create_runtime() -> Runtime {
    tokio::runtime::Runtime::new().unwrap()
}

fn counter_config(buckets: usize, persistent: bool, dir: &TempDir) -> CounterConfig {
    CounterConfig {
        interval_count: buckets,
        interval_duration: Duration::from_millis(600),
        persistent,
        filename: dir.path().join("bench.dat"),
        persist_duration: Duration::from_secs(5),
    }
}

/// Open and start a counter whose clock never fires, so no advance runs
/// during measurement.
fn started_counter(rt: &Runtime, config: CounterConfig) -> Arc<WindowedCounter> {
    let _guard = rt.enter();
    let counter = WindowedCounter::open(
        config,
        Arc::new(ManualClock::new(SystemTime::now())),
        Arc::new(CounterMetrics::new()),
    )
    .unwrap();
    counter.start().unwrap();
    Arc::new(counter)
}

/// Benchmark a single counted read
fn bench_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("get");
    group.throughput(Throughput::Elements(1));

    for persistent in [false, true] {
        let name = if persistent { "durable" } else { "volatile" };
        group.bench_function(name, |b| {
            let rt = create_runtime();
            let dir = TempDir::new().unwrap();
            let counter = started_counter(&rt, counter_config(100, persistent, &dir));

            b.iter(|| black_box(counter.get().unwrap()));

            rt.block_on(counter.close()).unwrap();
        });
    }

    group.finish();
}

/// Benchmark concurrent readers contending on the counter lock
fn bench_concurrent_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_get");
    const READS_PER_THREAD: u64 = 1000;

    for num_threads in [2, 4, 8, 16].iter() {
        let thread_count = *num_threads;
        group.throughput(Throughput::Elements(thread_count as u64 * READS_PER_THREAD));

        group.bench_with_input(
            BenchmarkId::new("threads", thread_count),
            &thread_count,
            |b, &threads| {
                let rt = create_runtime();
                let dir = TempDir::new().unwrap();
                let counter = started_counter(&rt, counter_config(100, false, &dir));

                b.iter(|| {
                    let mut handles = Vec::new();
                    for _ in 0..threads {
                        let counter = Arc::clone(&counter);
                        handles.push(std::thread::spawn(move || {
                            for _ in 0..READS_PER_THREAD {
                                black_box(counter.get().unwrap());
                            }
                        }));
                    }
                    for handle in handles {
                        handle.join().unwrap();
                    }
                });

                rt.block_on(counter.close()).unwrap();
            },
        );
    }

    group.finish();
}

/// Benchmark map + stale recovery + close for growing rings
fn bench_startup(c: &mut Criterion) {
    let mut group = c.benchmark_group("durable_startup");

    for buckets in [100, 10_000, 100_000].iter() {
        group.bench_with_input(BenchmarkId::new("buckets", buckets), buckets, |b, &n| {
            let rt = create_runtime();
            let dir = TempDir::new().unwrap();

            b.iter(|| {
                let counter = started_counter(&rt, counter_config(n, true, &dir));
                rt.block_on(counter.close()).unwrap();
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_get, bench_concurrent_get, bench_startup);
criterion_main!(benches);
