pub mod api;
pub mod clock;
pub mod config;
pub mod counter;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod metrics;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CliArgs, Config};
pub use counter::{CounterConfig, RequestCount, WindowedCounter};
pub use error::{RequestCounterError, RequestCounterResult};
pub use metrics::Metrics;

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Bind the configured address and serve until a termination signal.
/// `config` is expected to have passed [`Config::validate`].
pub async fn run(config: Config) -> Result<()> {
    tracing::info!(operation = "startup", message = "request-counter starting");
    tracing::debug!(config = ?config, "Configuration loaded");

    let listener = TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_address()))?;

    let shutdown = CancellationToken::new();
    let signals = lifecycle::cancel_on_signal(shutdown.clone());
    let result = serve(config, listener, shutdown.clone()).await;

    shutdown.cancel();
    lifecycle::join_logged("signal_wait", signals).await;
    result
}

/// Open and start the counter, then serve on `listener` until `shutdown` is
/// cancelled. The counter is closed before returning.
pub async fn serve(config: Config, listener: TcpListener, shutdown: CancellationToken) -> Result<()> {
    let metrics = Arc::new(Metrics::new());

    let counter = WindowedCounter::open(
        config.counter_config(),
        Arc::new(SystemClock),
        Arc::clone(&metrics.counter),
    )
    .context("Failed to open request counter")?;
    let counter = Arc::new(counter);

    if let Err(e) = counter.start() {
        let _ = counter.close().await;
        return Err(e).context("Failed to start request counter");
    }

    let periodic = (config.logging.metrics_interval_secs > 0).then(|| {
        metrics.spawn_periodic_logging(config.logging.metrics_interval_secs, shutdown.clone())
    });

    let app = api::router(api::AppState::new(
        Arc::clone(&counter),
        Arc::clone(&metrics.http),
    ));
    let served = lifecycle::serve_until(listener, app, counter, shutdown)
        .await
        .context("Service stopped with error");

    if let Some(handle) = periodic {
        lifecycle::join_logged("metrics_logging", handle).await;
    }

    // Log final metrics on shutdown
    metrics.log_full_summary();

    served
}
