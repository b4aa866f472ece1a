//! Process lifecycle: wait for a termination signal, stop accepting
//! connections, then close the counter.

use crate::counter::WindowedCounter;
use crate::error::RequestCounterResult;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::SignalKind;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Resolves on the first of SIGTERM, SIGINT, SIGHUP or SIGQUIT.
#[cfg(unix)]
#[instrument]
pub async fn wait_for_signal() -> std::io::Result<()> {
    let mut terminate = signal::unix::signal(SignalKind::terminate())?;
    let mut hangup = signal::unix::signal(SignalKind::hangup())?;
    let mut quit = signal::unix::signal(SignalKind::quit())?;
    tokio::select! {
        _ = terminate.recv() => info!(signal = "SIGTERM", "Initiating graceful shutdown"),
        _ = hangup.recv() => info!(signal = "SIGHUP", "Initiating graceful shutdown"),
        _ = quit.recv() => info!(signal = "SIGQUIT", "Initiating graceful shutdown"),
        _ = signal::ctrl_c() => info!(signal = "SIGINT", "Initiating graceful shutdown"),
    }

    Ok(())
}

#[cfg(not(unix))]
pub async fn wait_for_signal() -> std::io::Result<()> {
    signal::ctrl_c().await
}

/// Cancel `shutdown` once a termination signal arrives.
pub fn cancel_on_signal(shutdown: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown.cancelled() => {}
            result = wait_for_signal() => {
                if let Err(e) = result {
                    error!(operation = "signal_wait", error = %e, "cannot install signal handlers");
                }
                shutdown.cancel();
            }
        }
    })
}

/// Await a helper task, logging a panic or abort instead of returning it.
/// Returns whether the task ran to completion.
pub async fn join_logged(operation: &'static str, handle: JoinHandle<()>) -> bool {
    match handle.await {
        Ok(()) => true,
        Err(e) => {
            error!(operation, error = %e, "task failed");
            false
        }
    }
}

/// Serve `app` on `listener` until `shutdown` is cancelled, then close the
/// counter. The listener stops accepting before the counter is closed, so
/// only requests already in flight can observe the closed state.
pub async fn serve_until(
    listener: TcpListener,
    app: Router,
    counter: Arc<WindowedCounter>,
    shutdown: CancellationToken,
) -> RequestCounterResult<()> {
    let addr = listener.local_addr()?;
    info!(operation = "serve", addr = %addr, "listening");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .await;
    if let Err(ref e) = served {
        error!(operation = "serve", error = %e, "server stopped with error");
    }
    // The server may also stop on its own; background users of the token
    // must still be released.
    shutdown.cancel();
    info!(operation = "serve", "listener closed, closing counter");

    let closed = counter.close().await;
    if let Err(ref e) = closed {
        error!(operation = "counter_close", error = %e);
    }

    served?;
    closed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_logged_reports_outcome() {
        assert!(join_logged("ok", tokio::spawn(async {})).await);

        let panicked = tokio::spawn(async { panic!("boom") });
        assert!(!join_logged("panics", panicked).await);

        let pending = tokio::spawn(std::future::pending::<()>());
        pending.abort();
        assert!(!join_logged("aborted", pending).await);
    }

    #[tokio::test]
    async fn test_signal_task_ends_on_cancel() {
        let shutdown = CancellationToken::new();
        let handle = cancel_on_signal(shutdown.clone());
        shutdown.cancel();
        assert!(join_logged("signal_wait", handle).await);
    }
}
