//! HTTP server lifecycle.
//!
//! Runs the event API until `shutdown` resolves, then drains: readiness
//! flips to draining, queued publishes are abandoned right away and the
//! in-flight ones get `grace` to settle. Handlers waiting on abandoned
//! publishes answer `503 shutting_down`, so their connections close within
//! the grace period and the HTTP drain can finish.

use std::future::Future;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use crate::api;
use crate::state::AppState;

/// Extra time the HTTP drain gets on top of the publish grace period.
const DRAIN_MARGIN: Duration = Duration::from_secs(1);

/// Serves the API on `listener` until `shutdown` resolves, then drains.
pub async fn serve<F>(
    listener: TcpListener,
    state: AppState,
    grace: Duration,
    shutdown: F,
) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = api::create_router(state.clone());
    let (signalled_tx, signalled_rx) = oneshot::channel::<()>();
    let (drained_tx, drained_rx) = oneshot::channel::<()>();

    let server = axum::serve(listener, app).with_graceful_shutdown({
        let state = state.clone();
        async move {
            shutdown.await;
            info!(grace_ms = grace.as_millis() as u64, "Shutdown signal received, draining");
            state.begin_shutdown();

            let relay = state.relay_handle();
            tokio::spawn(async move {
                relay.shutdown(grace).await;
                let _ = drained_tx.send(());
            });
            let _ = signalled_tx.send(());
        }
    });
    let mut server = tokio::spawn(async move { server.await });

    // Runs unbounded until the signal; the drain after it is bounded.
    tokio::select! {
        biased;
        result = &mut server => {
            state.begin_shutdown();
            state.relay().shutdown(grace).await;
            return flatten(result);
        }
        _ = signalled_rx => {}
    }

    let result = match tokio::time::timeout(grace + DRAIN_MARGIN, &mut server).await {
        Ok(result) => flatten(result),
        Err(_) => {
            warn!("HTTP server did not drain in time, closing remaining connections");
            server.abort();
            Ok(())
        }
    };

    if tokio::time::timeout(grace + DRAIN_MARGIN, drained_rx).await.is_err() {
        warn!("Publish pipeline did not shut down in time");
    }

    result
}

fn flatten(
    result: Result<std::io::Result<()>, tokio::task::JoinError>,
) -> std::io::Result<()> {
    match result {
        Ok(result) => result,
        Err(e) => {
            error!(error = %e, "Server task failed");
            Err(std::io::Error::other(e))
        }
    }
}
