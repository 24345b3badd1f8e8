//! The per-transport notification-dispatch task: consumes status
//! deltas off the monitor's fan-out and hands each to the notification
//! engine, plus a periodic backlog drain.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crab_core::model::StatusDelta;
use crab_notify::NotificationEngine;
use crab_store::JobStore;

/// Drives `engine.handle_delta` for every status delta the monitor
/// emits, and drains the engine's rate-limit backlog on its own cadence
/// so a burst of deltas doesn't starve queued alerts.
pub async fn run(
    mut rx: broadcast::Receiver<StatusDelta>,
    store: Arc<dyn JobStore>,
    engine: Arc<NotificationEngine>,
    cancel: CancellationToken,
) {
    let mut drain_interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            delta = rx.recv() => {
                match delta {
                    Ok(delta) => handle_one(&store, &engine, delta).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "notifier fell behind the status-delta fan-out");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = drain_interval.tick() => {
                engine.drain_backlog().await;
            }
            _ = cancel.cancelled() => break,
        }
    }
    // Flush the backlog up to a timeout on shutdown (default 30s),
    // then abandon remaining work.
    let _ = tokio::time::timeout(Duration::from_secs(30), engine.drain_backlog()).await;
}

async fn handle_one(store: &Arc<dyn JobStore>, engine: &Arc<NotificationEngine>, delta: StatusDelta) {
    let job = match store.get_job(delta.job_ref).await {
        Ok(job) => job,
        Err(e) => {
            warn!(job = %delta.job_ref, error = %e, "could not load job for status delta, dropping");
            return;
        }
    };
    let recent_events = store
        .get_events(delta.job_ref, None, Some(20))
        .await
        .unwrap_or_default();
    engine.handle_delta(delta, job, recent_events).await;
}
