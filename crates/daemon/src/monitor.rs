//! Liveness monitor: the long-lived task that compares
//! expected fire instants to observed events, materializes MISSED/
//! TIMEOUT events idempotently, and fans out status-change deltas.
//!
//! Paired with a low-priority retention sweep (removes events older
//! than `retention_days`) riding the same tick, since both are
//! periodic background chores over the same Store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crab_core::event_filter::derive;
use crab_core::model::{CurrentState, JobRef, StatusDelta};
use crab_core::schedule::{expected_fires, parse_tz};
use crab_store::JobStore;

use crate::state::StatusCache;

/// Bounded fan-out of status deltas to the notification engine.
pub const FANOUT_CAPACITY: usize = 1024;

pub struct Monitor {
    store: Arc<dyn JobStore>,
    cache: Arc<StatusCache>,
    tick_period: Duration,
    lookback: chrono::Duration,
    retention_days: Option<i64>,
    tx: broadcast::Sender<StatusDelta>,
}

impl Monitor {
    pub fn new(
        store: Arc<dyn JobStore>,
        cache: Arc<StatusCache>,
        tick_period: Duration,
        lookback_secs: i64,
        retention_days: Option<i64>,
    ) -> (Self, broadcast::Receiver<StatusDelta>) {
        let (tx, rx) = broadcast::channel(FANOUT_CAPACITY);
        (
            Self {
                store,
                cache,
                tick_period,
                lookback: chrono::Duration::seconds(lookback_secs),
                retention_days,
                tx,
            },
            rx,
        )
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusDelta> {
        self.tx.subscribe()
    }

    /// Run until `cancel` fires. The in-flight tick always runs to
    /// completion once started before exiting.
    pub async fn run(self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.tick_period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut tick_count: u64 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancel.cancelled() => break,
            }
            tick_count += 1;
            if let Err(e) = self.tick_once().await {
                warn!(error = %e, "monitor tick failed, continuing on next tick");
            }
            // Retention is a low-priority chore riding the same cadence;
            // every 10th tick keeps it from dominating I/O on busy stores.
            if tick_count % 10 == 0 {
                self.retention_sweep().await;
            }
        }
        info!("monitor stopped");
    }

    async fn retention_sweep(&self) {
        let Some(days) = self.retention_days else {
            return;
        };
        match self.store.purge_events_older_than(days).await {
            Ok(0) => {}
            Ok(n) => info!(purged = n, retention_days = days, "retention sweep purged old events"),
            Err(e) => warn!(error = %e, "retention sweep failed"),
        }
    }

    async fn tick_once(&self) -> Result<(), crab_store::StoreError> {
        let now = Utc::now();
        let jobs = self.store.get_jobs(false).await?;

        for job in jobs {
            let Some(spec) = job.schedule.as_deref() else {
                continue;
            };
            let tz = parse_tz(job.timezone.as_deref().unwrap_or("UTC"));
            let grace = chrono::Duration::seconds(job.grace_period_secs.unwrap_or(0));
            let timeout = job
                .timeout_secs
                .map(chrono::Duration::seconds);

            let fires = match expected_fires(spec, tz, (now - self.lookback)..now) {
                Ok(fires) => fires,
                Err(e) => {
                    debug!(job = %job.job_ref, error = %e, "job has a misconfigured schedule, excluding from liveness");
                    continue;
                }
            };

            let events = self.store.get_events(job.job_ref, None, Some(2000)).await?;

            for fire in fires {
                let window_end = fire + grace;
                let started = events
                    .iter()
                    .any(|e| e.kind == crab_core::model::EventKind::Start && e.timestamp >= fire && e.timestamp <= window_end);
                if started {
                    continue;
                }
                if now > window_end {
                    let dedupe_key = fire.to_rfc3339();
                    match self
                        .store
                        .append_synthetic_event(job.job_ref, crab_core::model::EventKind::Missed, now, &dedupe_key)
                        .await
                    {
                        Ok(Some(_)) => info!(job = %job.job_ref, fire = %fire, "job missed its scheduled fire"),
                        Ok(None) => {} // already materialized for this fire
                        Err(e) => warn!(job = %job.job_ref, error = %e, "could not record missed fire"),
                    }
                }
            }

            if let Some(timeout) = timeout {
                if let Some(start) = events.iter().rev().find(|e| e.kind == crab_core::model::EventKind::Start) {
                    let has_finish_after = events
                        .iter()
                        .any(|e| e.kind == crab_core::model::EventKind::Finish && e.timestamp > start.timestamp);
                    if !has_finish_after && now.signed_duration_since(start.timestamp) > timeout {
                        let dedupe_key = start.id.0.to_string();
                        match self
                            .store
                            .append_synthetic_event(job.job_ref, crab_core::model::EventKind::Timeout, now, &dedupe_key)
                            .await
                        {
                            Ok(Some(_)) => info!(job = %job.job_ref, start = %start.id, "job timed out"),
                            Ok(None) => {}
                            Err(e) => warn!(job = %job.job_ref, error = %e, "could not record timeout"),
                        }
                    }
                }
            }

            // Re-read: synthetic events just appended must participate
            // in the derived state below.
            let events = self.store.get_events(job.job_ref, None, Some(2000)).await?;
            let status = derive(&events, timeout, now);
            self.apply_state(job.job_ref, status.current_state, &events);
        }
        Ok(())
    }

    fn apply_state(&self, job_ref: JobRef, new_state: CurrentState, events: &[crab_core::model::Event]) {
        let old_state = self.cache.get(job_ref);
        if old_state == Some(new_state) {
            return;
        }
        self.cache.set(job_ref, new_state);
        let Some(trigger_event) = events.last().cloned() else {
            return;
        };
        let delta = StatusDelta {
            job_ref,
            old_state: old_state.unwrap_or(CurrentState::Unknown),
            new_state,
            trigger_event,
        };
        info!(job = %job_ref, old = ?delta.old_state, new = ?delta.new_state, "job status changed");
        // A full backlog here only drops this duplicate-adjacent send;
        // the notifier's own backlog handles true backpressure.
        if self.tx.send(delta).is_err() {
            debug!(job = %job_ref, "no active subscribers for status delta");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crab_store::SqlxJobStore;

    async fn store() -> Arc<dyn JobStore> {
        Arc::new(SqlxJobStore::connect("sqlite::memory:").await.unwrap())
    }

    #[tokio::test]
    async fn missed_fire_materializes_once() {
        let store = store().await;
        let job = store.ensure_job("hostA", Some("backup"), "/usr/bin/backup").await.unwrap();
        store.set_schedule(job, "*/5 * * * *", Some("UTC"), Some(60), None).await.unwrap();

        let cache = Arc::new(StatusCache::default());
        let (monitor, _rx) = Monitor::new(store.clone(), cache, Duration::from_secs(30), 3600, None);

        // First tick after the window closes should see a missed fire,
        // assuming "now" (real clock) is past some `*/5` boundary + grace.
        monitor.tick_once().await.unwrap();
        let events = store.get_events(job, None, None).await.unwrap();
        let missed_before = events.iter().filter(|e| e.kind == crab_core::model::EventKind::Missed).count();

        monitor.tick_once().await.unwrap();
        let events = store.get_events(job, None, None).await.unwrap();
        let missed_after = events.iter().filter(|e| e.kind == crab_core::model::EventKind::Missed).count();

        assert_eq!(missed_before, missed_after, "idempotent per fire instant");
    }

    #[tokio::test]
    async fn running_past_timeout_materializes_timeout_once() {
        let store = store().await;
        let job = store.ensure_job("hostA", Some("long"), "/usr/bin/long").await.unwrap();
        store.log_start(job, Utc::now() - chrono::Duration::seconds(120)).await.unwrap();
        store.set_schedule(job, "* * * * *", Some("UTC"), Some(0), Some(5)).await.unwrap();

        let cache = Arc::new(StatusCache::default());
        let (monitor, _rx) = Monitor::new(store.clone(), cache, Duration::from_secs(30), 3600, None);

        monitor.tick_once().await.unwrap();
        monitor.tick_once().await.unwrap();

        let events = store.get_events(job, None, None).await.unwrap();
        let timeouts = events.iter().filter(|e| e.kind == crab_core::model::EventKind::Timeout).count();
        assert_eq!(timeouts, 1);
    }

    #[tokio::test]
    async fn clean_run_emits_ok_delta() {
        let store = store().await;
        let job = store.ensure_job("hostA", Some("backup"), "/usr/bin/backup").await.unwrap();
        store.set_schedule(job, "* * * * *", Some("UTC"), Some(60), None).await.unwrap();
        store.log_start(job, Utc::now()).await.unwrap();
        store.log_finish(job, Utc::now(), 0, None, None).await.unwrap();

        let cache = Arc::new(StatusCache::default());
        let (monitor, mut rx) = Monitor::new(store.clone(), cache.clone(), Duration::from_secs(30), 3600, None);
        monitor.tick_once().await.unwrap();

        assert_eq!(cache.get(job), Some(CurrentState::Ok));
        let delta = rx.try_recv().unwrap();
        assert_eq!(delta.new_state, CurrentState::Ok);
    }
}
