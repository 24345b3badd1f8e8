//! Persistence layer: the relational Store plus the optional
//! output-store backend for large stdout/stderr blobs.

pub mod error;
pub mod job_store;
pub mod output_store;

pub use error::StoreError;
pub use job_store::{EventPayload, JobStore, SqlxJobStore};
pub use output_store::{connect as connect_output_store, OutputStore};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crab_core::model::{EventKind, NotificationRule, Severity, TransportResult};

    async fn store() -> SqlxJobStore {
        SqlxJobStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn ensure_job_is_idempotent_for_same_command() {
        let store = store().await;
        let a = store.ensure_job("host1", Some("backup"), "run.sh").await.unwrap();
        let b = store.ensure_job("host1", Some("backup"), "run.sh").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.get_jobs(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ensure_job_without_crabid_keys_on_command() {
        let store = store().await;
        let a = store.ensure_job("host1", None, "run.sh").await.unwrap();
        let b = store.ensure_job("host1", None, "run.sh").await.unwrap();
        let c = store.ensure_job("host1", None, "other.sh").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn ensure_job_supersedes_on_command_change() {
        let store = store().await;
        let old = store.ensure_job("host1", Some("backup"), "run.sh").await.unwrap();
        let new = store.ensure_job("host1", Some("backup"), "run2.sh").await.unwrap();
        assert_ne!(old, new);

        let jobs = store.get_jobs(true).await.unwrap();
        let old_row = jobs.iter().find(|j| j.job_ref == old).unwrap();
        let new_row = jobs.iter().find(|j| j.job_ref == new).unwrap();
        assert!(old_row.retired);
        assert!(!new_row.retired);
        assert_eq!(new_row.command, "run2.sh");

        // Subsequent registrations with the same crabid/command land on
        // the superseding row, not a third one.
        let again = store.ensure_job("host1", Some("backup"), "run2.sh").await.unwrap();
        assert_eq!(again, new);
        assert_eq!(store.get_jobs(true).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn append_event_assigns_monotonic_ids() {
        let store = store().await;
        let job = store.ensure_job("host1", None, "run.sh").await.unwrap();
        let e1 = store.log_start(job, Utc::now()).await.unwrap();
        let e2 = store.log_finish(job, Utc::now(), 0, None, None).await.unwrap();
        assert!(e2.0 > e1.0);

        let events = store.get_events(job, None, None).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].kind, EventKind::Start);
        assert_eq!(events[1].kind, EventKind::Finish);
        assert_eq!(events[1].status_code, Some(0));
    }

    #[tokio::test]
    async fn get_events_since_excludes_already_seen() {
        let store = store().await;
        let job = store.ensure_job("host1", None, "run.sh").await.unwrap();
        let e1 = store.log_start(job, Utc::now()).await.unwrap();
        store.log_finish(job, Utc::now(), 0, None, None).await.unwrap();

        let events = store.get_events(job, Some(e1), None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, EventKind::Finish);
    }

    #[tokio::test]
    async fn append_synthetic_event_is_idempotent() {
        let store = store().await;
        let job = store.ensure_job("host1", None, "run.sh").await.unwrap();
        let ts = Utc::now();
        let first = store
            .append_synthetic_event(job, EventKind::Missed, ts, "fire-2026-07-27T00:00:00Z")
            .await
            .unwrap();
        let second = store
            .append_synthetic_event(job, EventKind::Missed, ts, "fire-2026-07-27T00:00:00Z")
            .await
            .unwrap();
        assert!(first.is_some());
        assert!(second.is_none());
        assert_eq!(store.get_events(job, None, None).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_schedule_round_trips() {
        let store = store().await;
        let job = store.ensure_job("host1", None, "run.sh").await.unwrap();
        store
            .set_schedule(job, "0 * * * *", Some("UTC"), Some(300), Some(3600))
            .await
            .unwrap();
        let row = store.get_job(job).await.unwrap();
        assert_eq!(row.schedule.as_deref(), Some("0 * * * *"));
        assert_eq!(row.grace_period_secs, Some(300));

        // replace
        store
            .set_schedule(job, "*/5 * * * *", Some("UTC"), Some(60), None)
            .await
            .unwrap();
        let row = store.get_job(job).await.unwrap();
        assert_eq!(row.schedule.as_deref(), Some("*/5 * * * *"));
        assert_eq!(row.timeout_secs, None);
    }

    #[tokio::test]
    async fn retire_and_inhibit_toggle_flags() {
        let store = store().await;
        let job = store.ensure_job("host1", None, "run.sh").await.unwrap();
        store.set_inhibit(job, true).await.unwrap();
        assert!(store.get_job(job).await.unwrap().inhibited);
        store.retire_job(job).await.unwrap();
        let row = store.get_job(job).await.unwrap();
        assert!(row.retired);
        assert!(store.get_jobs(false).await.unwrap().is_empty());
        assert_eq!(store.get_jobs(true).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn notifications_replace_is_transactional() {
        let store = store().await;
        let rule = NotificationRule {
            id: 0,
            host: Some("host1".into()),
            crabid: None,
            min_severity: Severity::Fail,
            transport: "email".into(),
            address: vec!["ops@example.com".into()],
            skip_ok: true,
            include_output: false,
            cooldown_secs: Some(900),
        };
        store.set_notifications(vec![rule]).await.unwrap();
        let rules = store.get_notifications().await.unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].transport, "email");
        assert_eq!(rules[0].min_severity, Severity::Fail);

        store.set_notifications(vec![]).await.unwrap();
        assert!(store.get_notifications().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn record_and_fetch_last_alert() {
        let store = store().await;
        let job = store.ensure_job("host1", None, "run.sh").await.unwrap();
        let event = store.log_finish(job, Utc::now(), 1, None, None).await.unwrap();
        store
            .record_alert(1, job, event, Utc::now(), TransportResult::Success)
            .await
            .unwrap();
        let alert = store.last_alert(1, job).await.unwrap().unwrap();
        matches!(alert.transport_result, TransportResult::Success);

        store
            .record_alert(
                1,
                job,
                event,
                Utc::now(),
                TransportResult::Failed { message: "timeout".into(), attempts: 2 },
            )
            .await
            .unwrap();
        let alert = store.last_alert(1, job).await.unwrap().unwrap();
        match alert.transport_result {
            TransportResult::Failed { attempts, .. } => assert_eq!(attempts, 2),
            _ => panic!("expected latest alert to be the failed one"),
        }
    }

    #[tokio::test]
    async fn purge_skips_events_with_pending_alerts() {
        let store = store().await;
        let job = store.ensure_job("host1", None, "run.sh").await.unwrap();
        let old_ts = Utc::now() - chrono::Duration::days(40);
        let event = store.log_finish(job, old_ts, 1, None, None).await.unwrap();
        store
            .record_alert(1, job, event, old_ts, TransportResult::Pending)
            .await
            .unwrap();

        let purged = store.purge_events_older_than(30).await.unwrap();
        assert_eq!(purged, 0);
        assert_eq!(store.get_events(job, None, None).await.unwrap().len(), 1);
    }
}
