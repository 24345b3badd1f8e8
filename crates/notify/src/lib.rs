//! Notification engine: rule matching, dedup, rate limiting,
//! transports and body formatting.

pub mod engine;
pub mod error;
pub mod formatter;
pub mod transport;

pub use engine::{NotificationEngine, NotifyConfig};
pub use error::TransportError;
pub use transport::{EmailTransport, ShellTransport, Transport, WebhookTransport};

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use crab_core::model::{CurrentState, Event, EventId, EventKind, JobRef, JobRegistration, NotificationRule, Severity, StatusDelta};
    use crab_store::{JobStore, SqlxJobStore};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    struct CountingTransport {
        calls: Arc<AtomicUsize>,
        fail_first_n: usize,
    }

    #[async_trait]
    impl Transport for CountingTransport {
        async fn dispatch(&self, _address: &str, _subject: &str, _body: &str) -> Result<(), error::TransportError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first_n {
                return Err(error::TransportError::ShellExitStatus(1));
            }
            Ok(())
        }
    }

    async fn setup() -> (Arc<dyn JobStore>, JobRef) {
        let store = SqlxJobStore::connect("sqlite::memory:").await.unwrap();
        let job_ref = store.ensure_job("host1", Some("nightly-backup"), "backup.sh").await.unwrap();
        store
            .set_notifications(vec![NotificationRule {
                id: 0,
                host: None,
                crabid: None,
                min_severity: Severity::Warn,
                transport: "counting".into(),
                address: vec!["ops".into()],
                skip_ok: true,
                include_output: false,
                cooldown_secs: Some(3600),
            }])
            .await
            .unwrap();
        (Arc::new(store), job_ref)
    }

    fn sample_delta(job_ref: JobRef, new_state: CurrentState, kind: EventKind) -> StatusDelta {
        StatusDelta {
            job_ref,
            old_state: CurrentState::Running,
            new_state,
            trigger_event: Event {
                id: EventId(1),
                job_ref,
                timestamp: Utc::now(),
                kind,
                status_code: Some(1),
                stdout: None,
                stderr: None,
            },
        }
    }

    fn sample_job(job_ref: JobRef) -> JobRegistration {
        JobRegistration {
            job_ref,
            host: "host1".into(),
            crabid: Some("nightly-backup".into()),
            command: "backup.sh".into(),
            first_seen: Utc::now(),
            last_seen: Utc::now(),
            schedule: None,
            timezone: None,
            grace_period_secs: None,
            timeout_secs: None,
            retired: false,
            inhibited: false,
        }
    }

    #[tokio::test]
    async fn dispatches_matching_rule_and_records_alert() {
        let (store, job_ref) = setup().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let mut transports: HashMap<String, Arc<dyn Transport>> = HashMap::new();
        transports.insert(
            "counting".into(),
            Arc::new(CountingTransport { calls: calls.clone(), fail_first_n: 0 }),
        );
        let engine = NotificationEngine::new(store.clone(), transports, NotifyConfig::default());

        let delta = sample_delta(job_ref, CurrentState::Fail, EventKind::Finish);
        engine.handle_delta(delta, sample_job(job_ref), vec![]).await;
        // dispatch runs on a spawned task; give it a tick to complete.
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let alert = store.last_alert(1, job_ref).await.unwrap();
        assert!(alert.is_some());
    }

    #[tokio::test]
    async fn skip_ok_suppresses_ok_deltas() {
        let (store, job_ref) = setup().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let mut transports: HashMap<String, Arc<dyn Transport>> = HashMap::new();
        transports.insert(
            "counting".into(),
            Arc::new(CountingTransport { calls: calls.clone(), fail_first_n: 0 }),
        );
        let engine = NotificationEngine::new(store, transports, NotifyConfig::default());

        let delta = sample_delta(job_ref, CurrentState::Ok, EventKind::Finish);
        engine.handle_delta(delta, sample_job(job_ref), vec![]).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dedup_suppresses_repeat_of_same_state_within_cooldown() {
        let (store, job_ref) = setup().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let mut transports: HashMap<String, Arc<dyn Transport>> = HashMap::new();
        transports.insert(
            "counting".into(),
            Arc::new(CountingTransport { calls: calls.clone(), fail_first_n: 0 }),
        );
        let engine = NotificationEngine::new(store, transports, NotifyConfig::default());

        let delta = sample_delta(job_ref, CurrentState::Fail, EventKind::Finish);
        engine.handle_delta(delta.clone(), sample_job(job_ref), vec![]).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.handle_delta(delta, sample_job(job_ref), vec![]).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn state_change_always_passes_dedup() {
        let (store, job_ref) = setup().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let mut transports: HashMap<String, Arc<dyn Transport>> = HashMap::new();
        transports.insert(
            "counting".into(),
            Arc::new(CountingTransport { calls: calls.clone(), fail_first_n: 0 }),
        );
        let engine = NotificationEngine::new(store, transports, NotifyConfig::default());

        engine
            .handle_delta(sample_delta(job_ref, CurrentState::Fail, EventKind::Finish), sample_job(job_ref), vec![])
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine
            .handle_delta(sample_delta(job_ref, CurrentState::Timeout, EventKind::Timeout), sample_job(job_ref), vec![])
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn retries_failed_dispatch_and_eventually_succeeds() {
        let (store, job_ref) = setup().await;
        let calls = Arc::new(AtomicUsize::new(0));
        let mut transports: HashMap<String, Arc<dyn Transport>> = HashMap::new();
        transports.insert(
            "counting".into(),
            Arc::new(CountingTransport { calls: calls.clone(), fail_first_n: 2 }),
        );
        let mut config = NotifyConfig::default();
        config.retry_base_delay = Duration::from_millis(5);
        let engine = NotificationEngine::new(store.clone(), transports, config);

        let delta = sample_delta(job_ref, CurrentState::Fail, EventKind::Finish);
        engine.handle_delta(delta, sample_job(job_ref), vec![]).await;
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let alert = store.last_alert(1, job_ref).await.unwrap().unwrap();
        assert!(matches!(alert.transport_result, crab_core::model::TransportResult::Success));
    }
}
