//! The Store: transactional persistence over the relational
//! schema in `migrations/0001_init.sql`. Exposed as an `async_trait` so
//! callers depend on `Arc<dyn JobStore>`, not a concrete SQL backend —
//! a capability-set pattern, injected as `Arc<dyn Trait>` fields.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crab_core::model::{
    Alert, Event, EventId, EventKind, JobRef, JobRegistration, NotificationRule, Severity,
    TransportResult,
};

use crate::error::StoreError;
use crate::output_store::OutputStore;

/// Payload carried by a lifecycle event: exit status plus captured
/// stdout/stderr as a byte string.
#[derive(Debug, Clone, Default)]
pub struct EventPayload {
    pub status_code: Option<i32>,
    pub stdout: Option<Vec<u8>>,
    pub stderr: Option<Vec<u8>>,
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn ensure_job(
        &self,
        host: &str,
        crabid: Option<&str>,
        command: &str,
    ) -> Result<JobRef, StoreError>;

    async fn append_event(
        &self,
        job_ref: JobRef,
        kind: EventKind,
        ts: DateTime<Utc>,
        payload: Option<EventPayload>,
    ) -> Result<EventId, StoreError>;

    /// Append a synthetic MISSED/TIMEOUT event, idempotent on
    /// `(job_ref, kind, dedupe_key)`. Returns `None` when the key
    /// already existed.
    async fn append_synthetic_event(
        &self,
        job_ref: JobRef,
        kind: EventKind,
        ts: DateTime<Utc>,
        dedupe_key: &str,
    ) -> Result<Option<EventId>, StoreError>;

    async fn log_start(&self, job_ref: JobRef, ts: DateTime<Utc>) -> Result<EventId, StoreError> {
        self.append_event(job_ref, EventKind::Start, ts, None).await
    }

    async fn log_finish(
        &self,
        job_ref: JobRef,
        ts: DateTime<Utc>,
        status_code: i32,
        stdout: Option<Vec<u8>>,
        stderr: Option<Vec<u8>>,
    ) -> Result<EventId, StoreError> {
        self.append_event(
            job_ref,
            EventKind::Finish,
            ts,
            Some(EventPayload {
                status_code: Some(status_code),
                stdout,
                stderr,
            }),
        )
        .await
    }

    async fn log_warning(
        &self,
        job_ref: JobRef,
        ts: DateTime<Utc>,
        message: &str,
    ) -> Result<EventId, StoreError> {
        self.append_event(
            job_ref,
            EventKind::Warn,
            ts,
            Some(EventPayload {
                status_code: None,
                stdout: None,
                stderr: Some(message.as_bytes().to_vec()),
            }),
        )
        .await
    }

    async fn get_jobs(&self, include_retired: bool) -> Result<Vec<JobRegistration>, StoreError>;

    async fn get_job(&self, job_ref: JobRef) -> Result<JobRegistration, StoreError>;

    async fn get_events(
        &self,
        job_ref: JobRef,
        since: Option<EventId>,
        limit: Option<i64>,
    ) -> Result<Vec<Event>, StoreError>;

    async fn set_schedule(
        &self,
        job_ref: JobRef,
        spec: &str,
        timezone: Option<&str>,
        grace_period_secs: Option<i64>,
        timeout_secs: Option<i64>,
    ) -> Result<(), StoreError>;

    async fn retire_job(&self, job_ref: JobRef) -> Result<(), StoreError>;

    async fn set_inhibit(&self, job_ref: JobRef, inhibit: bool) -> Result<(), StoreError>;

    async fn get_notifications(&self) -> Result<Vec<NotificationRule>, StoreError>;

    /// Full, transactional replace of the notification rule set.
    async fn set_notifications(&self, rules: Vec<NotificationRule>) -> Result<(), StoreError>;

    async fn record_alert(
        &self,
        rule_id: i64,
        job_ref: JobRef,
        event_id: EventId,
        dispatched_at: DateTime<Utc>,
        result: TransportResult,
    ) -> Result<i64, StoreError>;

    async fn last_alert(&self, rule_id: i64, job_ref: JobRef) -> Result<Option<Alert>, StoreError>;

    /// Delete events older than `retention_days`, skipping any job with
    /// a pending (not yet dispatched) alert referencing it.
    async fn purge_events_older_than(&self, retention_days: i64) -> Result<u64, StoreError>;
}

pub struct SqlxJobStore {
    pool: SqlitePool,
    output_store: Option<Arc<dyn OutputStore>>,
}

impl SqlxJobStore {
    pub async fn connect(dsn: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(dsn).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self {
            pool,
            output_store: None,
        })
    }

    pub fn with_output_store(mut self, store: Arc<dyn OutputStore>) -> Self {
        self.output_store = Some(store);
        self
    }

    async fn row_to_event(&self, row: &sqlx::sqlite::SqliteRow) -> Result<Event, StoreError> {
        let kind_str: String = row.get("kind");
        let kind = EventKind::from_str(&kind_str).map_err(StoreError::Conflict)?;
        let ts_str: String = row.get("ts");
        let timestamp = DateTime::parse_from_rfc3339(&ts_str)
            .map_err(|e| StoreError::Conflict(e.to_string()))?
            .with_timezone(&Utc);

        let output_ref: Option<String> = row.get("output_ref");
        let (stdout, stderr) = if let Some(output_ref) = output_ref {
            let store = self
                .output_store
                .as_ref()
                .ok_or(StoreError::OutputStoreUnavailable)?;
            let bytes = store.get(&output_ref).await?;
            let combined: (Option<Vec<u8>>, Option<Vec<u8>>) =
                serde_json::from_slice(&bytes).map_err(|e| StoreError::Conflict(e.to_string()))?;
            (
                combined.0.map(|b| decode_lossy(&b)),
                combined.1.map(|b| decode_lossy(&b)),
            )
        } else {
            let stdout: Option<Vec<u8>> = row.get("stdout");
            let stderr: Option<Vec<u8>> = row.get("stderr");
            (stdout.map(|b| decode_lossy(&b)), stderr.map(|b| decode_lossy(&b)))
        };

        Ok(Event {
            id: EventId(row.get::<i64, _>("id")),
            job_ref: JobRef(row.get::<i64, _>("job_id")),
            timestamp,
            kind,
            status_code: row.get::<Option<i32>, _>("status_code"),
            stdout,
            stderr,
        })
    }

    async fn row_to_job(&self, row: &sqlx::sqlite::SqliteRow) -> Result<JobRegistration, StoreError> {
        let first_seen: String = row.get("first_seen");
        let last_seen: String = row.get("last_seen");
        Ok(JobRegistration {
            job_ref: JobRef(row.get::<i64, _>("id")),
            host: row.get("host"),
            crabid: row.get("crabid"),
            command: row.get("command"),
            first_seen: DateTime::parse_from_rfc3339(&first_seen)
                .map_err(|e| StoreError::Conflict(e.to_string()))?
                .with_timezone(&Utc),
            last_seen: DateTime::parse_from_rfc3339(&last_seen)
                .map_err(|e| StoreError::Conflict(e.to_string()))?
                .with_timezone(&Utc),
            schedule: row.get("schedule"),
            timezone: row.get("timezone"),
            grace_period_secs: row.get::<Option<i64>, _>("grace_period_secs"),
            timeout_secs: row.get::<Option<i64>, _>("timeout_secs"),
            retired: row.get::<i64, _>("retired") != 0,
            inhibited: row.get::<i64, _>("inhibited") != 0,
        })
    }
}

/// Decode an 8-bit-superset-of-ASCII byte string with a lossy
/// replacement policy that never fails.
fn decode_lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

#[async_trait]
impl JobStore for SqlxJobStore {
    async fn ensure_job(
        &self,
        host: &str,
        crabid: Option<&str>,
        command: &str,
    ) -> Result<JobRef, StoreError> {
        let crabid = crabid.filter(|s| !s.is_empty());
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let existing: Option<(i64, String)> = if let Some(cid) = crabid {
            sqlx::query("SELECT id, command FROM job WHERE host = ? AND crabid = ? AND retired = 0")
                .bind(host)
                .bind(cid)
                .fetch_optional(&mut *tx)
                .await?
                .map(|r| (r.get::<i64, _>("id"), r.get::<String, _>("command")))
        } else {
            sqlx::query(
                "SELECT id, command FROM job WHERE host = ? AND command = ? AND crabid IS NULL AND retired = 0",
            )
            .bind(host)
            .bind(command)
            .fetch_optional(&mut *tx)
            .await?
            .map(|r| (r.get::<i64, _>("id"), r.get::<String, _>("command")))
        };

        let job_id = match existing {
            Some((id, stored_command)) if stored_command == command => {
                sqlx::query("UPDATE job SET last_seen = ? WHERE id = ?")
                    .bind(&now)
                    .bind(id)
                    .execute(&mut *tx)
                    .await?;
                id
            }
            Some((old_id, _)) => {
                // Supersession: same crabid, new command text retires
                // the old registration and inserts a fresh one
                // carrying the new command.
                let rec = sqlx::query(
                    "INSERT INTO job (host, crabid, command, first_seen, last_seen) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(host)
                .bind(crabid)
                .bind(command)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                let new_id = rec.last_insert_rowid();
                sqlx::query("UPDATE job SET retired = 1, superseded_by = ? WHERE id = ?")
                    .bind(new_id)
                    .bind(old_id)
                    .execute(&mut *tx)
                    .await?;
                new_id
            }
            None => {
                let rec = sqlx::query(
                    "INSERT INTO job (host, crabid, command, first_seen, last_seen) VALUES (?, ?, ?, ?, ?)",
                )
                .bind(host)
                .bind(crabid)
                .bind(command)
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                rec.last_insert_rowid()
            }
        };

        sqlx::query("INSERT OR IGNORE INTO jobconfig (job_id) VALUES (?)")
            .bind(job_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(JobRef(job_id))
    }

    async fn append_event(
        &self,
        job_ref: JobRef,
        kind: EventKind,
        ts: DateTime<Utc>,
        payload: Option<EventPayload>,
    ) -> Result<EventId, StoreError> {
        let payload = payload.unwrap_or_default();
        let ts_str = ts.to_rfc3339();

        let (stdout_col, stderr_col, output_ref) = match (&self.output_store, &payload) {
            (Some(store), p) if p.stdout.is_some() || p.stderr.is_some() => {
                let combined = serde_json::to_vec(&(p.stdout.clone(), p.stderr.clone()))
                    .map_err(|e| StoreError::Conflict(e.to_string()))?;
                let output_ref = store.put(&combined).await?;
                (None, None, Some(output_ref))
            }
            _ => (payload.stdout.clone(), payload.stderr.clone(), None),
        };

        let mut tx = self.pool.begin().await?;
        let rec = sqlx::query(
            "INSERT INTO jobevent (job_id, ts, kind, status_code, stdout, stderr, output_ref) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job_ref.0)
        .bind(&ts_str)
        .bind(kind.as_str())
        .bind(payload.status_code)
        .bind(stdout_col)
        .bind(stderr_col)
        .bind(output_ref)
        .execute(&mut *tx)
        .await?;
        sqlx::query("UPDATE job SET last_seen = ? WHERE id = ?")
            .bind(&ts_str)
            .bind(job_ref.0)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(EventId(rec.last_insert_rowid()))
    }

    async fn append_synthetic_event(
        &self,
        job_ref: JobRef,
        kind: EventKind,
        ts: DateTime<Utc>,
        dedupe_key: &str,
    ) -> Result<Option<EventId>, StoreError> {
        let ts_str = ts.to_rfc3339();
        let result = sqlx::query(
            "INSERT INTO jobevent (job_id, ts, kind, dedupe_key) VALUES (?, ?, ?, ?)",
        )
        .bind(job_ref.0)
        .bind(&ts_str)
        .bind(kind.as_str())
        .bind(dedupe_key)
        .execute(&self.pool)
        .await;

        match result {
            Ok(rec) => Ok(Some(EventId(rec.last_insert_rowid()))),
            // UNIQUE constraint violation on (job_id, kind, dedupe_key):
            // this fire/START was already materialized — idempotent no-op.
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_jobs(&self, include_retired: bool) -> Result<Vec<JobRegistration>, StoreError> {
        let rows = if include_retired {
            sqlx::query("SELECT j.*, c.schedule, c.timezone, c.grace_period_secs, c.timeout_secs \
                         FROM job j LEFT JOIN jobconfig c ON c.job_id = j.id ORDER BY j.id")
                .fetch_all(&self.pool)
                .await?
        } else {
            sqlx::query("SELECT j.*, c.schedule, c.timezone, c.grace_period_secs, c.timeout_secs \
                         FROM job j LEFT JOIN jobconfig c ON c.job_id = j.id \
                         WHERE j.retired = 0 ORDER BY j.id")
                .fetch_all(&self.pool)
                .await?
        };
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.row_to_job(row).await?);
        }
        Ok(out)
    }

    async fn get_job(&self, job_ref: JobRef) -> Result<JobRegistration, StoreError> {
        let row = sqlx::query(
            "SELECT j.*, c.schedule, c.timezone, c.grace_period_secs, c.timeout_secs \
             FROM job j LEFT JOIN jobconfig c ON c.job_id = j.id WHERE j.id = ?",
        )
        .bind(job_ref.0)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(StoreError::NotFound)?;
        self.row_to_job(&row).await
    }

    async fn get_events(
        &self,
        job_ref: JobRef,
        since: Option<EventId>,
        limit: Option<i64>,
    ) -> Result<Vec<Event>, StoreError> {
        let since_id = since.map(|e| e.0).unwrap_or(0);
        let limit = limit.unwrap_or(1000).max(1);
        let rows = sqlx::query(
            "SELECT * FROM jobevent WHERE job_id = ? AND id > ? ORDER BY id ASC LIMIT ?",
        )
        .bind(job_ref.0)
        .bind(since_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.row_to_event(row).await?);
        }
        Ok(out)
    }

    async fn set_schedule(
        &self,
        job_ref: JobRef,
        spec: &str,
        timezone: Option<&str>,
        grace_period_secs: Option<i64>,
        timeout_secs: Option<i64>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO jobconfig (job_id, schedule, timezone, grace_period_secs, timeout_secs) \
             VALUES (?, ?, ?, ?, ?) \
             ON CONFLICT(job_id) DO UPDATE SET \
               schedule = excluded.schedule, timezone = excluded.timezone, \
               grace_period_secs = excluded.grace_period_secs, timeout_secs = excluded.timeout_secs",
        )
        .bind(job_ref.0)
        .bind(spec)
        .bind(timezone)
        .bind(grace_period_secs)
        .bind(timeout_secs)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn retire_job(&self, job_ref: JobRef) -> Result<(), StoreError> {
        sqlx::query("UPDATE job SET retired = 1 WHERE id = ?")
            .bind(job_ref.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_inhibit(&self, job_ref: JobRef, inhibit: bool) -> Result<(), StoreError> {
        sqlx::query("UPDATE job SET inhibited = ? WHERE id = ?")
            .bind(inhibit as i64)
            .bind(job_ref.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_notifications(&self) -> Result<Vec<NotificationRule>, StoreError> {
        let rows = sqlx::query("SELECT * FROM jobnotify ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let address: String = row.get("address");
                let address: Vec<String> =
                    serde_json::from_str(&address).map_err(|e| StoreError::Conflict(e.to_string()))?;
                let min_severity: String = row.get("min_severity");
                Ok(NotificationRule {
                    id: row.get::<i64, _>("id"),
                    host: row.get("host"),
                    crabid: row.get("crabid"),
                    min_severity: Severity::from_str(&min_severity)
                        .map_err(StoreError::Conflict)?,
                    transport: row.get("transport"),
                    address,
                    skip_ok: row.get::<i64, _>("skip_ok") != 0,
                    include_output: row.get::<i64, _>("include_output") != 0,
                    cooldown_secs: row.get::<Option<i64>, _>("cooldown_secs").map(|v| v as u64),
                })
            })
            .collect()
    }

    async fn set_notifications(&self, rules: Vec<NotificationRule>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM jobnotify").execute(&mut *tx).await?;
        for rule in &rules {
            let address = serde_json::to_string(&rule.address)
                .map_err(|e| StoreError::Conflict(e.to_string()))?;
            sqlx::query(
                "INSERT INTO jobnotify (host, crabid, min_severity, transport, address, skip_ok, include_output, cooldown_secs) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&rule.host)
            .bind(&rule.crabid)
            .bind(rule.min_severity.as_str())
            .bind(&rule.transport)
            .bind(address)
            .bind(rule.skip_ok as i64)
            .bind(rule.include_output as i64)
            .bind(rule.cooldown_secs.map(|v| v as i64))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_alert(
        &self,
        rule_id: i64,
        job_ref: JobRef,
        event_id: EventId,
        dispatched_at: DateTime<Utc>,
        result: TransportResult,
    ) -> Result<i64, StoreError> {
        let (status, message, attempts) = match &result {
            TransportResult::Success => ("success", None, 0),
            TransportResult::Failed { message, attempts } => ("failed", Some(message.clone()), *attempts as i64),
            TransportResult::Pending => ("pending", None, 0),
        };
        let rec = sqlx::query(
            "INSERT INTO jobalert (rule_id, job_id, event_id, dispatched_at, status, message, attempts) \
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(rule_id)
        .bind(job_ref.0)
        .bind(event_id.0)
        .bind(dispatched_at.to_rfc3339())
        .bind(status)
        .bind(message)
        .bind(attempts)
        .execute(&self.pool)
        .await?;
        Ok(rec.last_insert_rowid())
    }

    async fn last_alert(&self, rule_id: i64, job_ref: JobRef) -> Result<Option<Alert>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM jobalert WHERE rule_id = ? AND job_id = ? ORDER BY dispatched_at DESC LIMIT 1",
        )
        .bind(rule_id)
        .bind(job_ref.0)
        .fetch_optional(&self.pool)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let status: String = row.get("status");
        let transport_result = match status.as_str() {
            "success" => TransportResult::Success,
            "pending" => TransportResult::Pending,
            _ => TransportResult::Failed {
                message: row.get::<Option<String>, _>("message").unwrap_or_default(),
                attempts: row.get::<i64, _>("attempts") as u32,
            },
        };
        let dispatched_at: String = row.get("dispatched_at");
        Ok(Some(Alert {
            id: row.get::<i64, _>("id"),
            rule_id: row.get::<i64, _>("rule_id"),
            job_ref: JobRef(row.get::<i64, _>("job_id")),
            event_id: EventId(row.get::<i64, _>("event_id")),
            dispatched_at: DateTime::parse_from_rfc3339(&dispatched_at)
                .map_err(|e| StoreError::Conflict(e.to_string()))?
                .with_timezone(&Utc),
            transport_result,
        }))
    }

    async fn purge_events_older_than(&self, retention_days: i64) -> Result<u64, StoreError> {
        let cutoff = (Utc::now() - chrono::Duration::days(retention_days)).to_rfc3339();
        let rec = sqlx::query(
            "DELETE FROM jobevent WHERE ts < ? AND id NOT IN \
             (SELECT event_id FROM jobalert WHERE status = 'pending')",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(rec.rows_affected())
    }
}
