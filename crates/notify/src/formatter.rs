//! Body formatting: a pure function of (delta, recent events,
//! configured timezone, include_output flag) — the engine itself is
//! format-agnostic.

use chrono_tz::Tz;
use crab_core::model::{Event, JobRegistration, StatusDelta};

pub fn format_alert(
    delta: &StatusDelta,
    job: &JobRegistration,
    recent_events: &[Event],
    timezone: Tz,
    include_output: bool,
) -> (String, String) {
    let label = job.crabid.as_deref().unwrap_or(&job.command);
    let subject = format!("[crab] {} on {} is now {:?}", label, job.host, delta.new_state);

    let mut body = String::new();
    body.push_str(&format!("job: {}\n", job.command));
    body.push_str(&format!("host: {}\n", job.host));
    if let Some(crabid) = &job.crabid {
        body.push_str(&format!("crabid: {crabid}\n"));
    }
    body.push_str(&format!("state: {:?} -> {:?}\n", delta.old_state, delta.new_state));
    body.push_str(&format!(
        "event: {} at {}\n",
        delta.trigger_event.kind.as_str(),
        delta.trigger_event.timestamp.with_timezone(&timezone)
    ));
    if let Some(code) = delta.trigger_event.status_code {
        body.push_str(&format!("exit status: {code}\n"));
    }
    if include_output {
        if let Some(stdout) = &delta.trigger_event.stdout {
            if !stdout.is_empty() {
                body.push_str(&format!("--- stdout ---\n{stdout}\n"));
            }
        }
        if let Some(stderr) = &delta.trigger_event.stderr {
            if !stderr.is_empty() {
                body.push_str(&format!("--- stderr ---\n{stderr}\n"));
            }
        }
    }
    body.push_str(&format!("recent events in window: {}\n", recent_events.len()));

    (subject, body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crab_core::model::{CurrentState, EventId, EventKind, JobRef};

    fn sample_job() -> JobRegistration {
        JobRegistration {
            job_ref: JobRef(1),
            host: "db1".into(),
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

    #[test]
    fn body_includes_output_only_when_requested() {
        let job = sample_job();
        let delta = StatusDelta {
            job_ref: job.job_ref,
            old_state: CurrentState::Running,
            new_state: CurrentState::Fail,
            trigger_event: Event {
                id: EventId(2),
                job_ref: job.job_ref,
                timestamp: Utc::now(),
                kind: EventKind::Finish,
                status_code: Some(1),
                stdout: Some("ok so far".into()),
                stderr: Some("boom".into()),
            },
        };

        let (subject, body) = format_alert(&delta, &job, &[], chrono_tz::UTC, false);
        assert!(subject.contains("nightly-backup"));
        assert!(!body.contains("boom"));

        let (_, body) = format_alert(&delta, &job, &[], chrono_tz::UTC, true);
        assert!(body.contains("boom"));
        assert!(body.contains("exit status: 1"));
    }
}
