//! The durable data model: hosts, job registrations, events,
//! schedules, notification rules and alerts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Primary key of a `job` row. A distinct newtype (rather than a bare
/// `i64`) so call sites can't transpose a job id with an event id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobRef(pub i64);

impl fmt::Display for JobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Primary key of a `jobevent` row, monotonic within a job (invariant 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub i64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A job registration: `{ host, crabid?, command, first_seen, last_seen,
/// schedule?, timezone?, graceperiod?, timeout?, retired? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRegistration {
    pub job_ref: JobRef,
    pub host: String,
    pub crabid: Option<String>,
    pub command: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub schedule: Option<String>,
    pub timezone: Option<String>,
    pub grace_period_secs: Option<i64>,
    pub timeout_secs: Option<i64>,
    pub retired: bool,
    /// Admin-applied flag: the next `PUT .../start` for this job reports
    /// `{inhibit: true}`. Does not affect event logging.
    pub inhibited: bool,
}

impl JobRegistration {
    /// The business key used for re-registration/supersession matching
    /// (invariant 4): crabid when present, else the command text.
    pub fn business_key(&self) -> &str {
        self.crabid
            .as_deref()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.command)
    }
}

/// Event kinds appended to the log. Order here is declaration
/// order only; severity ordering is a separate concept (see [`Severity`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Start,
    Finish,
    Warn,
    #[serde(rename = "ALREADYRUNNING")]
    AlreadyRunning,
    Inhibited,
    Missed,
    Late,
    Timeout,
    #[serde(rename = "COULDNOTSTART")]
    CouldNotStart,
}

impl EventKind {
    /// `true` for kinds that close out a job's current run.
    pub fn is_terminal(self) -> bool {
        !matches!(self, EventKind::Start)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Start => "START",
            EventKind::Finish => "FINISH",
            EventKind::Warn => "WARN",
            EventKind::AlreadyRunning => "ALREADYRUNNING",
            EventKind::Inhibited => "INHIBITED",
            EventKind::Missed => "MISSED",
            EventKind::Late => "LATE",
            EventKind::Timeout => "TIMEOUT",
            EventKind::CouldNotStart => "COULDNOTSTART",
        }
    }
}

impl std::str::FromStr for EventKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "START" => Ok(EventKind::Start),
            "FINISH" => Ok(EventKind::Finish),
            "WARN" => Ok(EventKind::Warn),
            "ALREADYRUNNING" => Ok(EventKind::AlreadyRunning),
            "INHIBITED" => Ok(EventKind::Inhibited),
            "MISSED" => Ok(EventKind::Missed),
            "LATE" => Ok(EventKind::Late),
            "TIMEOUT" => Ok(EventKind::Timeout),
            "COULDNOTSTART" => Ok(EventKind::CouldNotStart),
            other => Err(format!("unknown event kind '{other}'")),
        }
    }
}

/// An append-only lifecycle record. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub job_ref: JobRef,
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub status_code: Option<i32>,
    pub stdout: Option<String>,
    pub stderr: Option<String>,
}

/// The derived current state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CurrentState {
    Unknown,
    Running,
    Ok,
    Fail,
    Warn,
    Missed,
    Late,
    Timeout,
}

/// Alert severity, ordered low to high:
/// `OK < WARN < LATE < MISSED < TIMEOUT < FAIL`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Ok,
    Warn,
    Late,
    Missed,
    Timeout,
    Fail,
}

impl Severity {
    /// Maps a derived [`CurrentState`] onto the severity scale.
    pub fn from_state(state: CurrentState) -> Self {
        match state {
            CurrentState::Unknown | CurrentState::Running | CurrentState::Ok => Severity::Ok,
            CurrentState::Warn => Severity::Warn,
            CurrentState::Late => Severity::Late,
            CurrentState::Missed => Severity::Missed,
            CurrentState::Timeout => Severity::Timeout,
            CurrentState::Fail => Severity::Fail,
        }
    }

    /// Maps an [`EventKind`] onto the severity scale, for the
    /// `max(new_state, event.kind)` rule used when folding events.
    pub fn from_kind(kind: EventKind) -> Self {
        match kind {
            EventKind::Start => Severity::Ok,
            EventKind::Finish => Severity::Ok,
            EventKind::Warn | EventKind::AlreadyRunning | EventKind::Inhibited => Severity::Warn,
            EventKind::Late => Severity::Late,
            EventKind::Missed => Severity::Missed,
            EventKind::Timeout => Severity::Timeout,
            EventKind::CouldNotStart => Severity::Fail,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Ok => "OK",
            Severity::Warn => "WARN",
            Severity::Late => "LATE",
            Severity::Missed => "MISSED",
            Severity::Timeout => "TIMEOUT",
            Severity::Fail => "FAIL",
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "OK" => Ok(Severity::Ok),
            "WARN" => Ok(Severity::Warn),
            "LATE" => Ok(Severity::Late),
            "MISSED" => Ok(Severity::Missed),
            "TIMEOUT" => Ok(Severity::Timeout),
            "FAIL" => Ok(Severity::Fail),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// A status-change delta emitted by the monitor's fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusDelta {
    pub job_ref: JobRef,
    pub old_state: CurrentState,
    pub new_state: CurrentState,
    pub trigger_event: Event,
}

/// A subscription rule matching status deltas to a dispatch target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationRule {
    pub id: i64,
    pub host: Option<String>,
    pub crabid: Option<String>,
    pub min_severity: Severity,
    pub transport: String,
    pub address: Vec<String>,
    pub skip_ok: bool,
    pub include_output: bool,
    /// Overrides `[notify] cooldown` when set.
    pub cooldown_secs: Option<u64>,
}

impl NotificationRule {
    /// A rule fires for a delta when both its host and crabid filters
    /// match (an unset filter matches anything).
    pub fn matches_job(&self, job: &JobRegistration) -> bool {
        let host_ok = self.host.as_deref().map_or(true, |h| h == job.host);
        let crabid_ok = self
            .crabid
            .as_deref()
            .map_or(true, |c| job.crabid.as_deref() == Some(c));
        host_ok && crabid_ok
    }
}

/// Outcome of a dispatch attempt, recorded on the `Alert` row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TransportResult {
    Success,
    Failed { message: String, attempts: u32 },
    Pending,
}

/// `{ rule_ref, job_ref, event_ref, dispatched_at, transport_result }`
///. Invariant 3: every Alert references an extant Event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub rule_id: i64,
    pub job_ref: JobRef,
    pub event_id: EventId,
    pub dispatched_at: DateTime<Utc>,
    pub transport_result: TransportResult,
}
