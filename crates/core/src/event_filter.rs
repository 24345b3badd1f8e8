//! Event filter: reduces a job's ordered event stream to a
//! derived current state plus a handful of pointers useful to callers
//! (last start/finish, streaks) without those ever being stored as
//! authoritative state (invariant 2).

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};

use crate::model::{CurrentState, Event, EventKind};

/// The reduction of an event stream, recomputed at read time.
#[derive(Debug, Clone)]
pub struct JobStatus {
    pub last_start: Option<Event>,
    pub last_finish: Option<Event>,
    pub last_nonok_finish: Option<Event>,
    pub current_state: CurrentState,
    /// Length of the trailing run of same-kind terminal events, keyed by
    /// that kind (e.g. `{FINISH: 3}` after three straight failing
    /// finishes) — context for the notification formatter, not part of
    /// the original severity/dedup rules.
    pub streak_counts: HashMap<EventKind, u32>,
}

/// Derive a job's current status from its ordered event stream.
///
/// `events` must be ascending by id (Store contract). `timeout` is the
/// job's configured timeout, if any; `now` is injected rather than read
/// from the clock so the function stays pure and testable.
pub fn derive(events: &[Event], timeout: Option<Duration>, now: DateTime<Utc>) -> JobStatus {
    let last_start = events.iter().rev().find(|e| e.kind == EventKind::Start).cloned();
    let last_finish = events
        .iter()
        .rev()
        .find(|e| e.kind == EventKind::Finish)
        .cloned();
    let last_nonok_finish = events
        .iter()
        .rev()
        .find(|e| e.kind == EventKind::Finish && e.status_code != Some(0))
        .cloned();

    let current_state = match events.last() {
        None => CurrentState::Unknown,
        Some(last) => match last.kind {
            EventKind::Start => {
                let age = now.signed_duration_since(last.timestamp);
                match timeout {
                    Some(t) if age > t => CurrentState::Timeout,
                    _ => CurrentState::Running,
                }
            }
            EventKind::Finish => {
                if last.status_code.unwrap_or(0) == 0 {
                    CurrentState::Ok
                } else {
                    CurrentState::Fail
                }
            }
            EventKind::Warn | EventKind::AlreadyRunning | EventKind::Inhibited => {
                CurrentState::Warn
            }
            EventKind::Missed => CurrentState::Missed,
            EventKind::Late => CurrentState::Late,
            EventKind::Timeout => CurrentState::Timeout,
            EventKind::CouldNotStart => CurrentState::Fail,
        },
    };

    let streak_counts = trailing_streak(events);

    JobStatus {
        last_start,
        last_finish,
        last_nonok_finish,
        current_state,
        streak_counts,
    }
}

/// Count the trailing run of consecutive terminal events sharing the
/// most recent terminal kind, skipping over interleaved START events
/// (which are not terminal and don't break a streak of their FINISH
/// counterparts).
fn trailing_streak(events: &[Event]) -> HashMap<EventKind, u32> {
    let mut map = HashMap::new();
    let mut terminals = events.iter().rev().filter(|e| e.kind.is_terminal());
    let Some(first) = terminals.next() else {
        return map;
    };

    // For FINISH, a "streak" means consecutive finishes with the same
    // ok/fail classification, not merely the same EventKind (every
    // completed run is a FINISH regardless of outcome).
    let mut count = 1u32;
    if first.kind == EventKind::Finish {
        let ok = first.status_code.unwrap_or(0) == 0;
        for e in terminals {
            if e.kind != EventKind::Finish {
                break;
            }
            if (e.status_code.unwrap_or(0) == 0) != ok {
                break;
            }
            count += 1;
        }
    } else {
        for e in terminals {
            if e.kind != first.kind {
                break;
            }
            count += 1;
        }
    }
    map.insert(first.kind, count);
    map
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EventId, JobRef};
    use chrono::TimeZone;

    fn ev(id: i64, kind: EventKind, ts_min: i64, status: Option<i32>) -> Event {
        Event {
            id: EventId(id),
            job_ref: JobRef(1),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(ts_min),
            kind,
            status_code: status,
            stdout: None,
            stderr: None,
        }
    }

    fn now_at(min: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(min)
    }

    #[test]
    fn no_events_is_unknown() {
        let status = derive(&[], None, now_at(0));
        assert_eq!(status.current_state, CurrentState::Unknown);
    }

    #[test]
    fn running_start_without_finish() {
        let events = vec![ev(1, EventKind::Start, 0, None)];
        let status = derive(&events, Some(Duration::minutes(10)), now_at(5));
        assert_eq!(status.current_state, CurrentState::Running);
    }

    #[test]
    fn start_older_than_timeout_is_timeout() {
        let events = vec![ev(1, EventKind::Start, 0, None)];
        let status = derive(&events, Some(Duration::minutes(10)), now_at(20));
        assert_eq!(status.current_state, CurrentState::Timeout);
    }

    #[test]
    fn finish_zero_is_ok() {
        let events = vec![ev(1, EventKind::Start, 0, None), ev(2, EventKind::Finish, 1, Some(0))];
        let status = derive(&events, None, now_at(2));
        assert_eq!(status.current_state, CurrentState::Ok);
    }

    #[test]
    fn finish_nonzero_is_fail() {
        let events = vec![ev(1, EventKind::Start, 0, None), ev(2, EventKind::Finish, 1, Some(1))];
        let status = derive(&events, None, now_at(2));
        assert_eq!(status.current_state, CurrentState::Fail);
        assert!(status.last_nonok_finish.is_some());
    }

    #[test]
    fn already_running_and_inhibited_are_warn_not_fail() {
        let events = vec![ev(1, EventKind::AlreadyRunning, 0, None)];
        assert_eq!(derive(&events, None, now_at(1)).current_state, CurrentState::Warn);
        let events = vec![ev(1, EventKind::Inhibited, 0, None)];
        assert_eq!(derive(&events, None, now_at(1)).current_state, CurrentState::Warn);
    }

    #[test]
    fn streak_counts_consecutive_failures() {
        let events = vec![
            ev(1, EventKind::Start, 0, None),
            ev(2, EventKind::Finish, 1, Some(1)),
            ev(3, EventKind::Start, 2, None),
            ev(4, EventKind::Finish, 3, Some(1)),
            ev(5, EventKind::Start, 4, None),
            ev(6, EventKind::Finish, 5, Some(1)),
        ];
        let status = derive(&events, None, now_at(6));
        assert_eq!(status.streak_counts.get(&EventKind::Finish), Some(&3));
    }

    #[test]
    fn streak_broken_by_success() {
        let events = vec![
            ev(1, EventKind::Finish, 0, Some(1)),
            ev(2, EventKind::Finish, 1, Some(0)),
            ev(3, EventKind::Finish, 2, Some(0)),
        ];
        let status = derive(&events, None, now_at(3));
        assert_eq!(status.streak_counts.get(&EventKind::Finish), Some(&2));
    }

    #[test]
    fn last_start_and_finish_are_tracked() {
        let events = vec![
            ev(1, EventKind::Start, 0, None),
            ev(2, EventKind::Finish, 1, Some(0)),
            ev(3, EventKind::Start, 2, None),
        ];
        let status = derive(&events, Some(Duration::minutes(100)), now_at(3));
        assert_eq!(status.last_start.unwrap().id, EventId(3));
        assert_eq!(status.last_finish.unwrap().id, EventId(2));
    }
}
