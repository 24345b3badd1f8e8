//! Schedule evaluator: a pure, stateless function from a
//! five-field cron expression + timezone + time window to the sorted
//! set of expected fire instants in that window, generalized from a
//! single "next occurrence after" query into full range enumeration,
//! and split out as an I/O-free module with upfront validation so
//! malformed schedules are refused before a job ever reaches the
//! liveness monitor.

use std::ops::Range;

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::error::ScheduleError;

const FIELD_NAMES: [&str; 5] = ["minute", "hour", "day-of-month", "month", "day-of-week"];
const FIELD_MAX: [u32; 5] = [59, 23, 31, 12, 6];

/// Parse an IANA timezone name, defaulting to UTC for empty/invalid
/// input.
pub fn parse_tz(tz: &str) -> chrono_tz::Tz {
    tz.parse::<chrono_tz::Tz>().unwrap_or(chrono_tz::UTC)
}

/// Validate a 5-field cron spec, refusing anything the matcher below
/// would silently treat as "never matches" with a schedule-kind error
/// instead.
pub fn validate(spec: &str) -> Result<(), ScheduleError> {
    let fields: Vec<&str> = spec.split_whitespace().collect();
    if fields.len() != 5 {
        return Err(ScheduleError::WrongFieldCount(fields.len()));
    }
    for (i, field) in fields.iter().enumerate() {
        validate_field(field, FIELD_MAX[i], FIELD_NAMES[i])?;
    }
    Ok(())
}

fn validate_field(field: &str, max: u32, name: &'static str) -> Result<(), ScheduleError> {
    if field == "*" {
        return Ok(());
    }
    let err = |reason: String| ScheduleError::InvalidField {
        field: field.to_string(),
        position: name,
        reason,
    };
    for part in field.split(',') {
        let (range_part, step) = match part.split_once('/') {
            Some((range_part, step_s)) => {
                let step: u32 = step_s
                    .parse()
                    .map_err(|_| err(format!("'{part}' is not a valid step")))?;
                if step == 0 {
                    return Err(err("step must be greater than zero".into()));
                }
                (range_part, Some(step))
            }
            None => (part, None),
        };

        if range_part == "*" {
            continue;
        }
        if let Some((start_s, end_s)) = range_part.split_once('-') {
            let start: u32 = start_s
                .parse()
                .map_err(|_| err(format!("'{part}' has a non-numeric range start")))?;
            let end: u32 = end_s
                .parse()
                .map_err(|_| err(format!("'{part}' has a non-numeric range end")))?;
            if start > end || end > max {
                return Err(err(format!("'{part}' is out of range for {name} (0-{max})")));
            }
        } else if step.is_some() {
            return Err(err(format!("'{part}' has a step but no range or '*' base")));
        } else {
            let n: u32 = range_part
                .parse()
                .map_err(|_| err(format!("'{part}' is not numeric")))?;
            if n > max {
                return Err(err(format!("{n} is out of range for {name} (0-{max})")));
            }
        }
    }
    Ok(())
}

/// Matches a single comma-separated component: `*`, `N`, `N-M`, `*/n`
/// or `N-M/n` (a step confined to a range, `*/n` being the `0-max/n`
/// special case).
fn part_matches(part: &str, value: u32, max: u32) -> bool {
    let (range_part, step) = match part.split_once('/') {
        Some((range_part, step_s)) => match step_s.parse::<u32>() {
            Ok(n) if n > 0 => (range_part, Some(n)),
            _ => return false,
        },
        None => (part, None),
    };

    let (start, end) = if range_part == "*" {
        (0, max)
    } else if let Some((start_s, end_s)) = range_part.split_once('-') {
        match (start_s.parse::<u32>(), end_s.parse::<u32>()) {
            (Ok(start), Ok(end)) => (start, end),
            _ => return false,
        }
    } else {
        match range_part.parse::<u32>() {
            Ok(n) => return step.is_none() && value == n,
            Err(_) => return false,
        }
    };

    if value < start || value > end {
        return false;
    }
    match step {
        Some(n) => (value - start) % n == 0,
        None => true,
    }
}

fn field_matches(field: &str, value: u32) -> bool {
    if field == "*" {
        return true;
    }
    field.split(',').any(|part| part_matches(part, value, u32::MAX))
}

fn matches_naive(fields: &[&str; 5], dt: &chrono::NaiveDateTime) -> bool {
    field_matches(fields[0], dt.minute())
        && field_matches(fields[1], dt.hour())
        && field_matches(fields[2], dt.day())
        && field_matches(fields[3], dt.month())
        && field_matches(fields[4], dt.weekday().num_days_from_sunday())
}

/// Compute the next fire strictly after `after`, in `tz`.
///
/// DST policy: a local time that doesn't exist (spring
/// forward) is skipped; an ambiguous local time (fall back) fires once,
/// at its first (pre-transition) occurrence.
fn next_fire(fields: &[&str; 5], after: &DateTime<Utc>, tz: chrono_tz::Tz) -> Option<DateTime<Utc>> {
    let local_after = after.with_timezone(&tz).naive_local();
    let mut candidate = (local_after + chrono::Duration::seconds(60 - local_after.second() as i64))
        .with_second(0)
        .unwrap_or(local_after);

    let max_checks = 4 * 366 * 24 * 60; // four years of minutes, generously bounds leap-year/DST search
    for _ in 0..max_checks {
        if matches_naive(fields, &candidate) {
            match tz.from_local_datetime(&candidate) {
                chrono::LocalResult::Single(dt) => return Some(dt.with_timezone(&Utc)),
                chrono::LocalResult::Ambiguous(earliest, _) => {
                    return Some(earliest.with_timezone(&Utc))
                }
                chrono::LocalResult::None => {} // DST gap: this local minute never happens
            }
        }
        candidate += chrono::Duration::minutes(1);
    }
    None
}

/// Enumerate every expected fire instant of `spec` (in timezone `tz`)
/// within the half-open window `[window.start, window.end)`.
///
/// Deterministic given `(spec, tz)` ("round-trip/idempotence");
/// the union of `expected_fires` over two adjacent windows equals
/// `expected_fires` over their combined window because each candidate
/// minute is independently re-derived from `after`, not carried as
/// mutable state between calls.
pub fn expected_fires(
    spec: &str,
    tz: chrono_tz::Tz,
    window: Range<DateTime<Utc>>,
) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
    validate(spec)?;
    let fields: Vec<&str> = spec.split_whitespace().collect();
    let fields: [&str; 5] = [fields[0], fields[1], fields[2], fields[3], fields[4]];

    if window.start >= window.end {
        return Ok(Vec::new());
    }

    let mut fires = Vec::new();
    let mut cursor = window.start - chrono::Duration::minutes(1);
    while let Some(next) = next_fire(&fields, &cursor, tz) {
        if next >= window.end {
            break;
        }
        fires.push(next);
        cursor = next;
    }
    Ok(fires)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn dt(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn every_five_minutes_in_an_hour() {
        let fires = expected_fires(
            "*/5 * * * *",
            chrono_tz::UTC,
            dt(2024, 6, 15, 10, 0)..dt(2024, 6, 15, 11, 0),
        )
        .unwrap();
        assert_eq!(fires.len(), 12);
        assert_eq!(fires[0], dt(2024, 6, 15, 10, 0));
        assert_eq!(fires[11], dt(2024, 6, 15, 10, 55));
    }

    #[test]
    fn determinism() {
        let window = dt(2024, 1, 1, 0, 0)..dt(2024, 1, 2, 0, 0);
        let a = expected_fires("30 9 * * *", chrono_tz::UTC, window.clone()).unwrap();
        let b = expected_fires("30 9 * * *", chrono_tz::UTC, window).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn adjacent_windows_union_equals_combined_window() {
        let spec = "*/15 * * * *";
        let split = dt(2024, 3, 1, 12, 0);
        let start = dt(2024, 3, 1, 0, 0);
        let end = dt(2024, 3, 2, 0, 0);

        let first = expected_fires(spec, chrono_tz::UTC, start..split).unwrap();
        let second = expected_fires(spec, chrono_tz::UTC, split..end).unwrap();
        let combined = expected_fires(spec, chrono_tz::UTC, start..end).unwrap();

        let mut union: Vec<_> = first.into_iter().chain(second).collect();
        union.sort();
        assert_eq!(union, combined);
    }

    #[test]
    fn rejects_wrong_field_count() {
        let err = expected_fires("* * * *", chrono_tz::UTC, dt(2024, 1, 1, 0, 0)..dt(2024, 1, 2, 0, 0));
        assert!(matches!(err, Err(ScheduleError::WrongFieldCount(4))));
    }

    #[test]
    fn rejects_out_of_range_field() {
        let err = validate("0 25 * * *");
        assert!(err.is_err());
    }

    #[test]
    fn dst_spring_forward_gap_produces_no_fire() {
        // US/Eastern, 2024-03-10: 02:00-03:00 local doesn't exist.
        let tz = parse_tz("America/New_York");
        let fires = expected_fires(
            "30 2 * * *",
            tz,
            dt(2024, 3, 10, 0, 0)..dt(2024, 3, 11, 0, 0),
        )
        .unwrap();
        assert!(fires.is_empty(), "the skipped local hour must not fire");
    }

    #[test]
    fn dst_fall_back_fires_once() {
        // US/Eastern, 2024-11-03: 01:00-02:00 local happens twice.
        let tz = parse_tz("America/New_York");
        let fires = expected_fires(
            "30 1 * * *",
            tz,
            dt(2024, 11, 3, 0, 0)..dt(2024, 11, 4, 0, 0),
        )
        .unwrap();
        assert_eq!(fires.len(), 1, "ambiguous local time fires exactly once");
    }

    #[test]
    fn step_combines_with_base_at_minute_zero() {
        let fires = expected_fires(
            "*/5 * * * *",
            chrono_tz::UTC,
            dt(2024, 6, 15, 10, 1)..dt(2024, 6, 15, 10, 10),
        )
        .unwrap();
        assert_eq!(fires, vec![dt(2024, 6, 15, 10, 5)]);
    }

    #[test]
    fn parse_tz_invalid_falls_back_to_utc() {
        assert_eq!(parse_tz("Not/Real"), chrono_tz::UTC);
    }

    #[test]
    fn range_with_step_matches_every_nth_minute_inside_range() {
        let fires = expected_fires(
            "0-30/5 * * * *",
            chrono_tz::UTC,
            dt(2024, 6, 15, 10, 0)..dt(2024, 6, 15, 11, 0),
        )
        .unwrap();
        assert_eq!(
            fires,
            vec![
                dt(2024, 6, 15, 10, 0),
                dt(2024, 6, 15, 10, 5),
                dt(2024, 6, 15, 10, 10),
                dt(2024, 6, 15, 10, 15),
                dt(2024, 6, 15, 10, 20),
                dt(2024, 6, 15, 10, 25),
                dt(2024, 6, 15, 10, 30),
            ]
        );
    }

    #[test]
    fn range_with_step_rejects_out_of_range_bound() {
        assert!(validate("0-70/5 * * * *").is_err());
    }

    #[test]
    fn step_without_range_or_star_base_is_rejected() {
        assert!(validate("5/5 * * * *").is_err());
    }
}
