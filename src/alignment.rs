//! Time axis checks for forecast runs.
//!
//! Runs are 37 hours long and restart every 24 hours, so each file is cut to
//! a window after its spin-up hours to avoid repeated times between days.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use std::collections::BTreeSet;
use std::ops::Range;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AlignmentError {
    #[error("Time {0} is more than 1.5 minutes from the hour")]
    OffHour(NaiveDateTime),

    #[error("Previously unseen start time {first} for run date {date}")]
    UnseenStart {
        first: NaiveDateTime,
        date: NaiveDate,
    },

    #[error("Jump in hours: {from} to {to}")]
    HourJump {
        from: NaiveDateTime,
        to: NaiveDateTime,
    },

    #[error("The two time lists do not start with the same time: {a} vs {b}")]
    DifferentStarts { a: NaiveDateTime, b: NaiveDateTime },

    #[error("Both time lists have items that the other one doesn't")]
    BothSidesDiffer,

    #[error("Empty time list")]
    Empty,
}

fn on_the_hour(t: &NaiveDateTime) -> bool {
    t.minute() == 0 && t.second() == 0 && t.nanosecond() == 0
}

/// Snap times onto the hour when the run does not start on one.
///
/// Minutes of 30 or more round up. Any time further than 1.5 minutes from
/// the hour it rounds to is rejected.
pub fn round_run_times(times: &[NaiveDateTime]) -> Result<Vec<NaiveDateTime>, AlignmentError> {
    let first = times.first().ok_or(AlignmentError::Empty)?;
    if on_the_hour(first) {
        return Ok(times.to_vec());
    }

    let tolerance = Duration::seconds(90);
    times
        .iter()
        .map(|t| {
            let hour = t.date().and_time(NaiveTime::MIN) + Duration::hours(t.hour() as i64);
            let rounded = hour + Duration::hours((t.minute() / 30) as i64);
            let diff = *t - rounded;
            if diff < tolerance && diff > -tolerance {
                Ok(rounded)
            } else {
                Err(AlignmentError::OffHour(*t))
            }
        })
        .collect()
}

/// Number of leading spin-up hours to skip for a run dated `file_date`.
pub fn spin_up_offset(first: NaiveDateTime, file_date: NaiveDate) -> Result<usize, AlignmentError> {
    let at = |date: NaiveDate, hour: u32| {
        date.and_hms_opt(hour, 0, 0)
            .ok_or(AlignmentError::UnseenStart { first, date })
    };

    if first == at(file_date, 21)? {
        Ok(3)
    } else if first == at(file_date, 22)? {
        Ok(2)
    } else if Some(first) == file_date.succ_opt().and_then(|d| d.and_hms_opt(0, 0, 0)) {
        Ok(0)
    } else {
        Err(AlignmentError::UnseenStart {
            first,
            date: file_date,
        })
    }
}

/// Index range of the times kept from a run: up to `hours_before_repeat`
/// steps starting at `offset`, clamped to `len`.
pub fn window(len: usize, offset: usize, hours_before_repeat: usize) -> Range<usize> {
    let start = offset.min(len);
    start..(offset + hours_before_repeat).min(len)
}

/// Every step must be exactly one hour.
pub fn check_consecutive(times: &[NaiveDateTime]) -> Result<(), AlignmentError> {
    for pair in times.windows(2) {
        if pair[1] - pair[0] != Duration::hours(1) {
            return Err(AlignmentError::HourJump {
                from: pair[0],
                to: pair[1],
            });
        }
    }
    Ok(())
}

/// Length both time lists are cut to so their values line up.
///
/// The lists must start together. When they differ in length only one of
/// them may hold times missing from the other; both are cut just before the
/// first such time.
pub fn reconcile_pair(a: &[NaiveDateTime], b: &[NaiveDateTime]) -> Result<usize, AlignmentError> {
    let (first_a, first_b) = match (a.first(), b.first()) {
        (Some(x), Some(y)) => (*x, *y),
        _ => return Err(AlignmentError::Empty),
    };
    if first_a != first_b {
        return Err(AlignmentError::DifferentStarts {
            a: first_a,
            b: first_b,
        });
    }
    if a.len() == b.len() {
        return Ok(a.len());
    }

    let only_in = |x: &[NaiveDateTime], y: &[NaiveDateTime]| x.iter().position(|t| !y.contains(t));
    match (only_in(a, b), only_in(b, a)) {
        (Some(_), Some(_)) => Err(AlignmentError::BothSidesDiffer),
        (Some(i), None) | (None, Some(i)) => Ok(i),
        (None, None) => Ok(a.len().min(b.len())),
    }
}

/// Times that appear more than once across all days.
pub fn find_duplicate_times<'a, I>(days: I) -> Vec<NaiveDateTime>
where
    I: IntoIterator<Item = &'a [NaiveDateTime]>,
{
    let mut seen = BTreeSet::new();
    let mut repeats = BTreeSet::new();
    for t in days.into_iter().flatten() {
        if !seen.insert(*t) {
            repeats.insert(*t);
        }
    }
    repeats.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2016, 5, day)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    fn hourly(start: NaiveDateTime, n: i64) -> Vec<NaiveDateTime> {
        (0..n).map(|i| start + Duration::hours(i)).collect()
    }

    #[test]
    fn test_round_run_times() {
        let times = vec![t(4, 20, 59, 30), t(4, 22, 0, 45), t(4, 22, 59, 10)];
        let rounded = round_run_times(&times).unwrap();
        assert_eq!(rounded, vec![t(4, 21, 0, 0), t(4, 22, 0, 0), t(4, 23, 0, 0)]);

        let on_hour = vec![t(4, 21, 0, 0), t(4, 22, 10, 0)];
        assert_eq!(round_run_times(&on_hour).unwrap(), on_hour);

        let bad = vec![t(4, 20, 59, 30), t(4, 22, 5, 0)];
        assert_eq!(
            round_run_times(&bad),
            Err(AlignmentError::OffHour(t(4, 22, 5, 0)))
        );
    }

    #[test]
    fn test_spin_up_offset() {
        let date = NaiveDate::from_ymd_opt(2016, 5, 4).unwrap();
        assert_eq!(spin_up_offset(t(4, 21, 0, 0), date), Ok(3));
        assert_eq!(spin_up_offset(t(4, 22, 0, 0), date), Ok(2));
        assert_eq!(spin_up_offset(t(5, 0, 0, 0), date), Ok(0));
        assert!(matches!(
            spin_up_offset(t(4, 6, 0, 0), date),
            Err(AlignmentError::UnseenStart { .. })
        ));
    }

    #[test]
    fn test_window() {
        assert_eq!(window(37, 3, 24), 3..27);
        assert_eq!(window(20, 3, 24), 3..20);
        assert_eq!(window(2, 3, 24), 2..2);
    }

    #[test]
    fn test_check_consecutive() {
        let times = hourly(t(5, 0, 0, 0), 24);
        assert!(check_consecutive(&times).is_ok());
        let mut gap = times.clone();
        gap.remove(5);
        assert_eq!(
            check_consecutive(&gap),
            Err(AlignmentError::HourJump {
                from: t(5, 4, 0, 0),
                to: t(5, 6, 0, 0)
            })
        );
    }

    #[test]
    fn test_reconcile_pair() {
        let a = hourly(t(5, 0, 0, 0), 24);
        let b = hourly(t(5, 0, 0, 0), 20);
        assert_eq!(reconcile_pair(&a, &a), Ok(24));
        assert_eq!(reconcile_pair(&a, &b), Ok(20));
        assert_eq!(reconcile_pair(&b, &a), Ok(20));

        let late = hourly(t(5, 1, 0, 0), 24);
        assert!(matches!(
            reconcile_pair(&a, &late),
            Err(AlignmentError::DifferentStarts { .. })
        ));

        let mut c = hourly(t(5, 0, 0, 0), 10);
        c.push(t(6, 12, 0, 0));
        let d = hourly(t(5, 0, 0, 0), 12);
        assert_eq!(reconcile_pair(&c, &d), Err(AlignmentError::BothSidesDiffer));
    }

    #[test]
    fn test_find_duplicate_times() {
        let day1 = hourly(t(5, 0, 0, 0), 24);
        let day2 = hourly(t(5, 23, 0, 0), 3);
        let dupes = find_duplicate_times([day1.as_slice(), day2.as_slice()]);
        assert_eq!(dupes, vec![t(5, 23, 0, 0)]);
        assert!(find_duplicate_times([day1.as_slice()]).is_empty());
    }
}
