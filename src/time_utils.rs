use crate::lookup::{ModelName, Run};
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimeError {
    #[error("Invalid DOY key: {0} (expected YYYYDDD)")]
    InvalidDoyKey(String),

    #[error("DOY {doy} out of range for year {year}")]
    DoyOutOfRange { year: i32, doy: u32 },

    #[error("DOY range is reversed: {start} > {stop}")]
    ReversedRange { start: DoyDate, stop: DoyDate },

    #[error("Unsupported time units: {0}")]
    UnsupportedUnits(String),

    #[error("Time offset of {0} ms is out of range")]
    OffsetOutOfRange(f64),
}

/// Check if a year is a leap year
pub fn is_leap_year(year: i32) -> bool {
    (year % 4 == 0 && year % 100 != 0) || (year % 400 == 0)
}

pub fn days_in_year(year: i32) -> u32 {
    if is_leap_year(year) {
        366
    } else {
        365
    }
}

/// Calculate the number of days in a given month
pub fn days_in_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            if is_leap_year(year) {
                29
            } else {
                28
            }
        }
        _ => 0,
    }
}

/// A calendar day addressed by year and day of year.
///
/// Written and parsed in the compact `YYYYDDD` form, so DOY 126 of 2016 is
/// `2016126`. Ordering is chronological.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DoyDate {
    pub year: i32,
    pub doy: u32,
}

impl DoyDate {
    pub fn new(year: i32, doy: u32) -> Result<Self, TimeError> {
        if doy == 0 || doy > days_in_year(year) {
            return Err(TimeError::DoyOutOfRange { year, doy });
        }
        Ok(Self { year, doy })
    }

    /// Parse the integer key form, e.g. `2016126`.
    pub fn from_key(key: i64) -> Result<Self, TimeError> {
        key.to_string().parse()
    }

    pub fn key(&self) -> i64 {
        self.year as i64 * 1000 + self.doy as i64
    }

    pub fn from_date(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            doy: date.ordinal(),
        }
    }

    pub fn to_date(&self) -> NaiveDate {
        // DoyDate is only constructed through validated paths
        NaiveDate::from_yo_opt(self.year, self.doy).unwrap_or(NaiveDate::MIN)
    }

    pub fn midnight(&self) -> NaiveDateTime {
        self.to_date().and_time(NaiveTime::MIN)
    }

    pub fn pred(&self) -> Self {
        if self.doy == 1 {
            Self {
                year: self.year - 1,
                doy: days_in_year(self.year - 1),
            }
        } else {
            Self {
                year: self.year,
                doy: self.doy - 1,
            }
        }
    }

    pub fn succ(&self) -> Self {
        if self.doy == days_in_year(self.year) {
            Self {
                year: self.year + 1,
                doy: 1,
            }
        } else {
            Self {
                year: self.year,
                doy: self.doy + 1,
            }
        }
    }

    /// Zero padded three digit DOY, as used for the model day directories.
    pub fn doy_string(&self) -> String {
        format!("{:03}", self.doy)
    }
}

impl fmt::Display for DoyDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}{:03}", self.year, self.doy)
    }
}

impl FromStr for DoyDate {
    type Err = TimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() < 5 || s.len() > 7 || !s.chars().all(|c| c.is_ascii_digit()) {
            return Err(TimeError::InvalidDoyKey(s.to_string()));
        }
        let year: i32 = s[..4]
            .parse()
            .map_err(|_| TimeError::InvalidDoyKey(s.to_string()))?;
        let doy: u32 = s[4..]
            .parse()
            .map_err(|_| TimeError::InvalidDoyKey(s.to_string()))?;
        Self::new(year, doy)
    }
}

/// A model day, displayed as `ukv2016126`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DayKey {
    pub model: ModelName,
    pub date: DoyDate,
}

impl DayKey {
    pub fn new(model: ModelName, date: DoyDate) -> Self {
        Self { model, date }
    }
}

impl fmt::Display for DayKey {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}{}", self.model, self.date)
    }
}

/// Every day from `start` to `stop` inclusive, grouped by year.
pub fn doy_range(
    start: DoyDate,
    stop: DoyDate,
) -> Result<BTreeMap<i32, Vec<DoyDate>>, TimeError> {
    if start > stop {
        return Err(TimeError::ReversedRange { start, stop });
    }

    let mut by_year: BTreeMap<i32, Vec<DoyDate>> = BTreeMap::new();
    let mut day = start;
    loop {
        by_year.entry(day.year).or_default().push(day);
        if day == stop {
            break;
        }
        day = day.succ();
    }
    Ok(by_year)
}

/// Convert an observation day range into the range of model files to read.
///
/// The 21Z run for day N covers day N+1 after spin-up is discarded, so the
/// start moves back a day. The stop always moves back a day.
pub fn model_doy_range(start: DoyDate, stop: DoyDate, run: Run) -> (DoyDate, DoyDate) {
    let start_mod = match run {
        Run::Z21 => start.pred(),
        Run::Z06 => start,
    };
    (start_mod, stop.pred())
}

/// `start` moved by `millis` milliseconds.
///
/// Non-finite offsets and results past the calendar limits are errors.
pub fn offset_millis(start: NaiveDateTime, millis: f64) -> Result<NaiveDateTime, TimeError> {
    let out_of_range = || TimeError::OffsetOutOfRange(millis);
    if !millis.is_finite() {
        return Err(out_of_range());
    }
    Duration::try_milliseconds(millis.round() as i64)
        .and_then(|offset| start.checked_add_signed(offset))
        .ok_or_else(out_of_range)
}

/// Convert raw offsets with CF style units (`hours since 2016-05-05 00:00:00`)
/// into datetimes. Offsets are truncated to whole seconds.
pub fn parse_time_units(units: &str, values: &[f64]) -> Result<Vec<NaiveDateTime>, TimeError> {
    let unsupported = || TimeError::UnsupportedUnits(units.to_string());

    let mut parts = units.trim().splitn(3, ' ');
    let unit = parts.next().ok_or_else(unsupported)?;
    if parts.next() != Some("since") {
        return Err(unsupported());
    }
    let reference = parts.next().ok_or_else(unsupported)?;

    let seconds_per_unit = match unit {
        "seconds" | "second" | "s" => 1.0,
        "minutes" | "minute" => 60.0,
        "hours" | "hour" | "h" => 3600.0,
        _ => return Err(unsupported()),
    };

    let start = parse_reference_time(reference).ok_or_else(unsupported)?;

    values
        .iter()
        .map(|v| offset_millis(start, (v * seconds_per_unit).trunc() * 1000.0))
        .collect()
}

fn parse_reference_time(reference: &str) -> Option<NaiveDateTime> {
    let reference = reference.trim().trim_end_matches("UTC").trim_end_matches('Z').trim();
    const FORMATS: [&str; 3] = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];
    for format in FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(reference, format) {
            return Some(dt);
        }
    }
    // only the date part is used when no time is given
    let date_part = reference.split([' ', 'T']).next()?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .map(|d| d.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_doy_key() {
        let d: DoyDate = "2016126".parse().unwrap();
        assert_eq!(d, DoyDate { year: 2016, doy: 126 });
        assert_eq!(d.to_string(), "2016126");
        assert_eq!(DoyDate::from_key(2016001).unwrap().doy_string(), "001");
    }

    #[test]
    fn test_parse_doy_key_rejects_bad_days() {
        assert!("2016000".parse::<DoyDate>().is_err());
        assert!("2015366".parse::<DoyDate>().is_err());
        assert!("2016366".parse::<DoyDate>().is_ok());
        assert!("20a6100".parse::<DoyDate>().is_err());
    }

    #[test]
    fn test_pred_crosses_year() {
        let d = DoyDate::new(2017, 1).unwrap();
        assert_eq!(d.pred(), DoyDate::new(2016, 366).unwrap());
        let d = DoyDate::new(2016, 1).unwrap();
        assert_eq!(d.pred(), DoyDate::new(2015, 365).unwrap());
    }

    #[test]
    fn test_to_date() {
        let d = DoyDate::new(2016, 126).unwrap();
        assert_eq!(d.to_date(), NaiveDate::from_ymd_opt(2016, 5, 5).unwrap());
    }

    #[test]
    fn test_day_key_display() {
        let key = DayKey::new(ModelName::Ukv, DoyDate::new(2016, 5).unwrap());
        assert_eq!(key.to_string(), "ukv2016005");
    }

    #[test]
    fn test_doy_range_crosses_leap_year() {
        let start = DoyDate::new(2016, 365).unwrap();
        let stop = DoyDate::new(2017, 2).unwrap();
        let range = doy_range(start, stop).unwrap();
        assert_eq!(range[&2016].len(), 2);
        assert_eq!(range[&2016][1].doy, 366);
        assert_eq!(range[&2017].len(), 2);
        assert!(doy_range(stop, start).is_err());
    }

    #[test]
    fn test_model_doy_range() {
        let start = DoyDate::new(2017, 1).unwrap();
        let stop = DoyDate::new(2017, 10).unwrap();
        let (s, e) = model_doy_range(start, stop, Run::Z21);
        assert_eq!(s, DoyDate::new(2016, 366).unwrap());
        assert_eq!(e, DoyDate::new(2017, 9).unwrap());
        let (s, _) = model_doy_range(start, stop, Run::Z06);
        assert_eq!(s, start);
    }

    #[test]
    fn test_parse_time_units() {
        let times = parse_time_units("hours since 2016-05-04 00:00:00", &[21.0, 22.5]).unwrap();
        assert_eq!(times[0].to_string(), "2016-05-04 21:00:00");
        assert_eq!(times[1].to_string(), "2016-05-04 22:30:00");
        let times = parse_time_units("seconds since 1970-01-01", &[3600.0]).unwrap();
        assert_eq!(times[0].to_string(), "1970-01-01 01:00:00");
        assert!(parse_time_units("days since 2016-05-04", &[1.0]).is_err());
        assert!(parse_time_units("hours after 2016-05-04", &[1.0]).is_err());
    }

    #[test]
    fn test_huge_offsets_are_errors() {
        assert!(matches!(
            parse_time_units("hours since 2016-05-04 00:00:00", &[0.0, 1e30]),
            Err(TimeError::OffsetOutOfRange(_))
        ));
        assert!(parse_time_units("hours since 2016-05-04 00:00:00", &[f64::NAN]).is_err());

        let start = DoyDate::new(2016, 125).unwrap().midnight();
        assert!(offset_millis(start, 9.9e36 * 3_600_000.0).is_err());
        assert!(offset_millis(start, f64::INFINITY).is_err());
        // fits in i64 milliseconds but not in the calendar
        assert!(offset_millis(start, 9.0e18).is_err());
        assert_eq!(offset_millis(start, 90_000.0).unwrap().to_string(), "2016-05-04 00:01:30");
    }
}
