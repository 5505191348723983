//! Hour-aligned UTC join keys, monthly periods and ISO-8601 instant parsing.

use std::fmt;

use chrono::{
    DateTime, Datelike, NaiveDate, NaiveDateTime, TimeDelta, TimeZone, Timelike, Utc,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const HOUR_SECONDS: i64 = 3_600;

const OFFSET_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
];

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeParseError {
    #[error("unrecognized datetime '{0}'")]
    Unrecognized(String),
    #[error("local time '{value}' does not exist in {tz}")]
    NonexistentLocalTime { value: String, tz: String },
    #[error("instant {0} is not aligned to an hour boundary")]
    NotHourAligned(DateTime<Utc>),
}

/// UTC instant truncated to an exact hour. Never carries minutes, seconds or
/// sub-second components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HourKey(DateTime<Utc>);

impl HourKey {
    /// Accepts `dt` only when it already sits on an hour boundary.
    pub fn try_from_utc(dt: DateTime<Utc>) -> Result<Self, TimeParseError> {
        if is_hour_aligned(&dt) {
            Ok(Self(dt))
        } else {
            Err(TimeParseError::NotHourAligned(dt))
        }
    }

    /// Truncates `dt` to the start of its hour.
    pub fn floor(dt: DateTime<Utc>) -> Self {
        let secs = dt.timestamp().div_euclid(HOUR_SECONDS) * HOUR_SECONDS;
        Self(DateTime::from_timestamp(secs, 0).expect("hour floor of a valid instant is valid"))
    }

    pub fn from_ymd_h(year: i32, month: u32, day: u32, hour: u32) -> Option<Self> {
        Utc.with_ymd_and_hms(year, month, day, hour, 0, 0)
            .single()
            .map(Self)
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn next_hour(&self) -> Option<Self> {
        self.0.checked_add_signed(TimeDelta::hours(1)).map(Self)
    }

    pub fn period(&self) -> Period {
        Period {
            year: self.0.year(),
            month: self.0.month(),
        }
    }

    /// RFC 3339 rendering with an explicit `+00:00` offset.
    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }
}

impl fmt::Display for HourKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

/// A calendar month; one remote price file covers one period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

pub fn is_hour_aligned(dt: &DateTime<Utc>) -> bool {
    dt.minute() == 0 && dt.second() == 0 && dt.nanosecond() == 0
}

/// Parses an ISO-8601 datetime into UTC.
///
/// Values carrying an offset (or a trailing `Z`) are converted directly.
/// Values without one are read as wall-clock time in `fallback_tz`; for
/// ambiguous wall-clock times (DST fall-back) the earlier instant is used.
/// A bare `YYYY-MM-DD` means local midnight.
pub fn parse_instant(raw: &str, fallback_tz: Tz) -> Result<DateTime<Utc>, TimeParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(TimeParseError::Unrecognized(raw.to_string()));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(dt.with_timezone(&Utc));
    }

    let normalized = match trimmed.strip_suffix('Z').or_else(|| trimmed.strip_suffix('z')) {
        Some(head) => format!("{head}+00:00"),
        None => trimmed.to_string(),
    };

    for format in OFFSET_FORMATS {
        if let Ok(dt) = DateTime::parse_from_str(&normalized, format) {
            return Ok(dt.with_timezone(&Utc));
        }
    }
    // Minute-precision values with an offset, e.g. 2022-11-01T00:00+01:00.
    if let Some(dt) = parse_minute_precision_with_offset(&normalized) {
        return Ok(dt);
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| TimeParseError::Unrecognized(raw.to_string()))?;

    fallback_tz
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| TimeParseError::NonexistentLocalTime {
            value: raw.to_string(),
            tz: fallback_tz.name().to_string(),
        })
}

fn parse_minute_precision_with_offset(value: &str) -> Option<DateTime<Utc>> {
    ["%Y-%m-%dT%H:%M%:z", "%Y-%m-%d %H:%M%:z"]
        .iter()
        .find_map(|format| DateTime::parse_from_str(value, format).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Parses a datetime and truncates it to its hour.
pub fn parse_hour_key(raw: &str, fallback_tz: Tz) -> Result<HourKey, TimeParseError> {
    parse_instant(raw, fallback_tz).map(HourKey::floor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
            .single()
            .unwrap()
    }

    #[test]
    fn offset_values_are_converted_to_utc() {
        let parsed = parse_instant("2022-11-01T01:00:00+01:00", Tz::UTC).unwrap();
        assert_eq!(parsed, utc(2022, 11, 1, 0, 0));

        let parsed = parse_instant("2022-11-01 01:00:00.000+01:00", Tz::UTC).unwrap();
        assert_eq!(parsed, utc(2022, 11, 1, 0, 0));

        let parsed = parse_instant("2022-11-01T00:00Z", Tz::Europe__Helsinki).unwrap();
        assert_eq!(parsed, utc(2022, 11, 1, 0, 0));

        let parsed = parse_instant("2022-11-01T02:00+02:00", Tz::UTC).unwrap();
        assert_eq!(parsed, utc(2022, 11, 1, 0, 0));
    }

    #[test]
    fn naive_values_use_fallback_timezone() {
        let parsed = parse_instant("2022-11-01 02:00:00", Tz::Europe__Helsinki).unwrap();
        assert_eq!(parsed, utc(2022, 11, 1, 0, 0));

        let parsed = parse_instant("2022-11-01 00:00:00.000", Tz::UTC).unwrap();
        assert_eq!(parsed, utc(2022, 11, 1, 0, 0));

        let parsed = parse_instant("2022-07-01", Tz::Europe__Helsinki).unwrap();
        assert_eq!(parsed, utc(2022, 6, 30, 21, 0));
    }

    #[test]
    fn ambiguous_local_time_picks_earlier_instant() {
        // 03:30 occurs twice in Helsinki on 2022-10-30.
        let parsed = parse_instant("2022-10-30T03:30", Tz::Europe__Helsinki).unwrap();
        assert_eq!(parsed, utc(2022, 10, 30, 0, 30));
    }

    #[test]
    fn nonexistent_local_time_is_rejected() {
        let err = parse_instant("2022-03-27T03:30", Tz::Europe__Helsinki).unwrap_err();
        assert!(matches!(err, TimeParseError::NonexistentLocalTime { .. }));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(matches!(
            parse_instant("yesterday", Tz::UTC).unwrap_err(),
            TimeParseError::Unrecognized(_)
        ));
        assert!(parse_instant("   ", Tz::UTC).is_err());
    }

    #[test]
    fn hour_key_alignment_and_floor() {
        assert!(HourKey::try_from_utc(utc(2022, 11, 1, 3, 0)).is_ok());
        assert!(matches!(
            HourKey::try_from_utc(utc(2022, 11, 1, 3, 15)).unwrap_err(),
            TimeParseError::NotHourAligned(_)
        ));

        let floored = HourKey::floor(utc(2022, 11, 1, 3, 59));
        assert_eq!(floored.as_datetime(), utc(2022, 11, 1, 3, 0));
        assert_eq!(floored.period(), Period::new(2022, 11).unwrap());
        assert_eq!(floored.to_string(), "2022-11-01T03:00:00+00:00");
    }

    #[test]
    fn period_orders_chronologically_and_formats() {
        let a = Period::new(2022, 12).unwrap();
        let b = Period::new(2023, 1).unwrap();
        assert!(a < b);
        assert_eq!(a.to_string(), "2022-12");
        assert!(Period::new(2023, 13).is_none());
    }
}
