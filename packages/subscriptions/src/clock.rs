//! Zone-aware clock
//!
//! Every calendar decision (is today a due day, which pause window applies,
//! which day a run belongs to) is made in one configured zone. The zone is
//! passed in at construction; there is no process-wide time zone state.

use crate::error::ConfigError;
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

/// An instant together with its calendar fields in the configured zone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockReading {
    pub timestamp: DateTime<Utc>,
    pub day: u32,
    pub month: u32,
    pub year: i32,
}

impl ClockReading {
    /// The local calendar date of this reading
    pub fn date(&self) -> NaiveDate {
        // Fields were produced by `Datelike` on a valid date
        NaiveDate::from_ymd_opt(self.year, self.month, self.day).unwrap_or(NaiveDate::MIN)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ClockSource {
    tz: Tz,
    pinned: Option<DateTime<Utc>>,
}

impl ClockSource {
    pub fn new(tz: Tz) -> Self {
        Self { tz, pinned: None }
    }

    /// Resolve an IANA zone name ("UTC", "Europe/Berlin", ...)
    pub fn from_name(name: &str) -> Result<Self, ConfigError> {
        name.trim()
            .parse::<Tz>()
            .map(Self::new)
            .map_err(|_| ConfigError::InvalidTimezone(name.to_string()))
    }

    /// A clock that always reports `instant` as now. Used for reruns of a past day and in tests.
    pub fn pinned(tz: Tz, instant: DateTime<Utc>) -> Self {
        Self {
            tz,
            pinned: Some(instant),
        }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn now(&self) -> ClockReading {
        self.at(self.pinned.unwrap_or_else(Utc::now))
    }

    /// Interpret an arbitrary instant in the configured zone
    pub fn at(&self, instant: DateTime<Utc>) -> ClockReading {
        let local = instant.with_timezone(&self.tz);
        ClockReading {
            timestamp: instant,
            day: local.day(),
            month: local.month(),
            year: local.year(),
        }
    }

    /// First instant of the local calendar day containing `instant`
    pub fn start_of_day(&self, instant: DateTime<Utc>) -> DateTime<Utc> {
        self.start_of_date(self.at(instant).date())
    }

    pub fn start_of_date(&self, date: NaiveDate) -> DateTime<Utc> {
        let midnight = date.and_time(NaiveTime::MIN);
        match self.tz.from_local_datetime(&midnight) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            // Midnight skipped by a DST jump: the day starts at the first valid local hour
            LocalResult::None => self
                .tz
                .from_local_datetime(&(midnight + Duration::hours(1)))
                .earliest()
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|| Utc.from_utc_datetime(&midnight)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utc(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_calendar_fields_follow_zone() {
        let clock = ClockSource::from_name("Asia/Kolkata").unwrap();
        // 20:00 UTC is 01:30 the next day in Kolkata
        let reading = clock.at(utc("2026-02-28T20:00:00Z"));
        assert_eq!((reading.year, reading.month, reading.day), (2026, 3, 1));
        assert_eq!(reading.date(), NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());

        let utc_clock = ClockSource::new(chrono_tz::UTC);
        let reading = utc_clock.at(utc("2026-02-28T20:00:00Z"));
        assert_eq!((reading.month, reading.day), (2, 28));
    }

    #[test]
    fn test_invalid_zone_is_config_error() {
        assert!(matches!(
            ClockSource::from_name("Nowhere/Special"),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_pinned_clock_reports_fixed_instant() {
        let instant = utc("2026-10-19T06:00:00Z");
        let clock = ClockSource::pinned(chrono_tz::UTC, instant);
        assert_eq!(clock.now().timestamp, instant);
        assert_eq!(clock.now().day, 19);
    }

    #[test]
    fn test_start_of_day_in_zone() {
        let clock = ClockSource::from_name("Asia/Kolkata").unwrap();
        // Kolkata is UTC+05:30, so local midnight is 18:30 UTC of the previous day
        let start = clock.start_of_day(utc("2026-10-19T10:00:00Z"));
        assert_eq!(start, utc("2026-10-18T18:30:00Z"));
    }

    #[test]
    fn test_start_of_day_on_dst_change() {
        let clock = ClockSource::from_name("Europe/Berlin").unwrap();
        // Spring forward happens at 02:00, midnight itself is unaffected
        let start = clock.start_of_day(utc("2026-03-29T12:00:00Z"));
        assert_eq!(start, utc("2026-03-28T23:00:00Z"));
    }
}
