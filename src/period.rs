//! Calendar periods and date handling: alignment of instants to hour/day/week/month/quarter/year
//! boundaries, parsing of user-supplied dates, and the fixed `YYYY-MM-DD HH:MM:SS` rendering
//! used for query substitution.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::error::EtlError;
use crate::types::Timestamp;

/// Granularity of the intervals a date range is split into. Also used as the suffix of
/// generated series names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Period {
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl Period {
    pub const ALL: [Period; 6] = [
        Period::Hour,
        Period::Day,
        Period::Week,
        Period::Month,
        Period::Quarter,
        Period::Year,
    ];

    /// Single-letter abbreviation (`h`, `d`, `w`, `m`, `q`, `y`).
    pub fn abbreviation(self) -> &'static str {
        match self {
            Period::Hour => "h",
            Period::Day => "d",
            Period::Week => "w",
            Period::Month => "m",
            Period::Quarter => "q",
            Period::Year => "y",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Period::Hour => "hour",
            Period::Day => "day",
            Period::Week => "week",
            Period::Month => "month",
            Period::Quarter => "quarter",
            Period::Year => "year",
        }
    }

    /// Start of the period containing `t`.
    pub fn period_start(self, t: Timestamp) -> Result<Timestamp, EtlError> {
        let date = t.date();
        let start = match self {
            Period::Hour => t.date().and_hms_opt(t.hour(), 0, 0),
            Period::Day => Some(midnight(date)),
            Period::Week => {
                // Weeks start on Monday.
                let back = u64::from(date.weekday().num_days_from_monday());
                date.checked_sub_days(Days::new(back)).map(midnight)
            }
            Period::Month => first_of_month(date.year(), date.month()),
            Period::Quarter => first_of_month(date.year(), quarter_first_month(date.month())),
            Period::Year => first_of_month(date.year(), 1),
        };
        start.ok_or_else(|| EtlError::TimestampOutOfRange(format_ymdhms(t)))
    }

    /// Start of the period following the one containing `t`.
    pub fn next_period_start(self, t: Timestamp) -> Result<Timestamp, EtlError> {
        let start = self.period_start(t)?;
        let next = match self {
            Period::Hour => start.checked_add_signed(TimeDelta::hours(1)),
            Period::Day => start.checked_add_days(Days::new(1)),
            Period::Week => start.checked_add_days(Days::new(7)),
            Period::Month => start.checked_add_months(Months::new(1)),
            Period::Quarter => start.checked_add_months(Months::new(3)),
            Period::Year => start.checked_add_months(Months::new(12)),
        };
        next.ok_or_else(|| EtlError::TimestampOutOfRange(format_ymdhms(t)))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.abbreviation())
    }
}

impl FromStr for Period {
    type Err = EtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "h" | "hour" => Ok(Period::Hour),
            "d" | "day" => Ok(Period::Day),
            "w" | "week" => Ok(Period::Week),
            "m" | "month" => Ok(Period::Month),
            "q" | "quarter" => Ok(Period::Quarter),
            "y" | "year" => Ok(Period::Year),
            _ => Err(EtlError::InvalidPeriod(s.to_string())),
        }
    }
}

fn midnight(date: NaiveDate) -> NaiveDateTime {
    NaiveDateTime::new(date, NaiveTime::MIN)
}

fn first_of_month(year: i32, month: u32) -> Option<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, month, 1).map(midnight)
}

fn quarter_first_month(month: u32) -> u32 {
    ((month - 1) / 3) * 3 + 1
}

const DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parses a user-supplied date or date-time. Values with an offset are converted to UTC.
pub fn parse_datetime(input: &str) -> Result<Timestamp, EtlError> {
    let s = input.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt);
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(midnight(date));
    }
    Err(EtlError::InvalidDate {
        input: input.to_string(),
    })
}

/// Renders `YYYY-MM-DD HH:MM:SS`.
pub fn format_ymdhms(t: Timestamp) -> String {
    t.format("%Y-%m-%d %H:%M:%S").to_string()
}
