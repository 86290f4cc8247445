//! Date rounding for histogram buckets. All rounding happens in UTC on
//! millisecond timestamps.

use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

const MINUTE_MS: i64 = 60_000;
const HOUR_MS: i64 = 60 * MINUTE_MS;
const DAY_MS: i64 = 24 * HOUR_MS;
const WEEK_MS: i64 = 7 * DAY_MS;

/// Calendar interval for date histogram aggregation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateInterval {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Quarter,
    Year,
}

impl DateInterval {
    pub const ALL: [DateInterval; 7] = [
        DateInterval::Minute,
        DateInterval::Hour,
        DateInterval::Day,
        DateInterval::Week,
        DateInterval::Month,
        DateInterval::Quarter,
        DateInterval::Year,
    ];

    pub fn parse_interval(s: &str) -> Option<Self> {
        match s {
            "1m" => return Some(DateInterval::Minute),
            "1M" => return Some(DateInterval::Month),
            _ => {}
        }
        match s.to_lowercase().as_str() {
            "minute" => Some(DateInterval::Minute),
            "hour" | "1h" => Some(DateInterval::Hour),
            "day" | "1d" => Some(DateInterval::Day),
            "week" | "1w" => Some(DateInterval::Week),
            "month" => Some(DateInterval::Month),
            "quarter" | "1q" => Some(DateInterval::Quarter),
            "year" | "1y" => Some(DateInterval::Year),
            _ => None,
        }
    }

    /// Longest possible length of one interval.
    pub fn max_millis(&self) -> i64 {
        match self {
            DateInterval::Minute => MINUTE_MS,
            DateInterval::Hour => HOUR_MS,
            DateInterval::Day => DAY_MS,
            DateInterval::Week => WEEK_MS,
            DateInterval::Month => 31 * DAY_MS,
            DateInterval::Quarter => 92 * DAY_MS,
            DateInterval::Year => 366 * DAY_MS,
        }
    }

    /// Round timestamp down to interval boundary
    pub fn floor(&self, dt: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let date = dt.date_naive();
        let start = match self {
            DateInterval::Minute => {
                return floor_fixed(dt.timestamp_millis(), MINUTE_MS).and_then(from_millis)
            }
            DateInterval::Hour => {
                return floor_fixed(dt.timestamp_millis(), HOUR_MS).and_then(from_millis)
            }
            DateInterval::Day => date,
            DateInterval::Week => {
                let days_from_monday = date.weekday().num_days_from_monday();
                date.checked_sub_signed(Duration::days(days_from_monday as i64))?
            }
            DateInterval::Month => NaiveDate::from_ymd_opt(date.year(), date.month(), 1)?,
            DateInterval::Quarter => {
                let month = (date.month() - 1) / 3 * 3 + 1;
                NaiveDate::from_ymd_opt(date.year(), month, 1)?
            }
            DateInterval::Year => NaiveDate::from_ymd_opt(date.year(), 1, 1)?,
        };
        Some(start.and_hms_opt(0, 0, 0)?.and_utc())
    }

    /// Start of the interval following the one starting at `dt`.
    pub fn next(&self, dt: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            DateInterval::Minute => dt.checked_add_signed(Duration::minutes(1)),
            DateInterval::Hour => dt.checked_add_signed(Duration::hours(1)),
            DateInterval::Day => dt.checked_add_signed(Duration::days(1)),
            DateInterval::Week => dt.checked_add_signed(Duration::weeks(1)),
            DateInterval::Month => dt.checked_add_months(Months::new(1)),
            DateInterval::Quarter => dt.checked_add_months(Months::new(3)),
            DateInterval::Year => dt.checked_add_months(Months::new(12)),
        }
    }
}

/// Rounding of timestamps into bucket keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rounding {
    Calendar(DateInterval),
    Fixed { interval_ms: i64 },
}

impl Rounding {
    /// Parse a fixed interval such as `90s`, `15m`, `12h` or `2d`.
    pub fn parse_fixed_interval(s: &str) -> Option<Self> {
        let split = s.find(|c: char| !c.is_ascii_digit())?;
        let (amount, unit) = s.split_at(split);
        let amount: i64 = amount.parse().ok()?;
        let unit_ms = match unit {
            "ms" => 1,
            "s" => 1_000,
            "m" => MINUTE_MS,
            "h" => HOUR_MS,
            "d" => DAY_MS,
            _ => return None,
        };
        let interval_ms = amount.checked_mul(unit_ms)?;
        (interval_ms > 0).then_some(Rounding::Fixed { interval_ms })
    }

    /// Bucket key of the timestamp.
    pub fn round(&self, timestamp_ms: i64) -> Option<i64> {
        match self {
            Rounding::Calendar(interval) => {
                let floored = interval.floor(from_millis(timestamp_ms)?)?;
                Some(floored.timestamp_millis())
            }
            Rounding::Fixed { interval_ms } => floor_fixed(timestamp_ms, *interval_ms),
        }
    }

    /// Key of the bucket after the one keyed `rounded`.
    pub fn next_rounding_value(&self, rounded: i64) -> Option<i64> {
        match self {
            Rounding::Calendar(interval) => {
                Some(interval.next(from_millis(rounded)?)?.timestamp_millis())
            }
            Rounding::Fixed { interval_ms } => rounded.checked_add(*interval_ms),
        }
    }

    /// Smallest calendar interval that covers `[low, high]` in at most `target_buckets` buckets.
    pub fn auto(low: i64, high: i64, target_buckets: usize) -> Self {
        let span = high.saturating_sub(low).max(0);
        let target = target_buckets.max(1) as i64;
        let interval = DateInterval::ALL
            .into_iter()
            .find(|interval| span / interval.max_millis() < target)
            .unwrap_or(DateInterval::Year);
        Rounding::Calendar(interval)
    }
}

fn floor_fixed(timestamp_ms: i64, interval_ms: i64) -> Option<i64> {
    timestamp_ms.div_euclid(interval_ms).checked_mul(interval_ms)
}

fn from_millis(timestamp_ms: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
}
