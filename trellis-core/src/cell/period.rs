//! Calendar periods.
//!
//! A period is a bump applied to a timestamp, written compactly as
//! `<n><unit>` (`30m`, `1d`, `3b`) or in words (`3 business days`).

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, Months, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// A calendar bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Period {
    Seconds(i64),
    Minutes(i64),
    Hours(i64),
    Days(i64),
    Weeks(i64),
    /// Monday to Friday only.
    BusinessDays(i64),
    Months(i32),
    Years(i32),
}

impl Period {
    /// Apply the period to a timestamp. Saturates instead of overflowing.
    pub fn bump(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        let fixed = |d: Option<Duration>| {
            d.and_then(|d| from.checked_add_signed(d))
                .unwrap_or(DateTime::<Utc>::MAX_UTC)
        };
        match *self {
            Period::Seconds(n) => fixed(Duration::try_seconds(n)),
            Period::Minutes(n) => fixed(Duration::try_minutes(n)),
            Period::Hours(n) => fixed(Duration::try_hours(n)),
            Period::Days(n) => fixed(Duration::try_days(n)),
            Period::Weeks(n) => fixed(Duration::try_weeks(n)),
            Period::BusinessDays(n) => bump_business_days(from, n),
            Period::Months(n) => bump_months(from, n),
            Period::Years(n) => bump_months(from, n.saturating_mul(12)),
        }
    }
}

fn is_weekend(t: &DateTime<Utc>) -> bool {
    matches!(t.weekday(), Weekday::Sat | Weekday::Sun)
}

fn bump_business_days(from: DateTime<Utc>, n: i64) -> DateTime<Utc> {
    let step = if n >= 0 { Duration::days(1) } else { Duration::days(-1) };
    let mut remaining = n.unsigned_abs();
    let mut current = from;
    while remaining > 0 {
        current = match current.checked_add_signed(step) {
            Some(next) => next,
            None => return current,
        };
        if !is_weekend(&current) {
            remaining -= 1;
        }
    }
    current
}

fn bump_months(from: DateTime<Utc>, n: i32) -> DateTime<Utc> {
    let months = Months::new(n.unsigned_abs());
    let bumped = if n >= 0 {
        from.checked_add_months(months)
    } else {
        from.checked_sub_months(months)
    };
    bumped.unwrap_or(if n >= 0 {
        DateTime::<Utc>::MAX_UTC
    } else {
        DateTime::<Utc>::MIN_UTC
    })
}

impl FromStr for Period {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidPeriod(s.to_string());
        let text = s.trim();

        let split = text
            .char_indices()
            .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
            .map(|(i, _)| i)
            .ok_or_else(invalid)?;
        let (count, unit) = text.split_at(split);
        let count: i64 = count.parse().map_err(|_| invalid())?;
        let unit = unit.trim();

        let months = |n: i64| i32::try_from(n).map_err(|_| invalid());

        // Single-letter `M` is months; everything else is case-insensitive
        if unit == "M" {
            return Ok(Period::Months(months(count)?));
        }

        Ok(match unit.to_ascii_lowercase().as_str() {
            "s" | "sec" | "second" | "seconds" => Period::Seconds(count),
            "m" | "min" | "minute" | "minutes" => Period::Minutes(count),
            "h" | "hour" | "hours" => Period::Hours(count),
            "d" | "day" | "days" => Period::Days(count),
            "w" | "week" | "weeks" => Period::Weeks(count),
            "b" | "bd" | "business day" | "business days" => Period::BusinessDays(count),
            "mo" | "month" | "months" => Period::Months(months(count)?),
            "y" | "year" | "years" => Period::Years(months(count)?),
            _ => return Err(invalid()),
        })
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Period::Seconds(n) => write!(f, "{n}s"),
            Period::Minutes(n) => write!(f, "{n}m"),
            Period::Hours(n) => write!(f, "{n}h"),
            Period::Days(n) => write!(f, "{n}d"),
            Period::Weeks(n) => write!(f, "{n}w"),
            Period::BusinessDays(n) => write!(f, "{n}b"),
            Period::Months(n) => write!(f, "{n}M"),
            Period::Years(n) => write!(f, "{n}y"),
        }
    }
}
