// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

//! Period keys - calendar-aligned bucket identifiers
//!
//! Maps an instant and a [`Resolution`] to the canonical period containing it.
//! All arithmetic is in UTC.
//!
//! | Resolution | Canonical form | Boundary rule |
//! |------------|----------------|---------------|
//! | Day        | `2024-03-01`   | UTC calendar date |
//! | Week       | `2024-W09`     | ISO-8601: Monday start, week 1 holds the first Thursday |
//! | Month      | `2024-03`      | calendar month |
//! | Year       | `2024`         | calendar year |
//!
//! A key is stored as `(resolution, first day)`, so every key is valid by
//! construction and ordering within one resolution follows time. The
//! canonical strings sort the same way for years 0000-9999, which is what
//! closed-period detection relies on.
//!
//! Note the week-year is the ISO week-year: 2024-12-30 belongs to `2025-W01`.
//! Weeks therefore do not nest into months or years; rollup verification uses
//! [`PeriodKey::children`] (week→days, month→days, year→months).

use crate::error::StatsError;
use chrono::{DateTime, Datelike, Months, NaiveDate, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Aggregation granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    Day,
    Week,
    Month,
    Year,
}

impl Resolution {
    /// Finest to coarsest - the order deltas fan out in
    pub const ALL: [Resolution; 4] = [
        Resolution::Day,
        Resolution::Week,
        Resolution::Month,
        Resolution::Year,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Day => "day",
            Resolution::Week => "week",
            Resolution::Month => "month",
            Resolution::Year => "year",
        }
    }

    /// Resolution whose buckets sum to a bucket of this resolution
    pub fn child(self) -> Option<Resolution> {
        match self {
            Resolution::Day => None,
            Resolution::Week | Resolution::Month => Some(Resolution::Day),
            Resolution::Year => Some(Resolution::Month),
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "day" => Ok(Resolution::Day),
            "week" => Ok(Resolution::Week),
            "month" => Ok(Resolution::Month),
            "year" => Ok(Resolution::Year),
            other => Err(StatsError::invalid_filter(format!(
                "unsupported groupBy '{other}'"
            ))),
        }
    }
}

/// Canonical identifier of one period at one resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PeriodKey {
    resolution: Resolution,
    first_day: NaiveDate,
}

impl PeriodKey {
    /// Period of `resolution` containing `instant`
    pub fn of(instant: DateTime<Utc>, resolution: Resolution) -> Self {
        Self::containing(instant.date_naive(), resolution)
    }

    /// Period of `resolution` containing the UTC calendar date `date`
    pub fn containing(date: NaiveDate, resolution: Resolution) -> Self {
        let first_day = match resolution {
            Resolution::Day => date,
            Resolution::Week => {
                let offset = date.weekday().num_days_from_monday() as u64;
                date.checked_sub_days(chrono::Days::new(offset))
                    .unwrap_or(date)
            }
            Resolution::Month => date.with_day(1).unwrap_or(date),
            Resolution::Year => date.with_ordinal(1).unwrap_or(date),
        };
        Self {
            resolution,
            first_day,
        }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first_day
    }

    /// Last calendar day inside the period
    pub fn last_day(&self) -> NaiveDate {
        self.next().first_day.pred_opt().unwrap_or(self.first_day)
    }

    /// Inclusive start instant (UTC midnight)
    pub fn start(&self) -> DateTime<Utc> {
        midnight(self.first_day)
    }

    /// Exclusive end instant (start of the following period)
    pub fn end(&self) -> DateTime<Utc> {
        self.next().start()
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        PeriodKey::of(instant, self.resolution) == *self
    }

    /// ISO week-year and week number, for week keys
    pub fn iso_week(&self) -> Option<(i32, u32)> {
        match self.resolution {
            Resolution::Week => {
                let iw = self.first_day.iso_week();
                Some((iw.year(), iw.week()))
            }
            _ => None,
        }
    }

    /// Following period; saturates at the end of the calendar
    pub fn next(&self) -> Self {
        let first_day = match self.resolution {
            Resolution::Day => self.first_day.succ_opt(),
            Resolution::Week => self.first_day.checked_add_days(chrono::Days::new(7)),
            Resolution::Month => self.first_day.checked_add_months(Months::new(1)),
            Resolution::Year => self.first_day.checked_add_months(Months::new(12)),
        };
        Self {
            resolution: self.resolution,
            first_day: first_day.unwrap_or(self.first_day),
        }
    }

    /// Preceding period; saturates at the start of the calendar
    pub fn prev(&self) -> Self {
        let first_day = match self.resolution {
            Resolution::Day => self.first_day.pred_opt(),
            Resolution::Week => self.first_day.checked_sub_days(chrono::Days::new(7)),
            Resolution::Month => self.first_day.checked_sub_months(Months::new(1)),
            Resolution::Year => self.first_day.checked_sub_months(Months::new(12)),
        };
        Self {
            resolution: self.resolution,
            first_day: first_day.unwrap_or(self.first_day),
        }
    }

    /// Finer keys whose buckets must sum to this key's bucket
    pub fn children(&self) -> Vec<PeriodKey> {
        let Some(child) = self.resolution.child() else {
            return Vec::new();
        };
        let end = self.next().first_day;
        let mut out = Vec::new();
        let mut key = PeriodKey::containing(self.first_day, child);
        while key.first_day < end {
            out.push(key);
            let next = key.next();
            if next == key {
                break;
            }
            key = next;
        }
        out
    }

    /// Keys of `resolution` covering `[start, end]`, in order
    ///
    /// Fails with `InvalidFilter` when the range is inverted or would produce
    /// more than `max_points` keys.
    pub fn range(
        start: NaiveDate,
        end: NaiveDate,
        resolution: Resolution,
        max_points: usize,
    ) -> Result<Vec<PeriodKey>, StatsError> {
        if start > end {
            return Err(StatsError::invalid_filter(format!(
                "startDate {start} is after endDate {end}"
            )));
        }
        let last = PeriodKey::containing(end, resolution);
        let mut key = PeriodKey::containing(start, resolution);
        let mut out = Vec::new();
        loop {
            if out.len() >= max_points {
                return Err(StatsError::invalid_filter(format!(
                    "range {start}..{end} by {resolution} exceeds {max_points} points"
                )));
            }
            out.push(key);
            if key >= last {
                break;
            }
            let next = key.next();
            if next == key {
                break;
            }
            key = next;
        }
        Ok(out)
    }

    /// Short chart label
    pub fn label(&self) -> String {
        match self.resolution {
            Resolution::Day => self.first_day.format("%b %d").to_string(),
            Resolution::Week => {
                let iw = self.first_day.iso_week();
                format!("W{:02} {}", iw.week(), iw.year())
            }
            Resolution::Month => self.first_day.format("%b %Y").to_string(),
            Resolution::Year => self.first_day.format("%Y").to_string(),
        }
    }
}

fn midnight(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::default()))
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let d = self.first_day;
        match self.resolution {
            Resolution::Day => write!(f, "{:04}-{:02}-{:02}", d.year(), d.month(), d.day()),
            Resolution::Week => {
                let iw = d.iso_week();
                write!(f, "{:04}-W{:02}", iw.year(), iw.week())
            }
            Resolution::Month => write!(f, "{:04}-{:02}", d.year(), d.month()),
            Resolution::Year => write!(f, "{:04}", d.year()),
        }
    }
}

impl FromStr for PeriodKey {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || StatsError::invalid_filter(format!("malformed period key '{s}'"));
        let num = |part: &str| part.parse::<u32>().map_err(|_| bad());

        let parts: Vec<&str> = s.split('-').collect();
        match parts.as_slice() {
            [year] if year.len() == 4 => {
                let y = num(*year)? as i32;
                let date = NaiveDate::from_ymd_opt(y, 1, 1).ok_or_else(bad)?;
                Ok(PeriodKey::containing(date, Resolution::Year))
            }
            [year, week] if week.starts_with('W') && week.len() == 3 => {
                let y = num(*year)? as i32;
                let w = num(&week[1..])?;
                let date = NaiveDate::from_isoywd_opt(y, w, Weekday::Mon).ok_or_else(bad)?;
                Ok(PeriodKey::containing(date, Resolution::Week))
            }
            [year, month] if month.len() == 2 => {
                let date = NaiveDate::from_ymd_opt(num(*year)? as i32, num(*month)?, 1)
                    .ok_or_else(bad)?;
                Ok(PeriodKey::containing(date, Resolution::Month))
            }
            [year, month, day] if month.len() == 2 && day.len() == 2 => {
                let date = NaiveDate::from_ymd_opt(num(*year)? as i32, num(*month)?, num(*day)?)
                    .ok_or_else(bad)?;
                Ok(PeriodKey::containing(date, Resolution::Day))
            }
            _ => Err(bad()),
        }
    }
}

impl TryFrom<String> for PeriodKey {
    type Error = StatsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PeriodKey> for String {
    fn from(k: PeriodKey) -> Self {
        k.to_string()
    }
}
