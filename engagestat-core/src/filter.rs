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

//! Query filter options and their resolution against "now"
//!
//! Relative ranges count whole UTC periods ending with the current one:
//! `7d` is today plus the six days before it, `12m` is the current month
//! plus the eleven before it. `24h` covers the days touched by the last 24
//! hours, so at day resolution it is yesterday plus today.

use crate::error::StatsError;
use crate::metric::StatMetric;
use crate::period::{PeriodKey, Resolution};
use chrono::{DateTime, Datelike, Days, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Named time window accepted by filters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeRange {
    #[serde(rename = "24h")]
    Last24Hours,
    #[default]
    #[serde(rename = "7d")]
    Last7Days,
    #[serde(rename = "30d")]
    Last30Days,
    #[serde(rename = "90d")]
    Last90Days,
    #[serde(rename = "12m")]
    Last12Months,
    #[serde(rename = "all")]
    All,
    #[serde(rename = "custom")]
    Custom,
}

impl TimeRange {
    pub fn as_str(self) -> &'static str {
        match self {
            TimeRange::Last24Hours => "24h",
            TimeRange::Last7Days => "7d",
            TimeRange::Last30Days => "30d",
            TimeRange::Last90Days => "90d",
            TimeRange::Last12Months => "12m",
            TimeRange::All => "all",
            TimeRange::Custom => "custom",
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "24h" => Ok(TimeRange::Last24Hours),
            "7d" => Ok(TimeRange::Last7Days),
            "30d" => Ok(TimeRange::Last30Days),
            "90d" => Ok(TimeRange::Last90Days),
            "12m" => Ok(TimeRange::Last12Months),
            "all" => Ok(TimeRange::All),
            "custom" => Ok(TimeRange::Custom),
            other => Err(StatsError::invalid_filter(format!(
                "unsupported timeRange '{other}'"
            ))),
        }
    }
}

/// Query input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsFilterOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub time_range: TimeRange,
    #[serde(default = "default_group_by")]
    pub group_by: Resolution,
    #[serde(default = "default_metric")]
    pub metric: StatMetric,
}

fn default_group_by() -> Resolution {
    Resolution::Day
}

fn default_metric() -> StatMetric {
    StatMetric::Views
}

impl Default for StatsFilterOptions {
    fn default() -> Self {
        Self {
            start_date: None,
            end_date: None,
            time_range: TimeRange::default(),
            group_by: default_group_by(),
            metric: default_metric(),
        }
    }
}

impl StatsFilterOptions {
    pub fn new(time_range: TimeRange, group_by: Resolution, metric: StatMetric) -> Self {
        Self {
            start_date: None,
            end_date: None,
            time_range,
            group_by,
            metric,
        }
    }

    pub fn custom(start: NaiveDate, end: NaiveDate, group_by: Resolution, metric: StatMetric) -> Self {
        Self {
            start_date: Some(start),
            end_date: Some(end),
            time_range: TimeRange::Custom,
            group_by,
            metric,
        }
    }

    /// Validate and resolve against `now`
    ///
    /// `first_event` anchors the `all` range; without one `all` covers today.
    /// Explicit dates given with a relative range turn it into `custom`.
    pub fn resolve(
        &self,
        now: DateTime<Utc>,
        first_event: Option<DateTime<Utc>>,
        max_points: usize,
    ) -> Result<ResolvedFilter, StatsError> {
        let today = now.date_naive();

        let (start, end, time_range) = match (self.start_date, self.end_date, self.time_range) {
            (Some(start), Some(end), _) => (start, end, TimeRange::Custom),
            (Some(_), None, _) | (None, Some(_), _) => {
                return Err(StatsError::invalid_filter(
                    "startDate and endDate must be given together",
                ))
            }
            (None, None, range) => {
                let start = match range {
                    TimeRange::Last24Hours => now
                        .checked_sub_signed(Duration::hours(24))
                        .map(|t| t.date_naive())
                        .ok_or_else(|| StatsError::invalid_filter("24h range underflows"))?,
                    TimeRange::Last7Days => days_back(today, 6)?,
                    TimeRange::Last30Days => days_back(today, 29)?,
                    TimeRange::Last90Days => days_back(today, 89)?,
                    TimeRange::Last12Months => today
                        .with_day(1)
                        .and_then(|d| d.checked_sub_months(Months::new(11)))
                        .ok_or_else(|| StatsError::invalid_filter("12m range underflows"))?,
                    TimeRange::All => first_event.map(|t| t.date_naive()).unwrap_or(today).min(today),
                    TimeRange::Custom => {
                        return Err(StatsError::invalid_filter(
                            "custom timeRange requires both startDate and endDate",
                        ))
                    }
                };
                (start, today, range)
            }
        };

        let periods = PeriodKey::range(start, end, self.group_by, max_points)?;

        Ok(ResolvedFilter {
            options: StatsFilterOptions {
                start_date: Some(start),
                end_date: Some(end),
                time_range,
                group_by: self.group_by,
                metric: self.metric.clone(),
            },
            periods,
        })
    }
}

fn days_back(today: NaiveDate, days: u64) -> Result<NaiveDate, StatsError> {
    today
        .checked_sub_days(Days::new(days))
        .ok_or_else(|| StatsError::invalid_filter("time range underflows the calendar"))
}

/// Filter after validation: normalized options plus the ordered series keys
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedFilter {
    pub options: StatsFilterOptions,
    pub periods: Vec<PeriodKey>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 7, 18, 30, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_seven_days_is_seven_points() {
        let filter = StatsFilterOptions::new(TimeRange::Last7Days, Resolution::Day, StatMetric::Views);
        let resolved = filter.resolve(now(), None, 1000).unwrap();
        assert_eq!(resolved.periods.len(), 7);
        assert_eq!(resolved.periods[0].to_string(), "2024-03-01");
        assert_eq!(resolved.periods[6].to_string(), "2024-03-07");
        assert_eq!(resolved.options.start_date, Some(date(2024, 3, 1)));
        assert_eq!(resolved.options.end_date, Some(date(2024, 3, 7)));
    }

    #[test]
    fn test_relative_ranges() {
        let count = |range, group_by| {
            StatsFilterOptions::new(range, group_by, StatMetric::Views)
                .resolve(now(), None, 10_000)
                .unwrap()
                .periods
                .len()
        };
        assert_eq!(count(TimeRange::Last24Hours, Resolution::Day), 2);
        assert_eq!(count(TimeRange::Last30Days, Resolution::Day), 30);
        assert_eq!(count(TimeRange::Last90Days, Resolution::Day), 90);
        assert_eq!(count(TimeRange::Last12Months, Resolution::Month), 12);
        assert_eq!(count(TimeRange::Last12Months, Resolution::Year), 2);
    }

    #[test]
    fn test_last_24_hours_reaches_into_yesterday() {
        let filter = StatsFilterOptions::new(TimeRange::Last24Hours, Resolution::Day, StatMetric::Views);
        let just_after_midnight = Utc.with_ymd_and_hms(2024, 3, 8, 0, 30, 0).unwrap();
        let resolved = filter.resolve(just_after_midnight, None, 1000).unwrap();
        let keys: Vec<String> = resolved.periods.iter().map(|k| k.to_string()).collect();
        assert_eq!(keys, vec!["2024-03-07", "2024-03-08"]);
        assert_eq!(resolved.options.start_date, Some(date(2024, 3, 7)));

        let midnight = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
        assert_eq!(filter.resolve(midnight, None, 1000).unwrap().periods.len(), 2);

        let by_month = StatsFilterOptions::new(TimeRange::Last24Hours, Resolution::Month, StatMetric::Views);
        assert_eq!(by_month.resolve(just_after_midnight, None, 1000).unwrap().periods.len(), 1);
    }

    #[test]
    fn test_all_range_uses_first_event() {
        let filter = StatsFilterOptions::new(TimeRange::All, Resolution::Month, StatMetric::Likes);
        let first = Utc.with_ymd_and_hms(2023, 11, 15, 0, 0, 0).unwrap();
        let resolved = filter.resolve(now(), Some(first), 1000).unwrap();
        assert_eq!(resolved.periods.len(), 5);

        let empty = filter.resolve(now(), None, 1000).unwrap();
        assert_eq!(empty.periods.len(), 1);
    }

    #[test]
    fn test_custom_validation() {
        let missing = StatsFilterOptions::new(TimeRange::Custom, Resolution::Day, StatMetric::Views);
        assert!(matches!(
            missing.resolve(now(), None, 1000),
            Err(StatsError::InvalidFilter(_))
        ));

        let inverted =
            StatsFilterOptions::custom(date(2024, 3, 5), date(2024, 3, 1), Resolution::Day, StatMetric::Views);
        assert!(matches!(
            inverted.resolve(now(), None, 1000),
            Err(StatsError::InvalidFilter(_))
        ));

        let mut half = StatsFilterOptions::default();
        half.start_date = Some(date(2024, 3, 1));
        assert!(matches!(half.resolve(now(), None, 1000), Err(StatsError::InvalidFilter(_))));
    }

    #[test]
    fn test_explicit_dates_normalize_to_custom() {
        let mut filter = StatsFilterOptions::new(TimeRange::Last90Days, Resolution::Week, StatMetric::Views);
        filter.start_date = Some(date(2024, 2, 1));
        filter.end_date = Some(date(2024, 2, 29));
        let resolved = filter.resolve(now(), None, 1000).unwrap();
        assert_eq!(resolved.options.time_range, TimeRange::Custom);
        assert_eq!(resolved.periods.first().unwrap().to_string(), "2024-W05");
        assert_eq!(resolved.periods.last().unwrap().to_string(), "2024-W09");
    }

    #[test]
    fn test_point_budget() {
        let filter = StatsFilterOptions::custom(date(2000, 1, 1), date(2024, 1, 1), Resolution::Day, StatMetric::Views);
        assert!(matches!(filter.resolve(now(), None, 3700), Err(StatsError::InvalidFilter(_))));
    }

    #[test]
    fn test_filter_json() {
        let json = r#"{"timeRange":"30d","groupBy":"week","metric":"followers"}"#;
        let filter: StatsFilterOptions = serde_json::from_str(json).unwrap();
        assert_eq!(filter.time_range, TimeRange::Last30Days);
        assert_eq!(filter.group_by, Resolution::Week);
        assert_eq!(filter.metric, StatMetric::Followers);

        let bad = r#"{"timeRange":"30d","groupBy":"hour","metric":"followers"}"#;
        assert!(serde_json::from_str::<StatsFilterOptions>(bad).is_err());
        assert!("1w".parse::<TimeRange>().is_err());
    }
}
