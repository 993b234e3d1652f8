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

//! Integration tests for the stats query service

use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use engagestat_core::{
    EngagementEvent, EngineConfig, FixedClock, Metric, Resolution, StatMetric, StatsError,
    StatsFilterOptions, TimeRange, UserId,
};
use engagestat_query::QueryService;
use engagestat_storage::{MemoryPersistence, StatsEngine};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;

fn at(m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, m, d, h, 0, 0).unwrap()
}

fn service() -> QueryService {
    let engine = StatsEngine::new(
        EngineConfig::default(),
        Arc::new(MemoryPersistence::new()),
        Arc::new(FixedClock::new(at(3, 7, 18))),
    )
    .unwrap();
    QueryService::new(Arc::new(engine))
}

/// Seven daily points, zero-filled, in order
#[test]
fn test_seven_day_series_is_zero_filled() {
    let svc = service();
    svc.engine()
        .emit(&EngagementEvent::new("alice", Metric::PostView, 3, at(3, 3, 8)))
        .unwrap();

    let filter = StatsFilterOptions::new(TimeRange::Last7Days, Resolution::Day, StatMetric::Views);
    let response = svc.get_stats(&UserId::from("alice"), &filter).unwrap();

    assert_eq!(response.data.len(), 7);
    let dates: Vec<String> = response.data.iter().map(|p| p.date.to_string()).collect();
    assert_eq!(
        dates,
        ["2024-03-01", "2024-03-02", "2024-03-03", "2024-03-04", "2024-03-05", "2024-03-06", "2024-03-07"]
    );
    let values: Vec<f64> = response.data.iter().map(|p| p.value).collect();
    assert_eq!(values, vec![0.0, 0.0, 3.0, 0.0, 0.0, 0.0, 0.0]);
}

/// `24h` just after midnight still sees last night's events
#[test]
fn test_last_24_hours_spans_midnight() {
    let svc = service();
    svc.engine()
        .emit(&EngagementEvent::new("alice", Metric::Like, 2, at(3, 7, 23)))
        .unwrap();
    svc.engine()
        .emit(&EngagementEvent::new("alice", Metric::Like, 1, at(3, 8, 0)))
        .unwrap();

    let filter = StatsFilterOptions::new(TimeRange::Last24Hours, Resolution::Day, StatMetric::Likes);
    let now = Utc.with_ymd_and_hms(2024, 3, 8, 0, 30, 0).unwrap();
    let response = svc.get_stats_at(&UserId::from("alice"), &filter, now).unwrap();

    let values: Vec<f64> = response.data.iter().map(|p| p.value).collect();
    assert_eq!(values, vec![2.0, 1.0]);
    assert_eq!(response.data.last().and_then(|p| p.cumulative), Some(3.0));
}

/// A user with no events still gets a full zero series
#[test]
fn test_unknown_user_gets_zero_series() {
    let svc = service();
    let filter = StatsFilterOptions::new(TimeRange::Last30Days, Resolution::Week, StatMetric::Likes);
    let response = svc.get_stats(&UserId::from("nobody"), &filter).unwrap();
    assert!(!response.data.is_empty());
    assert!(response.data.iter().all(|p| p.value == 0.0));
    assert_eq!(response.summary.total_likes, 0);
    assert_eq!(response.summary.views_growth, 0.0);
}

/// The `all` range starts at the user's first event
#[test]
fn test_all_range_starts_at_first_event() {
    let svc = service();
    svc.engine()
        .emit(&EngagementEvent::new("alice", Metric::Comment, 1, at(1, 20, 8)))
        .unwrap();
    let filter = StatsFilterOptions::new(TimeRange::All, Resolution::Month, StatMetric::Comments);
    let response = svc.get_stats(&UserId::from("alice"), &filter).unwrap();

    assert_eq!(response.data.len(), 3);
    assert_eq!(response.data[0].value, 1.0);
    assert_eq!(response.filter.start_date, NaiveDate::from_ymd_opt(2024, 1, 20));
}

/// Bad filters are rejected before any state is read
#[test]
fn test_invalid_filters() {
    let svc = service();
    let alice = UserId::from("alice");
    let date = |m, d| NaiveDate::from_ymd_opt(2024, m, d).unwrap();

    let inverted = StatsFilterOptions::custom(date(3, 5), date(3, 1), Resolution::Day, StatMetric::Views);
    assert!(matches!(svc.get_stats(&alice, &inverted), Err(StatsError::InvalidFilter(_))));

    let open = StatsFilterOptions::new(TimeRange::Custom, Resolution::Day, StatMetric::Views);
    assert!(matches!(svc.get_stats(&alice, &open), Err(StatsError::InvalidFilter(_))));

    let huge = StatsFilterOptions::custom(
        NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
        date(3, 1),
        Resolution::Day,
        StatMetric::Views,
    );
    assert!(matches!(svc.get_stats(&alice, &huge), Err(StatsError::InvalidFilter(_))));

    let parsed: Result<StatsFilterOptions, _> =
        serde_json::from_str(r#"{"timeRange":"7d","groupBy":"day","metric":"shares"}"#);
    assert!(parsed.is_err());
}

/// Response JSON uses the camelCase wire names
#[test]
fn test_response_json_shape() {
    let svc = service();
    svc.engine()
        .emit(&EngagementEvent::new("alice", Metric::NewFollower, 2, at(3, 7, 8)))
        .unwrap();
    let response = svc
        .get_stats(&UserId::from("alice"), &StatsFilterOptions::default())
        .unwrap();
    let json = serde_json::to_value(&response).unwrap();

    assert_eq!(json["summary"]["totalFollowers"], 2);
    assert!(json["summary"]["followersGrowth"].is_number());
    assert_eq!(json["summary"]["thisWeek"]["period"], "2024-W10");
    assert_eq!(json["filter"]["timeRange"], "7d");
    assert_eq!(json["filter"]["metric"], "views");
    assert_eq!(json["data"].as_array().unwrap().len(), 7);
}

/// Cumulative sums never go backwards while producers are writing
#[test]
fn test_cumulative_monotone_under_concurrent_writes() {
    let svc = Arc::new(service());
    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = svc.engine().clone();
            thread::spawn(move || {
                for i in 0..500u32 {
                    let instant = at(3, 1 + (i + t) % 7, 12);
                    engine
                        .emit(&EngagementEvent::new("alice", Metric::PostView, 1, instant))
                        .unwrap();
                }
            })
        })
        .collect();

    let filter = StatsFilterOptions::new(TimeRange::Last7Days, Resolution::Day, StatMetric::Views);
    let alice = UserId::from("alice");
    for _ in 0..100 {
        let response = svc.get_stats(&alice, &filter).unwrap();
        let cumulative: Vec<f64> = response.data.iter().filter_map(|p| p.cumulative).collect();
        assert!(cumulative.windows(2).all(|w| w[0] <= w[1]));
        // the series and the totals come from the same instant
        assert_eq!(cumulative.last().copied(), Some(response.summary.total_views as f64));
        assert_eq!(response.summary.this_month.post_views as u64, response.summary.total_views);
    }
    for w in writers {
        w.join().unwrap();
    }

    let response = svc.get_stats(&alice, &filter).unwrap();
    assert_eq!(response.summary.total_views, 2000);
}

proptest! {
    /// Every daily point equals its day bucket and the points sum to the month
    #[test]
    fn prop_series_matches_buckets(days in prop::collection::vec(1u32..31, 1..60)) {
        let svc = service();
        for day in &days {
            svc.engine()
                .emit(&EngagementEvent::new("alice", Metric::Like, 1, at(3, *day, 6)))
                .unwrap();
        }
        let filter = StatsFilterOptions::custom(
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
            Resolution::Day,
            StatMetric::Likes,
        );
        let response = svc.get_stats(&UserId::from("alice"), &filter).unwrap();
        prop_assert_eq!(response.data.len(), 31);
        for point in &response.data {
            let expected = days.iter().filter(|d| **d == point.date.day0() + 1).count() as f64;
            prop_assert_eq!(point.value, expected);
        }
        prop_assert_eq!(response.data.last().and_then(|p| p.cumulative), Some(days.len() as f64));
    }
}
