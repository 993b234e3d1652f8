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

//! Integration tests for the statistics engine

use chrono::{DateTime, Duration, TimeZone, Utc};
use engagestat_core::{
    BucketField, EngagementEvent, EngineConfig, FixedClock, Metric, PeriodKey, Resolution,
    UserId,
};
use engagestat_storage::{FilePersistence, MemoryPersistence, StatsEngine, StatsPersistence};
use proptest::prelude::*;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn at(m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, m, d, h, 0, 0).unwrap()
}

fn engine() -> StatsEngine {
    let clock = Arc::new(FixedClock::new(at(3, 7, 18)));
    StatsEngine::new(EngineConfig::default(), Arc::new(MemoryPersistence::new()), clock).unwrap()
}

fn keys(instant: DateTime<Utc>) -> [PeriodKey; 4] {
    Resolution::ALL.map(|res| PeriodKey::of(instant, res))
}

/// Two days of post views roll up into one week, month and year
#[test]
fn test_post_views_roll_up() {
    let engine = engine();
    let alice = UserId::from("alice");

    engine.emit(&EngagementEvent::new("alice", Metric::PostView, 3, at(3, 1, 10))).unwrap();
    engine.emit(&EngagementEvent::new("alice", Metric::PostView, 2, at(3, 2, 10))).unwrap();

    let [day1, week, month, year] = keys(at(3, 1, 10));
    let day2 = PeriodKey::of(at(3, 2, 10), Resolution::Day);

    assert_eq!(engine.get_bucket(&alice, &day1).unwrap().post_views, 3);
    assert_eq!(engine.get_bucket(&alice, &day2).unwrap().post_views, 2);
    for key in [week, month, year] {
        assert_eq!(engine.get_bucket(&alice, &key).unwrap().post_views, 5, "{key}");
    }
    assert_eq!(engine.snapshot(&alice).unwrap().total_views, 5);
}

/// A week that straddles two months feeds both months
#[test]
fn test_week_straddling_months() {
    let engine = engine();
    let alice = UserId::from("alice");

    // Wed 2024-01-31 and Thu 2024-02-01 share ISO week 2024-W05
    engine.emit(&EngagementEvent::new("alice", Metric::Like, 1, at(1, 31, 12))).unwrap();
    engine.emit(&EngagementEvent::new("alice", Metric::Like, 1, at(2, 1, 12))).unwrap();

    let week = PeriodKey::of(at(1, 31, 12), Resolution::Week);
    assert_eq!(week.to_string(), "2024-W05");
    assert_eq!(engine.get_bucket(&alice, &week).unwrap().likes, 2);

    let jan = PeriodKey::of(at(1, 31, 12), Resolution::Month);
    let feb = PeriodKey::of(at(2, 1, 12), Resolution::Month);
    assert_eq!(engine.get_bucket(&alice, &jan).unwrap().likes, 1);
    assert_eq!(engine.get_bucket(&alice, &feb).unwrap().likes, 1);
}

/// A write into a closed day is accepted, flagged, and rolled up
#[test]
fn test_late_write_after_close() {
    let engine = engine();
    let alice = UserId::from("alice");
    let report = engine.emit(&EngagementEvent::new("alice", Metric::Comment, 1, at(3, 7, 8))).unwrap();
    assert!(!report.late_write());

    let [day, week, month, year] = keys(at(3, 7, 8));
    assert!(engine.close_bucket(&alice, &day).unwrap());

    let report = engine
        .emit(&EngagementEvent::new("alice", Metric::Comment, 1, at(3, 7, 9)))
        .unwrap();
    assert!(report.late_write());
    assert_eq!(report.notices.len(), 1);

    let bucket = engine.get_bucket(&alice, &day).unwrap();
    assert!(bucket.closed);
    assert_eq!(bucket.comments, 2);
    for key in [week, month, year] {
        assert_eq!(engine.get_bucket(&alice, &key).unwrap().comments, 2);
    }
    assert_eq!(engine.counters().late_writes, 1);
}

/// Delivery is at-least-once: the same event twice counts twice
#[test]
fn test_duplicate_event_counts_twice() {
    let engine = engine();
    let alice = UserId::from("alice");
    let event = EngagementEvent::new("alice", Metric::NewSubscriber, 1, at(3, 4, 0));
    engine.emit(&event).unwrap();
    engine.emit(&event).unwrap();
    assert_eq!(engine.snapshot(&alice).unwrap().total_subscribers, 2);
}

/// Concurrent producers for one user lose no updates at any resolution
#[test]
fn test_concurrent_emits() {
    let engine = Arc::new(engine());
    let threads = 8;
    let per_thread = 200;

    let handles: Vec<_> = (0..threads)
        .map(|t| {
            let engine = engine.clone();
            thread::spawn(move || {
                for i in 0..per_thread {
                    // spread over two weeks of March
                    let instant = at(3, 1 + ((t * per_thread + i) % 14) as u32, 12);
                    engine
                        .emit(&EngagementEvent::new("alice", Metric::PostView, 1, instant))
                        .unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let alice = UserId::from("alice");
    let total = (threads * per_thread) as i64;
    let month = PeriodKey::of(at(3, 1, 0), Resolution::Month);
    let year = PeriodKey::of(at(3, 1, 0), Resolution::Year);
    assert_eq!(engine.get_bucket(&alice, &month).unwrap().post_views, total);
    assert_eq!(engine.get_bucket(&alice, &year).unwrap().post_views, total);
    assert_eq!(engine.snapshot(&alice).unwrap().total_views, total as u64);

    let days: i64 = month
        .children()
        .iter()
        .map(|d| engine.get_bucket(&alice, d).unwrap().post_views)
        .sum();
    assert_eq!(days, total);
}

/// Readers never observe a coarse bucket ahead of or behind its days
#[test]
fn test_read_view_is_consistent_under_writes() {
    let engine = Arc::new(engine());
    let alice = UserId::from("alice");
    let month = PeriodKey::of(at(3, 1, 0), Resolution::Month);
    let mut view_keys = month.children();
    view_keys.push(month);

    let writer = {
        let engine = engine.clone();
        thread::spawn(move || {
            for i in 0..2000u32 {
                let instant = at(3, 1 + i % 28, 6);
                engine
                    .emit(&EngagementEvent::new("alice", Metric::Like, 1, instant))
                    .unwrap();
            }
        })
    };

    for _ in 0..200 {
        let view = engine.read_view(&alice, &view_keys).unwrap();
        let days: i64 = month.children().iter().map(|d| view.bucket(d).likes).sum();
        assert_eq!(view.bucket(&month).likes, days);
        assert_eq!(view.totals.total_likes as i64, days);
    }
    writer.join().unwrap();
}

/// State written through to the file log survives a restart
#[test]
fn test_file_persistence_restart() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(FixedClock::new(at(3, 7, 18)));
    let mut config = EngineConfig::default();
    config.storage.data_dir = dir.path().to_path_buf();
    let alice = UserId::from("alice");

    {
        let engine = StatsEngine::open(config.clone(), clock.clone()).unwrap();
        engine.emit(&EngagementEvent::new("alice", Metric::NewFollower, 4, at(3, 5, 9))).unwrap();
        engine.emit_extension(&alice, "shares", 2, at(3, 5, 9)).unwrap();
    }

    let engine = StatsEngine::open(config, clock.clone()).unwrap();
    let totals = engine.snapshot(&alice).unwrap();
    assert_eq!(totals.total_followers, 4);
    assert_eq!(totals.first_event_at, Some(at(3, 5, 9)));

    let week = PeriodKey::of(at(3, 5, 9), Resolution::Week);
    let bucket = engine.get_bucket(&alice, &week).unwrap();
    assert_eq!(bucket.new_followers, 4);
    assert_eq!(bucket.extension.get("shares"), Some(&2));

    // a fresh process still finds the open day and closes it
    clock.advance(Duration::days(1));
    let report = engine.close_expired_periods().unwrap();
    assert_eq!(report.closed, 1);
    drop(engine);

    let persisted = FilePersistence::open(dir.path()).unwrap();
    let day = PeriodKey::of(at(3, 5, 9), Resolution::Day);
    assert!(persisted.get_bucket(&alice, &day).unwrap().unwrap().closed);
}

proptest! {
    /// Final buckets do not depend on the order events arrive in
    #[test]
    fn prop_order_independent(
        events in prop::collection::vec((0usize..6, 1u32..29, -3i64..10), 1..40),
        seed in any::<u64>(),
    ) {
        let make = |evs: &[(usize, u32, i64)]| {
            let engine = engine();
            for (metric, day, delta) in evs {
                let event = EngagementEvent::new("alice", Metric::ALL[*metric], *delta, at(2, *day, 12));
                engine.emit(&event).unwrap();
            }
            engine
        };

        let mut shuffled = events.clone();
        let len = shuffled.len();
        let mut state = seed;
        for i in (1..len).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state >> 33) as usize % (i + 1);
            shuffled.swap(i, j);
        }

        let a = make(&events);
        let b = make(&shuffled);
        let alice = UserId::from("alice");
        let month = PeriodKey::of(at(2, 1, 0), Resolution::Month);
        let mut check = month.children();
        check.push(month);
        check.push(PeriodKey::of(at(2, 1, 0), Resolution::Year));
        for key in check {
            let left = a.get_bucket(&alice, &key).unwrap();
            let right = b.get_bucket(&alice, &key).unwrap();
            prop_assert_eq!(left.fields(), right.fields());
        }

        // the month always equals the sum of its days
        let month_bucket = a.get_bucket(&alice, &month).unwrap();
        for field in BucketField::ALL {
            let days: i64 = month
                .children()
                .iter()
                .map(|d| a.get_bucket(&alice, d).unwrap().get(field))
                .sum();
            prop_assert_eq!(month_bucket.get(field), days);
        }
    }
}
