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

//! Plain data records exchanged between the engine, its persistence
//! collaborator and query consumers.

use crate::metric::{BucketField, CounterField, Metric, StatMetric, UserId};
use crate::period::PeriodKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One engagement event from a producer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngagementEvent {
    pub user_id: UserId,
    pub metric: Metric,
    #[serde(default = "default_delta")]
    pub delta: i64,
    pub at: DateTime<Utc>,
}

fn default_delta() -> i64 {
    1
}

impl EngagementEvent {
    pub fn new(user_id: impl Into<UserId>, metric: Metric, delta: i64, at: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            metric,
            delta,
            at,
        }
    }
}

// ============================================================================
// Running totals
// ============================================================================

/// Current totals for one user
///
/// Every counter is non-negative; decrements clamp at zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatsAggregate {
    pub total_posts: u64,
    pub total_followers: u64,
    pub total_following: u64,
    pub total_subscribers: u64,
    pub total_likes: u64,
    pub total_comments: u64,
    pub total_views: u64,
    /// First event seen for this user (earliest event timestamp)
    pub first_event_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

impl UserStatsAggregate {
    pub fn get(&self, field: CounterField) -> u64 {
        match field {
            CounterField::Posts => self.total_posts,
            CounterField::Followers => self.total_followers,
            CounterField::Following => self.total_following,
            CounterField::Subscribers => self.total_subscribers,
            CounterField::Likes => self.total_likes,
            CounterField::Comments => self.total_comments,
            CounterField::Views => self.total_views,
        }
    }

    pub fn set(&mut self, field: CounterField, value: u64) {
        let slot = match field {
            CounterField::Posts => &mut self.total_posts,
            CounterField::Followers => &mut self.total_followers,
            CounterField::Following => &mut self.total_following,
            CounterField::Subscribers => &mut self.total_subscribers,
            CounterField::Likes => &mut self.total_likes,
            CounterField::Comments => &mut self.total_comments,
            CounterField::Views => &mut self.total_views,
        };
        *slot = value;
    }

    /// (likes + comments) / views as a percentage
    pub fn engagement_rate(&self) -> f64 {
        engagement_rate(
            (self.total_likes + self.total_comments) as f64,
            self.total_views as f64,
        )
    }
}

/// Interactions per view as a percentage; zero when there are no views
pub fn engagement_rate(interactions: f64, views: f64) -> f64 {
    if views <= 0.0 {
        0.0
    } else {
        (interactions / views) * 100.0
    }
}

// ============================================================================
// Buckets
// ============================================================================

/// Point-in-time copy of one bucket
///
/// `engagement_rate` is derived from the counts and recomputed by every
/// constructor; it is never mutated on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketSnapshot {
    pub period: PeriodKey,
    pub post_views: i64,
    pub profile_views: i64,
    pub new_followers: i64,
    pub new_subscribers: i64,
    pub likes: i64,
    pub comments: i64,
    pub engagement_rate: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extension: BTreeMap<String, i64>,
    #[serde(default)]
    pub closed: bool,
    #[serde(default)]
    pub late_writes: u64,
}

impl BucketSnapshot {
    /// Zero-valued bucket for a period with no recorded events
    pub fn empty(period: PeriodKey) -> Self {
        Self {
            period,
            post_views: 0,
            profile_views: 0,
            new_followers: 0,
            new_subscribers: 0,
            likes: 0,
            comments: 0,
            engagement_rate: 0.0,
            extension: BTreeMap::new(),
            closed: false,
            late_writes: 0,
        }
    }

    /// Build from field values laid out in [`BucketField::ALL`] order
    pub fn from_fields(
        period: PeriodKey,
        fields: [i64; BucketField::COUNT],
        extension: BTreeMap<String, i64>,
    ) -> Self {
        let mut snapshot = Self::empty(period);
        for field in BucketField::ALL {
            snapshot.set(field, fields[field.index()]);
        }
        snapshot.extension = extension;
        snapshot.refresh_derived();
        snapshot
    }

    pub fn get(&self, field: BucketField) -> i64 {
        match field {
            BucketField::PostViews => self.post_views,
            BucketField::ProfileViews => self.profile_views,
            BucketField::NewFollowers => self.new_followers,
            BucketField::NewSubscribers => self.new_subscribers,
            BucketField::Likes => self.likes,
            BucketField::Comments => self.comments,
        }
    }

    fn set(&mut self, field: BucketField, value: i64) {
        let slot = match field {
            BucketField::PostViews => &mut self.post_views,
            BucketField::ProfileViews => &mut self.profile_views,
            BucketField::NewFollowers => &mut self.new_followers,
            BucketField::NewSubscribers => &mut self.new_subscribers,
            BucketField::Likes => &mut self.likes,
            BucketField::Comments => &mut self.comments,
        };
        *slot = value;
    }

    /// Field values in [`BucketField::ALL`] order
    pub fn fields(&self) -> [i64; BucketField::COUNT] {
        BucketField::ALL.map(|f| self.get(f))
    }

    /// Recompute derived values after the counts changed
    pub fn refresh_derived(&mut self) {
        self.engagement_rate =
            engagement_rate((self.likes + self.comments) as f64, self.post_views as f64);
    }

    /// Whether this bucket's counts equal `other`'s (ignores lifecycle flags)
    pub fn same_counts(&self, other: &BucketSnapshot) -> bool {
        self.fields() == other.fields() && self.extension == other.extension
    }

    /// Value selected by a query metric
    pub fn value_of(&self, metric: &StatMetric) -> f64 {
        match metric {
            StatMetric::Engagement => self.engagement_rate,
            StatMetric::Extension(name) => self.extension.get(name).copied().unwrap_or(0) as f64,
            other => other.bucket_field().map(|f| self.get(f)).unwrap_or(0) as f64,
        }
    }
}

/// Sum a set of child buckets into a bucket for `period`
///
/// Extension entries merge by per-name sum.
pub fn sum_buckets<'a>(
    period: PeriodKey,
    children: impl IntoIterator<Item = &'a BucketSnapshot>,
) -> BucketSnapshot {
    let mut fields = [0i64; BucketField::COUNT];
    let mut extension: BTreeMap<String, i64> = BTreeMap::new();
    for child in children {
        for (slot, value) in fields.iter_mut().zip(child.fields()) {
            *slot += value;
        }
        for (name, value) in &child.extension {
            *extension.entry(name.clone()).or_insert(0) += value;
        }
    }
    BucketSnapshot::from_fields(period, fields, extension)
}

// ============================================================================
// Notices
// ============================================================================

/// Non-fatal condition observed while applying a write
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StatsNotice {
    /// A decrement would have taken a total below zero and was clamped
    CounterUnderflow {
        user: UserId,
        field: CounterField,
        requested: u64,
        available: u64,
    },
    /// The event landed in a period whose bucket was closed or whose grace window had passed
    LateWriteDetected { user: UserId, period: PeriodKey },
}

/// Outcome of one accepted write
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmitReport {
    pub notices: Vec<StatsNotice>,
}

impl EmitReport {
    pub fn late_write(&self) -> bool {
        self.notices
            .iter()
            .any(|n| matches!(n, StatsNotice::LateWriteDetected { .. }))
    }

    pub fn underflow(&self) -> bool {
        self.notices
            .iter()
            .any(|n| matches!(n, StatsNotice::CounterUnderflow { .. }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::Resolution;
    use chrono::TimeZone;

    fn day(d: u32) -> PeriodKey {
        PeriodKey::of(Utc.with_ymd_and_hms(2024, 3, d, 0, 0, 0).unwrap(), Resolution::Day)
    }

    #[test]
    fn test_engagement_rate_is_derived() {
        let mut fields = [0i64; BucketField::COUNT];
        fields[BucketField::PostViews.index()] = 200;
        fields[BucketField::Likes.index()] = 30;
        fields[BucketField::Comments.index()] = 10;
        let bucket = BucketSnapshot::from_fields(day(1), fields, BTreeMap::new());
        assert!((bucket.engagement_rate - 20.0).abs() < f64::EPSILON);
        assert_eq!(BucketSnapshot::empty(day(1)).engagement_rate, 0.0);
    }

    #[test]
    fn test_sum_buckets_merges_extensions() {
        let mut a = BucketSnapshot::empty(day(1));
        a.post_views = 3;
        a.extension.insert("shares".into(), 2);
        let mut b = BucketSnapshot::empty(day(2));
        b.post_views = 2;
        b.extension.insert("shares".into(), 5);
        b.extension.insert("saves".into(), 1);

        let week = PeriodKey::of(day(1).start(), Resolution::Week);
        let sum = sum_buckets(week, [&a, &b]);
        assert_eq!(sum.post_views, 5);
        assert_eq!(sum.extension.get("shares"), Some(&7));
        assert_eq!(sum.extension.get("saves"), Some(&1));
        assert_eq!(sum.period, week);
    }

    #[test]
    fn test_value_of() {
        let mut bucket = BucketSnapshot::empty(day(1));
        bucket.new_followers = 4;
        bucket.extension.insert("shares".into(), 9);
        assert_eq!(bucket.value_of(&StatMetric::Followers), 4.0);
        assert_eq!(bucket.value_of(&StatMetric::Extension("shares".into())), 9.0);
        assert_eq!(bucket.value_of(&StatMetric::Extension("missing".into())), 0.0);
    }

    #[test]
    fn test_aggregate_accessors() {
        let mut agg = UserStatsAggregate::default();
        for (i, field) in CounterField::ALL.iter().enumerate() {
            agg.set(*field, i as u64 * 10);
        }
        for (i, field) in CounterField::ALL.iter().enumerate() {
            assert_eq!(agg.get(*field), i as u64 * 10);
        }
    }

    #[test]
    fn test_event_json_shape() {
        let json = r#"{"userId":"alice","metric":"postView","at":"2024-03-01T10:00:00Z"}"#;
        let event: EngagementEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.user_id.as_str(), "alice");
        assert_eq!(event.delta, 1);
        assert_eq!(event.metric, Metric::PostView);
    }
}
