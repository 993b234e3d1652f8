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

//! Identifiers and metric vocabularies
//!
//! Three related enumerations:
//! - [`Metric`]: what a producer emits (one engagement event kind)
//! - [`CounterField`]: a running total kept per user
//! - [`BucketField`]: a per-period accumulator inside a bucket
//!
//! plus [`StatMetric`], the selector a query uses to pick a series.

use crate::error::StatsError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// User identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    /// Create a user id, rejecting empty or whitespace-only ids
    pub fn new(id: impl Into<String>) -> Result<Self, StatsError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(StatsError::invalid_event("user id must not be empty"));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        !self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ============================================================================
// Producer metrics
// ============================================================================

/// Engagement event kind emitted by producers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Metric {
    PostView,
    ProfileView,
    NewFollower,
    NewSubscriber,
    Like,
    Comment,
}

impl Metric {
    pub const ALL: [Metric; 6] = [
        Metric::PostView,
        Metric::ProfileView,
        Metric::NewFollower,
        Metric::NewSubscriber,
        Metric::Like,
        Metric::Comment,
    ];

    /// Running total affected by this metric, if any
    pub fn counter_field(self) -> Option<CounterField> {
        match self {
            Metric::PostView => Some(CounterField::Views),
            Metric::ProfileView => None,
            Metric::NewFollower => Some(CounterField::Followers),
            Metric::NewSubscriber => Some(CounterField::Subscribers),
            Metric::Like => Some(CounterField::Likes),
            Metric::Comment => Some(CounterField::Comments),
        }
    }

    /// Bucket accumulator fed by this metric
    pub fn bucket_field(self) -> BucketField {
        match self {
            Metric::PostView => BucketField::PostViews,
            Metric::ProfileView => BucketField::ProfileViews,
            Metric::NewFollower => BucketField::NewFollowers,
            Metric::NewSubscriber => BucketField::NewSubscribers,
            Metric::Like => BucketField::Likes,
            Metric::Comment => BucketField::Comments,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Metric::PostView => "postView",
            Metric::ProfileView => "profileView",
            Metric::NewFollower => "newFollower",
            Metric::NewSubscriber => "newSubscriber",
            Metric::Like => "like",
            Metric::Comment => "comment",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| StatsError::invalid_event(format!("unknown metric '{s}'")))
    }
}

// ============================================================================
// Running totals
// ============================================================================

/// Running total tracked per user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CounterField {
    Posts,
    Followers,
    Following,
    Subscribers,
    Likes,
    Comments,
    Views,
}

impl CounterField {
    pub const COUNT: usize = 7;

    pub const ALL: [CounterField; Self::COUNT] = [
        CounterField::Posts,
        CounterField::Followers,
        CounterField::Following,
        CounterField::Subscribers,
        CounterField::Likes,
        CounterField::Comments,
        CounterField::Views,
    ];

    /// Slot index into fixed-size counter arrays
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CounterField::Posts => "posts",
            CounterField::Followers => "followers",
            CounterField::Following => "following",
            CounterField::Subscribers => "subscribers",
            CounterField::Likes => "likes",
            CounterField::Comments => "comments",
            CounterField::Views => "views",
        }
    }
}

impl fmt::Display for CounterField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CounterField {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CounterField::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| StatsError::invalid_event(format!("unknown counter field '{s}'")))
    }
}

// ============================================================================
// Bucket accumulators
// ============================================================================

/// Numeric accumulator inside a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BucketField {
    PostViews,
    ProfileViews,
    NewFollowers,
    NewSubscribers,
    Likes,
    Comments,
}

impl BucketField {
    pub const COUNT: usize = 6;

    pub const ALL: [BucketField; Self::COUNT] = [
        BucketField::PostViews,
        BucketField::ProfileViews,
        BucketField::NewFollowers,
        BucketField::NewSubscribers,
        BucketField::Likes,
        BucketField::Comments,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }
}

// ============================================================================
// Query selector
// ============================================================================

/// Series selector accepted by queries
///
/// Wire spellings: `views`, `profileViews`, `likes`, `comments`, `followers`,
/// `subscribers`, `engagement`, and `ext:<name>` for extension metrics.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum StatMetric {
    Views,
    ProfileViews,
    Likes,
    Comments,
    Followers,
    Subscribers,
    /// Derived engagement rate (percent), not a count
    Engagement,
    Extension(String),
}

impl StatMetric {
    /// Whether the series is a count whose running sum is meaningful
    pub fn is_count(&self) -> bool {
        !matches!(self, StatMetric::Engagement)
    }

    /// Bucket accumulator backing this selector, if it is a plain field
    pub fn bucket_field(&self) -> Option<BucketField> {
        match self {
            StatMetric::Views => Some(BucketField::PostViews),
            StatMetric::ProfileViews => Some(BucketField::ProfileViews),
            StatMetric::Likes => Some(BucketField::Likes),
            StatMetric::Comments => Some(BucketField::Comments),
            StatMetric::Followers => Some(BucketField::NewFollowers),
            StatMetric::Subscribers => Some(BucketField::NewSubscribers),
            StatMetric::Engagement | StatMetric::Extension(_) => None,
        }
    }
}

impl fmt::Display for StatMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatMetric::Views => f.write_str("views"),
            StatMetric::ProfileViews => f.write_str("profileViews"),
            StatMetric::Likes => f.write_str("likes"),
            StatMetric::Comments => f.write_str("comments"),
            StatMetric::Followers => f.write_str("followers"),
            StatMetric::Subscribers => f.write_str("subscribers"),
            StatMetric::Engagement => f.write_str("engagement"),
            StatMetric::Extension(name) => write!(f, "ext:{name}"),
        }
    }
}

impl FromStr for StatMetric {
    type Err = StatsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "views" => Ok(StatMetric::Views),
            "profileViews" => Ok(StatMetric::ProfileViews),
            "likes" => Ok(StatMetric::Likes),
            "comments" => Ok(StatMetric::Comments),
            "followers" => Ok(StatMetric::Followers),
            "subscribers" => Ok(StatMetric::Subscribers),
            "engagement" => Ok(StatMetric::Engagement),
            other => match other.strip_prefix("ext:") {
                Some(name) if !name.is_empty() => Ok(StatMetric::Extension(name.to_string())),
                _ => Err(StatsError::invalid_filter(format!("unsupported metric '{other}'"))),
            },
        }
    }
}

impl TryFrom<String> for StatMetric {
    type Error = StatsError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<StatMetric> for String {
    fn from(m: StatMetric) -> Self {
        m.to_string()
    }
}
