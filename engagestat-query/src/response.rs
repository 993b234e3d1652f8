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

//! Wire shape of a `getStats` answer (camelCase JSON)

use crate::growth::GrowthMetric;
use chrono::NaiveDate;
use engagestat_core::{BucketSnapshot, StatsFilterOptions};
use serde::Serialize;

/// One point of the requested series
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataPoint {
    /// First day of the period
    pub date: NaiveDate,
    pub value: f64,
    pub label: String,
    /// Running sum of `value`; absent for rate metrics
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cumulative: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatsSummary {
    pub total_posts: u64,
    pub total_followers: u64,
    pub total_following: u64,
    pub total_subscribers: u64,
    pub total_likes: u64,
    pub total_comments: u64,
    pub total_views: u64,
    pub engagement_rate: f64,
    pub followers_growth: f64,
    pub views_growth: f64,
    pub engagement_growth: f64,
    /// Requested metric at day, week, month and year
    pub growth: Vec<GrowthMetric>,
    pub today: BucketSnapshot,
    pub this_week: BucketSnapshot,
    pub this_month: BucketSnapshot,
    pub this_year: BucketSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    pub summary: UserStatsSummary,
    pub data: Vec<DataPoint>,
    /// Filter as actually applied: dates filled in, range normalized
    pub filter: StatsFilterOptions,
}
