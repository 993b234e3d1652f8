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

//! Stats query service
//!
//! ```text
//! get_stats(user, filter)
//! ├── resolve filter against clock.now()      (InvalidFilter, no state touched)
//! ├── read_view(series keys ∪ current/previous keys at every resolution)
//! └── series + summary from that single view
//! ```
//!
//! Everything in one response comes from one read view, so the series and
//! the summary agree with each other and with a single instant of the
//! engine's state.

use crate::growth::{GrowthCalculator, GrowthMetric};
use crate::response::{DataPoint, StatsResponse, UserStatsSummary};
use chrono::{DateTime, Utc};
use engagestat_core::{
    PeriodKey, Resolution, Result, StatMetric, StatsError, StatsFilterOptions, UserId,
};
use engagestat_storage::{ReadView, StatsEngine};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct QueryService {
    engine: Arc<StatsEngine>,
    growth: GrowthCalculator,
}

impl QueryService {
    pub fn new(engine: Arc<StatsEngine>) -> Self {
        Self {
            growth: GrowthCalculator::new(engine.clone()),
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<StatsEngine> {
        &self.engine
    }

    pub fn growth(&self, user: &UserId, metric: &StatMetric, resolution: Resolution) -> Result<GrowthMetric> {
        self.growth.growth(user, metric, resolution)
    }

    /// Answer a stats query for one user
    pub fn get_stats(&self, user: &UserId, filter: &StatsFilterOptions) -> Result<StatsResponse> {
        self.get_stats_at(user, filter, self.engine.clock().now())
    }

    /// Answer a stats query as of `now`
    pub fn get_stats_at(
        &self,
        user: &UserId,
        filter: &StatsFilterOptions,
        now: DateTime<Utc>,
    ) -> Result<StatsResponse> {
        if !user.is_valid() {
            return Err(StatsError::invalid_filter("user id must not be empty"));
        }
        let first_event = self.engine.snapshot(user)?.first_event_at;
        let resolved = filter.resolve(now, first_event, self.engine.config().query.max_series_points)?;

        let current = Resolution::ALL.map(|res| PeriodKey::of(now, res));
        let mut keys: BTreeSet<PeriodKey> = resolved.periods.iter().copied().collect();
        for key in current {
            keys.insert(key);
            keys.insert(key.prev());
        }
        let keys: Vec<PeriodKey> = keys.into_iter().collect();
        let view = self.engine.read_view(user, &keys)?;

        let metric = &resolved.options.metric;
        let data = series(&view, &resolved.periods, metric);
        let summary = summarize(&view, metric, resolved.options.group_by, current);

        tracing::debug!(
            user = %user,
            range = %resolved.options.time_range,
            group_by = %resolved.options.group_by,
            metric = %metric,
            points = data.len(),
            "stats query"
        );

        Ok(StatsResponse {
            summary,
            data,
            filter: resolved.options,
        })
    }
}

fn series(view: &ReadView, periods: &[PeriodKey], metric: &StatMetric) -> Vec<DataPoint> {
    let mut running = 0.0;
    periods
        .iter()
        .map(|period| {
            let value = view.bucket(period).value_of(metric);
            let cumulative = metric.is_count().then(|| {
                running += value;
                running
            });
            DataPoint {
                date: period.first_day(),
                value,
                label: period.label(),
                cumulative,
            }
        })
        .collect()
}

fn summarize(
    view: &ReadView,
    metric: &StatMetric,
    group_by: Resolution,
    current: [PeriodKey; 4],
) -> UserStatsSummary {
    let [day, week, month, year] = current;
    let at_group = current
        .into_iter()
        .find(|key| key.resolution() == group_by)
        .unwrap_or(day);
    let growth_of = |m: &StatMetric| GrowthCalculator::from_view(view, m, at_group).percent_change;
    let totals = &view.totals;

    UserStatsSummary {
        total_posts: totals.total_posts,
        total_followers: totals.total_followers,
        total_following: totals.total_following,
        total_subscribers: totals.total_subscribers,
        total_likes: totals.total_likes,
        total_comments: totals.total_comments,
        total_views: totals.total_views,
        engagement_rate: totals.engagement_rate(),
        followers_growth: growth_of(&StatMetric::Followers),
        views_growth: growth_of(&StatMetric::Views),
        engagement_growth: growth_of(&StatMetric::Engagement),
        growth: current
            .iter()
            .map(|key| GrowthCalculator::from_view(view, metric, *key))
            .collect(),
        today: view.bucket(&day),
        this_week: view.bucket(&week),
        this_month: view.bucket(&month),
        this_year: view.bucket(&year),
    }
}
