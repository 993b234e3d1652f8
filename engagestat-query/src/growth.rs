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

//! Period-over-period growth
//!
//! Growth compares the bucket of the current period with the bucket of the
//! period immediately before it at the same resolution.

use engagestat_core::{PeriodKey, Resolution, Result, StatMetric, StatsError, UserId};
use engagestat_storage::{ReadView, StatsEngine};
use serde::Serialize;
use std::sync::Arc;

/// Change of one metric between two adjacent periods
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrowthMetric {
    pub resolution: Resolution,
    pub metric: StatMetric,
    pub current_period: PeriodKey,
    pub current: f64,
    pub previous: f64,
    pub percent_change: f64,
}

/// Percent change from `previous` to `current`
///
/// A zero baseline yields +100 for new activity, -100 for a net retraction
/// and 0 when both are zero. A negative baseline divides by its magnitude
/// so the sign follows the direction of movement.
pub fn percent_change(current: f64, previous: f64) -> f64 {
    if previous == 0.0 {
        return if current > 0.0 {
            100.0
        } else if current < 0.0 {
            -100.0
        } else {
            0.0
        };
    }
    (current - previous) / previous.abs() * 100.0
}

pub struct GrowthCalculator {
    engine: Arc<StatsEngine>,
}

impl GrowthCalculator {
    pub fn new(engine: Arc<StatsEngine>) -> Self {
        Self { engine }
    }

    /// Growth of `metric` for the period containing "now" at `resolution`
    pub fn growth(&self, user: &UserId, metric: &StatMetric, resolution: Resolution) -> Result<GrowthMetric> {
        if !user.is_valid() {
            return Err(StatsError::invalid_filter("user id must not be empty"));
        }
        let current = PeriodKey::of(self.engine.clock().now(), resolution);
        let view = self.engine.read_view(user, &[current.prev(), current])?;
        Ok(Self::from_view(&view, metric, current))
    }

    /// Growth computed from buckets already copied into `view`
    ///
    /// Periods missing from the view count as zero.
    pub fn from_view(view: &ReadView, metric: &StatMetric, current: PeriodKey) -> GrowthMetric {
        let now = view.bucket(&current).value_of(metric);
        let before = view.bucket(&current.prev()).value_of(metric);
        GrowthMetric {
            resolution: current.resolution(),
            metric: metric.clone(),
            current_period: current,
            current: now,
            previous: before,
            percent_change: percent_change(now, before),
        }
    }
}
