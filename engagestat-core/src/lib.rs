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

//! Engagestat Core
//!
//! Plain data records and pure functions shared by the storage and query
//! layers: identifiers, period keys, filters, errors and configuration.

pub mod clock;
pub mod config;
pub mod error;
pub mod filter;
pub mod metric;
pub mod period;
pub mod resilience;
pub mod stats;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{
    EngineConfig, QueryConfig, RetryConfig, RollupConfig, StorageConfig, MAX_GRACE_WINDOW_SECS,
};
pub use error::{Result, StatsError};
pub use filter::{ResolvedFilter, StatsFilterOptions, TimeRange};
pub use metric::{BucketField, CounterField, Metric, StatMetric, UserId};
pub use period::{PeriodKey, Resolution};
pub use resilience::{RetryExhausted, RetryPolicy};
pub use stats::{
    engagement_rate, sum_buckets, BucketSnapshot, EmitReport, EngagementEvent, StatsNotice,
    UserStatsAggregate,
};
