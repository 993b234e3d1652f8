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

//! Engagestat Query
//!
//! Read side of the statistics engine: growth between adjacent periods and
//! the `getStats` response assembled from one consistent read view.

pub mod growth;
pub mod response;
pub mod service;

pub use growth::{percent_change, GrowthCalculator, GrowthMetric};
pub use response::{DataPoint, StatsResponse, UserStatsSummary};
pub use service::QueryService;
