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

//! Engagestat Storage
//!
//! Concurrent in-memory aggregation with write-through persistence:
//! - [`CounterStore`]: per-user running totals
//! - [`BucketLedger`]: per-period buckets at day/week/month/year
//! - [`RollupEngine`]: chain write-through, verification, repair, closing
//! - [`StatsEngine`]: the facade producers and readers use

pub mod bucket;
pub mod counter_store;
pub mod engine;
pub mod file_store;
pub mod gate;
pub mod ledger;
pub mod persistence;
pub mod rollup;
pub mod write_through;

pub use bucket::{AtomicBucket, BucketDelta};
pub use counter_store::{CounterStore, CounterUpdate};
pub use engine::{EngineCounters, ReadView, RepairReport, StatsEngine};
pub use file_store::FilePersistence;
pub use gate::UserGates;
pub use ledger::{BucketKey, BucketLedger, LedgerWrite};
pub use persistence::{MemoryPersistence, PersistenceError, StatsPersistence, StoredRecord, UserMeta};
pub use rollup::{CloseReport, RollupEngine, SweepReport};
pub use write_through::{PendingWrite, WriteThrough};
