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

//! Atomic period bucket
//!
//! Fixed accumulators are `AtomicI64` (signed so retractions can be
//! recorded as negative deltas). Extension metrics live behind a
//! fine-grained `RwLock`.

use engagestat_core::{BucketField, BucketSnapshot, Metric, PeriodKey};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// One change to a bucket
#[derive(Debug, Clone, PartialEq)]
pub enum BucketDelta {
    Field(BucketField, i64),
    Extension(String, i64),
}

impl BucketDelta {
    pub fn for_metric(metric: Metric, delta: i64) -> Self {
        BucketDelta::Field(metric.bucket_field(), delta)
    }
}

#[derive(Debug)]
pub struct AtomicBucket {
    period: PeriodKey,
    fields: [AtomicI64; BucketField::COUNT],
    extension: RwLock<BTreeMap<String, i64>>,
    closed: AtomicBool,
    late_writes: AtomicU64,
    /// Serializes write-through so puts land in value order
    pub(crate) persist_lock: Mutex<()>,
}

impl AtomicBucket {
    pub fn new(period: PeriodKey) -> Self {
        Self::from_snapshot(&BucketSnapshot::empty(period))
    }

    pub fn from_snapshot(snapshot: &BucketSnapshot) -> Self {
        Self {
            period: snapshot.period,
            fields: snapshot.fields().map(AtomicI64::new),
            extension: RwLock::new(snapshot.extension.clone()),
            closed: AtomicBool::new(snapshot.closed),
            late_writes: AtomicU64::new(snapshot.late_writes),
            persist_lock: Mutex::new(()),
        }
    }

    pub fn period(&self) -> PeriodKey {
        self.period
    }

    /// Apply a delta; returns true if the bucket was already closed
    #[inline]
    pub fn apply(&self, delta: &BucketDelta) -> bool {
        match delta {
            BucketDelta::Field(field, value) => {
                self.fields[field.index()].fetch_add(*value, Ordering::AcqRel);
            }
            BucketDelta::Extension(name, value) => {
                let mut extension = self.extension.write();
                *extension.entry(name.clone()).or_insert(0) += *value;
            }
        }
        if self.closed.load(Ordering::Acquire) {
            self.late_writes.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Mark closed; returns true only for the call that closed it
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::AcqRel)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Count a write that landed after the period expired but before the
    /// close sweep reached it
    pub fn note_late_write(&self) {
        self.late_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn late_writes(&self) -> u64 {
        self.late_writes.load(Ordering::Relaxed)
    }

    /// Replace the counts with those of `source`, keeping lifecycle flags
    ///
    /// Only safe while no writer can touch this bucket.
    pub(crate) fn overwrite_counts(&self, source: &BucketSnapshot) {
        for field in BucketField::ALL {
            self.fields[field.index()].store(source.get(field), Ordering::Release);
        }
        *self.extension.write() = source.extension.clone();
    }

    pub fn snapshot(&self) -> BucketSnapshot {
        let fields = std::array::from_fn(|i| self.fields[i].load(Ordering::Acquire));
        let mut snapshot =
            BucketSnapshot::from_fields(self.period, fields, self.extension.read().clone());
        snapshot.closed = self.is_closed();
        snapshot.late_writes = self.late_writes();
        snapshot
    }
}
