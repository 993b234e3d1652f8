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

//! Bucket ledger
//!
//! Keyed by `(user, period)`, one [`AtomicBucket`] per key. Every event
//! fans out to its day, week, month and year bucket; each bucket update is
//! atomic on its own.

use crate::bucket::{AtomicBucket, BucketDelta};
use crate::write_through::{PendingWrite, WriteThrough};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use engagestat_core::{
    BucketSnapshot, PeriodKey, Resolution, Result, RetryExhausted, StatsError, UserId,
};
use crate::persistence::PersistenceError;
use std::sync::Arc;

/// Bucket key: (user, period)
pub type BucketKey = (UserId, PeriodKey);

/// Keys touched by one event, finest first
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerWrite {
    pub keys: [PeriodKey; 4],
    /// Keys whose bucket was closed, or whose period had expired, when
    /// the delta landed
    pub late: Vec<PeriodKey>,
}

pub struct BucketLedger {
    buckets: DashMap<BucketKey, Arc<AtomicBucket>, ahash::RandomState>,
    store: Arc<WriteThrough>,
}

impl BucketLedger {
    pub fn new(store: Arc<WriteThrough>) -> Self {
        Self {
            buckets: DashMap::with_hasher(ahash::RandomState::new()),
            store,
        }
    }

    /// Existing bucket from memory or persistence; never creates one
    pub fn lookup(&self, user: &UserId, period: &PeriodKey) -> Result<Option<Arc<AtomicBucket>>> {
        let key = (user.clone(), *period);
        if let Some(bucket) = self.buckets.get(&key) {
            return Ok(Some(bucket.value().clone()));
        }
        let persisted = self
            .store
            .read(&format!("{user}/{period}"), |p| p.get_bucket(user, period))?;
        Ok(persisted.map(|snapshot| {
            self.buckets
                .entry(key)
                .or_insert_with(|| Arc::new(AtomicBucket::from_snapshot(&snapshot)))
                .value()
                .clone()
        }))
    }

    /// Bucket for `(user, period)`, created empty when absent
    pub fn bucket(&self, user: &UserId, period: &PeriodKey) -> Result<Arc<AtomicBucket>> {
        if let Some(bucket) = self.lookup(user, period)? {
            return Ok(bucket);
        }
        Ok(self
            .buckets
            .entry((user.clone(), *period))
            .or_insert_with(|| Arc::new(AtomicBucket::new(*period)))
            .value()
            .clone())
    }

    /// Apply `delta` to one bucket in memory; returns true on a late write
    pub fn apply(&self, user: &UserId, period: &PeriodKey, delta: &BucketDelta) -> Result<bool> {
        Ok(self.bucket(user, period)?.apply(delta))
    }

    /// Apply `delta` to the bucket of every resolution containing `at`
    ///
    /// In-memory only; the caller writes the touched keys through.
    pub fn record_event(
        &self,
        user: &UserId,
        delta: &BucketDelta,
        at: DateTime<Utc>,
    ) -> Result<LedgerWrite> {
        self.record_event_expiring(user, delta, at, None)
    }

    /// [`record_event`](Self::record_event), also treating as late any
    /// still-open bucket whose period ended at or before `expired_at`
    pub fn record_event_expiring(
        &self,
        user: &UserId,
        delta: &BucketDelta,
        at: DateTime<Utc>,
        expired_at: Option<DateTime<Utc>>,
    ) -> Result<LedgerWrite> {
        // hydrate all four first so a read failure leaves no partial fan-out
        let keys = Resolution::ALL.map(|res| PeriodKey::of(at, res));
        let buckets = keys
            .iter()
            .map(|key| self.bucket(user, key))
            .collect::<Result<Vec<_>>>()?;

        let mut late = Vec::new();
        for bucket in &buckets {
            let period = bucket.period();
            if bucket.apply(delta) {
                late.push(period);
            } else if expired_at.is_some_and(|cutoff| period.end() <= cutoff) {
                bucket.note_late_write();
                late.push(period);
            }
        }
        Ok(LedgerWrite { keys, late })
    }

    /// Point-in-time copy; a zero bucket when nothing was recorded
    pub fn get_bucket(&self, user: &UserId, period: &PeriodKey) -> Result<BucketSnapshot> {
        Ok(self
            .lookup(user, period)?
            .map(|b| b.snapshot())
            .unwrap_or_else(|| BucketSnapshot::empty(*period)))
    }

    /// Mark a bucket closed and write it through; idempotent
    ///
    /// Returns true only when this call closed it.
    pub fn close_bucket(&self, user: &UserId, period: &PeriodKey) -> Result<bool> {
        let bucket = self.bucket(user, period)?;
        let newly_closed = bucket.close();
        if newly_closed {
            tracing::debug!(user = %user, period = %period, "closed bucket");
            self.persist(user, period).map_err(|e| {
                StatsError::PersistenceUnavailable(format!(
                    "{user}/{period} after {} attempts: {}",
                    e.attempts, e.error
                ))
            })?;
        }
        Ok(newly_closed)
    }

    /// Replace a bucket's counts, e.g. with the sum of its children
    pub(crate) fn overwrite(&self, user: &UserId, snapshot: &BucketSnapshot) -> Result<()> {
        self.bucket(user, &snapshot.period)?.overwrite_counts(snapshot);
        Ok(())
    }

    /// Write the current in-memory bucket through to persistence
    pub fn persist(
        &self,
        user: &UserId,
        period: &PeriodKey,
    ) -> std::result::Result<(), RetryExhausted<PersistenceError>> {
        let Some(bucket) = self.buckets.get(&(user.clone(), *period)).map(|b| b.value().clone())
        else {
            return Ok(());
        };
        let _guard = bucket.persist_lock.lock();
        let snapshot = bucket.snapshot();
        self.store
            .put(PendingWrite::Bucket(user.clone(), *period), |p| {
                p.put_bucket(user, &snapshot)
            })
    }

    /// Load every persisted bucket into memory
    ///
    /// Lets a fresh process find periods an earlier one left open.
    pub fn hydrate_all(&self) -> Result<usize> {
        let keys = self.store.read("bucket keys", |p| p.bucket_keys())?;
        let count = keys.len();
        for (user, period) in keys {
            self.lookup(&user, &period)?;
        }
        Ok(count)
    }

    /// Open buckets whose period ended at or before `cutoff`, finest first
    pub fn open_ended_before(&self, cutoff: DateTime<Utc>) -> Vec<BucketKey> {
        let mut keys: Vec<BucketKey> = self
            .buckets
            .iter()
            .filter(|e| !e.value().is_closed() && e.key().1.end() <= cutoff)
            .map(|e| e.key().clone())
            .collect();
        keys.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        keys
    }

    /// Every key held in memory, unordered
    pub fn keys(&self) -> Vec<BucketKey> {
        self.buckets.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
