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

//! Persistence collaborator interface
//!
//! The engine keeps its working state in memory and writes every change
//! through to a [`StatsPersistence`] implementation. The collaborator only
//! has to make single-key gets and puts atomic and durable; it never sees
//! deltas, only absolute values, so a retried put is idempotent.
//!
//! Keys:
//! - `(user, counter field)` → running total
//! - `(user, period key)` → bucket snapshot
//! - `user` → [`UserMeta`] (first event time)

use dashmap::DashMap;
use engagestat_core::{BucketSnapshot, CounterField, PeriodKey, StatsError, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by a persistence collaborator
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<PersistenceError> for StatsError {
    fn from(e: PersistenceError) -> Self {
        StatsError::PersistenceUnavailable(e.to_string())
    }
}

/// Per-user metadata kept alongside the totals
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMeta {
    pub first_event_at: Option<DateTime<Utc>>,
}

/// Single-key atomic store for totals and buckets
pub trait StatsPersistence: Send + Sync {
    fn get_counter(&self, user: &UserId, field: CounterField)
        -> Result<Option<u64>, PersistenceError>;

    fn put_counter(
        &self,
        user: &UserId,
        field: CounterField,
        value: u64,
    ) -> Result<(), PersistenceError>;

    fn get_bucket(
        &self,
        user: &UserId,
        period: &PeriodKey,
    ) -> Result<Option<BucketSnapshot>, PersistenceError>;

    fn put_bucket(&self, user: &UserId, bucket: &BucketSnapshot) -> Result<(), PersistenceError>;

    /// Every stored bucket key, used to find periods left open by an
    /// earlier process
    fn bucket_keys(&self) -> Result<Vec<(UserId, PeriodKey)>, PersistenceError>;

    fn get_user_meta(&self, user: &UserId) -> Result<Option<UserMeta>, PersistenceError>;

    fn put_user_meta(&self, user: &UserId, meta: &UserMeta) -> Result<(), PersistenceError>;
}

/// In-process persistence backed by concurrent maps
///
/// Also serves as the index behind [`crate::FilePersistence`].
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    counters: DashMap<(UserId, CounterField), u64, ahash::RandomState>,
    buckets: DashMap<(UserId, PeriodKey), BucketSnapshot, ahash::RandomState>,
    meta: DashMap<UserId, UserMeta, ahash::RandomState>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Copy every stored record, for compaction and inspection
    pub fn records(&self) -> Vec<StoredRecord> {
        let mut out = Vec::with_capacity(self.counters.len() + self.buckets.len() + self.meta.len());
        out.extend(self.meta.iter().map(|e| StoredRecord::Meta {
            user: e.key().clone(),
            meta: e.value().clone(),
        }));
        out.extend(self.counters.iter().map(|e| StoredRecord::Counter {
            user: e.key().0.clone(),
            field: e.key().1,
            value: *e.value(),
        }));
        out.extend(self.buckets.iter().map(|e| StoredRecord::Bucket {
            user: e.key().0.clone(),
            bucket: e.value().clone(),
        }));
        out
    }

    pub(crate) fn apply(&self, record: StoredRecord) {
        match record {
            StoredRecord::Counter { user, field, value } => {
                self.counters.insert((user, field), value);
            }
            StoredRecord::Bucket { user, bucket } => {
                self.buckets.insert((user, bucket.period), bucket);
            }
            StoredRecord::Meta { user, meta } => {
                self.meta.insert(user, meta);
            }
        }
    }
}

impl StatsPersistence for MemoryPersistence {
    fn get_counter(
        &self,
        user: &UserId,
        field: CounterField,
    ) -> Result<Option<u64>, PersistenceError> {
        Ok(self.counters.get(&(user.clone(), field)).map(|v| *v))
    }

    fn put_counter(
        &self,
        user: &UserId,
        field: CounterField,
        value: u64,
    ) -> Result<(), PersistenceError> {
        self.counters.insert((user.clone(), field), value);
        Ok(())
    }

    fn get_bucket(
        &self,
        user: &UserId,
        period: &PeriodKey,
    ) -> Result<Option<BucketSnapshot>, PersistenceError> {
        Ok(self.buckets.get(&(user.clone(), *period)).map(|b| b.clone()))
    }

    fn put_bucket(&self, user: &UserId, bucket: &BucketSnapshot) -> Result<(), PersistenceError> {
        self.buckets
            .insert((user.clone(), bucket.period), bucket.clone());
        Ok(())
    }

    fn bucket_keys(&self) -> Result<Vec<(UserId, PeriodKey)>, PersistenceError> {
        Ok(self.buckets.iter().map(|e| e.key().clone()).collect())
    }

    fn get_user_meta(&self, user: &UserId) -> Result<Option<UserMeta>, PersistenceError> {
        Ok(self.meta.get(user).map(|m| m.clone()))
    }

    fn put_user_meta(&self, user: &UserId, meta: &UserMeta) -> Result<(), PersistenceError> {
        self.meta.insert(user.clone(), meta.clone());
        Ok(())
    }
}

/// One persisted key/value pair, as written to the file log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StoredRecord {
    Counter {
        user: UserId,
        field: CounterField,
        value: u64,
    },
    Bucket {
        user: UserId,
        bucket: BucketSnapshot,
    },
    Meta {
        user: UserId,
        meta: UserMeta,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use engagestat_core::Resolution;

    #[test]
    fn test_memory_round_trip() {
        let store = MemoryPersistence::new();
        let alice = UserId::from("alice");

        assert_eq!(store.get_counter(&alice, CounterField::Views).unwrap(), None);
        store.put_counter(&alice, CounterField::Views, 42).unwrap();
        assert_eq!(store.get_counter(&alice, CounterField::Views).unwrap(), Some(42));

        let period = PeriodKey::of(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(), Resolution::Week);
        let mut bucket = BucketSnapshot::empty(period);
        bucket.post_views = 5;
        store.put_bucket(&alice, &bucket).unwrap();
        assert_eq!(store.get_bucket(&alice, &period).unwrap(), Some(bucket));
        assert_eq!(store.bucket_count(), 1);
        assert_eq!(store.records().len(), 2);
    }

    #[test]
    fn test_persistence_error_maps_to_retryable() {
        let err: StatsError = PersistenceError::Unavailable("disk full".into()).into();
        assert!(err.is_retryable());
        assert!(matches!(err, StatsError::PersistenceUnavailable(_)));
    }
}
