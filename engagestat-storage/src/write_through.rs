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

//! Retrying access to the persistence collaborator
//!
//! Every put goes through [`WriteThrough::put`]. A key whose put exhausts
//! its retries is remembered as pending until a later put for the same key
//! succeeds (either the next write to it or an explicit repair pass).

use crate::persistence::{PersistenceError, StatsPersistence};
use dashmap::DashSet;
use engagestat_core::{CounterField, PeriodKey, RetryExhausted, RetryPolicy, StatsError, UserId};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Persistence key whose in-memory value has not reached the store
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PendingWrite {
    Counter(UserId, CounterField),
    Bucket(UserId, PeriodKey),
    Meta(UserId),
}

impl PendingWrite {
    pub fn user(&self) -> &UserId {
        match self {
            PendingWrite::Counter(user, _) | PendingWrite::Bucket(user, _) | PendingWrite::Meta(user) => {
                user
            }
        }
    }
}

impl fmt::Display for PendingWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingWrite::Counter(user, field) => write!(f, "{user}/total/{field}"),
            PendingWrite::Bucket(user, period) => write!(f, "{user}/{period}"),
            PendingWrite::Meta(user) => write!(f, "{user}/meta"),
        }
    }
}

pub struct WriteThrough {
    persistence: Arc<dyn StatsPersistence>,
    retry: RetryPolicy,
    pending: DashSet<PendingWrite, ahash::RandomState>,
    retries: AtomicU64,
}

impl WriteThrough {
    pub fn new(persistence: Arc<dyn StatsPersistence>, retry: RetryPolicy) -> Self {
        Self {
            persistence,
            retry,
            pending: DashSet::with_hasher(ahash::RandomState::new()),
            retries: AtomicU64::new(0),
        }
    }

    pub fn persistence(&self) -> &dyn StatsPersistence {
        self.persistence.as_ref()
    }

    /// Run a read against the store with retries
    pub fn read<T, F>(&self, what: &str, mut op: F) -> Result<T, StatsError>
    where
        F: FnMut(&dyn StatsPersistence) -> Result<T, PersistenceError>,
    {
        let store = self.persistence.as_ref();
        self.retry
            .run(|attempt| {
                if attempt > 0 {
                    self.retries.fetch_add(1, Ordering::Relaxed);
                }
                op(store)
            })
            .map_err(|e| {
                StatsError::PersistenceUnavailable(format!(
                    "read of {what} failed after {} attempts: {}",
                    e.attempts, e.error
                ))
            })
    }

    /// Run a put with retries, tracking `key` as pending on exhaustion
    pub fn put<F>(&self, key: PendingWrite, mut op: F) -> Result<(), RetryExhausted<PersistenceError>>
    where
        F: FnMut(&dyn StatsPersistence) -> Result<(), PersistenceError>,
    {
        let store = self.persistence.as_ref();
        let result = self.retry.run(|attempt| {
            if attempt > 0 {
                self.retries.fetch_add(1, Ordering::Relaxed);
            }
            op(store)
        });
        match &result {
            Ok(()) => {
                self.pending.remove(&key);
            }
            Err(e) => {
                tracing::error!(key = %key, attempts = e.attempts, error = %e.error, "write-through exhausted retries");
                self.pending.insert(key);
            }
        }
        result
    }

    /// Pending keys in a stable order
    pub fn pending(&self) -> Vec<PendingWrite> {
        let mut keys: Vec<PendingWrite> = self.pending.iter().map(|k| k.clone()).collect();
        keys.sort();
        keys
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryPersistence;

    #[test]
    fn test_exhausted_put_is_pending_until_success() {
        let store = WriteThrough::new(Arc::new(MemoryPersistence::new()), RetryPolicy::immediate(2));
        let key = PendingWrite::Meta(UserId::from("alice"));

        let err = store
            .put(key.clone(), |_| Err(PersistenceError::Unavailable("down".into())))
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert_eq!(store.pending(), vec![key.clone()]);
        assert_eq!(store.retries(), 1);

        store.put(key, |_| Ok(())).unwrap();
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_read_maps_to_persistence_unavailable() {
        let store = WriteThrough::new(Arc::new(MemoryPersistence::new()), RetryPolicy::immediate(1));
        let err = store
            .read("alice/views", |_| Err::<(), _>(PersistenceError::Unavailable("down".into())))
            .unwrap_err();
        assert!(matches!(err, StatsError::PersistenceUnavailable(_)));
    }
}
