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

//! Per-user running totals
//!
//! ```text
//! CounterStore
//! └── DashMap<UserId, Arc<UserCounters>>
//!     ├── values[7]        AtomicU64, CAS updates, clamp at zero
//!     ├── first/last event AtomicI64 millis
//!     └── gate             RwLock<()>: writers shared, snapshot exclusive
//! ```
//!
//! Entries hydrate from the persistence collaborator on first touch and
//! every change is written through as an absolute value.

use crate::write_through::{PendingWrite, WriteThrough};
use crate::persistence::UserMeta;
use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use engagestat_core::{CounterField, Result, StatsError, StatsNotice, UserId, UserStatsAggregate};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

const NO_FIRST_EVENT: i64 = i64::MAX;
const NO_LAST_UPDATE: i64 = i64::MIN;

/// Atomic totals for one user
#[derive(Debug)]
pub(crate) struct UserCounters {
    values: [AtomicU64; CounterField::COUNT],
    first_event_ms: AtomicI64,
    last_updated_ms: AtomicI64,
    gate: RwLock<()>,
    persist_lock: Mutex<()>,
}

impl UserCounters {
    fn new(values: [u64; CounterField::COUNT], meta: Option<UserMeta>) -> Self {
        let first = meta
            .and_then(|m| m.first_event_at)
            .map(|t| t.timestamp_millis())
            .unwrap_or(NO_FIRST_EVENT);
        Self {
            values: values.map(AtomicU64::new),
            first_event_ms: AtomicI64::new(first),
            last_updated_ms: AtomicI64::new(NO_LAST_UPDATE),
            gate: RwLock::new(()),
            persist_lock: Mutex::new(()),
        }
    }

    /// CAS update of one slot; returns (previous, new)
    #[inline]
    fn update<F>(&self, field: CounterField, f: F) -> (u64, u64)
    where
        F: Fn(u64) -> u64,
    {
        let slot = &self.values[field.index()];
        let mut current = slot.load(Ordering::Acquire);
        loop {
            let next = f(current);
            match slot.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
                Ok(_) => return (current, next),
                Err(c) => current = c,
            }
        }
    }

    fn first_event_at(&self) -> Option<DateTime<Utc>> {
        from_millis(self.first_event_ms.load(Ordering::Acquire), NO_FIRST_EVENT)
    }

    fn last_updated(&self) -> Option<DateTime<Utc>> {
        from_millis(self.last_updated_ms.load(Ordering::Acquire), NO_LAST_UPDATE)
    }
}

fn from_millis(ms: i64, sentinel: i64) -> Option<DateTime<Utc>> {
    if ms == sentinel {
        None
    } else {
        Utc.timestamp_millis_opt(ms).single()
    }
}

/// Result of one counter change
#[derive(Debug, Clone, PartialEq)]
pub struct CounterUpdate {
    pub field: CounterField,
    pub previous: u64,
    pub value: u64,
    /// Set when a decrement was clamped at zero
    pub notice: Option<StatsNotice>,
}

pub struct CounterStore {
    users: DashMap<UserId, Arc<UserCounters>, ahash::RandomState>,
    store: Arc<WriteThrough>,
    underflows: AtomicU64,
}

impl CounterStore {
    pub fn new(store: Arc<WriteThrough>) -> Self {
        Self {
            users: DashMap::with_hasher(ahash::RandomState::new()),
            store,
            underflows: AtomicU64::new(0),
        }
    }

    /// Load a user's persisted totals, `None` if nothing was ever stored
    fn load(&self, user: &UserId) -> Result<Option<UserCounters>> {
        let mut values = [0u64; CounterField::COUNT];
        let mut found = false;
        for field in CounterField::ALL {
            let key = format!("{user}/total/{field}");
            if let Some(v) = self.store.read(&key, |p| p.get_counter(user, field))? {
                values[field.index()] = v;
                found = true;
            }
        }
        let meta = self.store.read(&format!("{user}/meta"), |p| p.get_user_meta(user))?;
        if !found && meta.is_none() {
            return Ok(None);
        }
        Ok(Some(UserCounters::new(values, meta)))
    }

    /// Existing entry, hydrated from persistence if needed
    ///
    /// Persistence is read before touching the map so no shard lock is held
    /// across I/O; a concurrent hydrator that wins the insert is kept.
    fn lookup(&self, user: &UserId) -> Result<Option<Arc<UserCounters>>> {
        if let Some(entry) = self.users.get(user) {
            return Ok(Some(entry.value().clone()));
        }
        match self.load(user)? {
            Some(loaded) => Ok(Some(
                self.users
                    .entry(user.clone())
                    .or_insert_with(|| Arc::new(loaded))
                    .value()
                    .clone(),
            )),
            None => Ok(None),
        }
    }

    pub(crate) fn entry(&self, user: &UserId) -> Result<Arc<UserCounters>> {
        if let Some(existing) = self.lookup(user)? {
            return Ok(existing);
        }
        Ok(self
            .users
            .entry(user.clone())
            .or_insert_with(|| Arc::new(UserCounters::new([0; CounterField::COUNT], None)))
            .value()
            .clone())
    }

    /// Apply a signed change in memory only
    ///
    /// Negative deltas clamp at zero and raise a `CounterUnderflow` notice.
    pub(crate) fn apply_in_memory(
        &self,
        user: &UserId,
        counters: &UserCounters,
        field: CounterField,
        delta: i64,
    ) -> CounterUpdate {
        let _shared = counters.gate.read();
        if delta >= 0 {
            let (previous, value) = counters.update(field, |c| c.saturating_add(delta as u64));
            return CounterUpdate {
                field,
                previous,
                value,
                notice: None,
            };
        }

        let requested = delta.unsigned_abs();
        let (previous, value) = counters.update(field, |c| c.saturating_sub(requested));
        let notice = if previous < requested {
            self.underflows.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                user = %user,
                field = %field,
                requested,
                available = previous,
                "counter decrement clamped at zero"
            );
            Some(StatsNotice::CounterUnderflow {
                user: user.clone(),
                field,
                requested,
                available: previous,
            })
        } else {
            None
        };
        CounterUpdate {
            field,
            previous,
            value,
            notice,
        }
    }

    /// Track event time bounds; returns true when the first-event time moved
    pub(crate) fn touch(&self, counters: &UserCounters, at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let at_ms = at.timestamp_millis();
        counters.last_updated_ms.fetch_max(now.timestamp_millis(), Ordering::AcqRel);
        let previous = counters.first_event_ms.fetch_min(at_ms, Ordering::AcqRel);
        at_ms < previous
    }

    /// Write the current in-memory value of one total through to persistence
    pub fn persist(&self, user: &UserId, field: CounterField) -> Result<()> {
        let counters = self.entry(user)?;
        let _guard = counters.persist_lock.lock();
        // read under the persist lock so the last put carries the latest value
        let value = counters.values[field.index()].load(Ordering::Acquire);
        self.store
            .put(PendingWrite::Counter(user.clone(), field), |p| {
                p.put_counter(user, field, value)
            })
            .map_err(|e| {
                StatsError::PersistenceUnavailable(format!(
                    "{user}/total/{field} after {} attempts: {}",
                    e.attempts, e.error
                ))
            })
    }

    pub fn persist_meta(&self, user: &UserId) -> Result<()> {
        let counters = self.entry(user)?;
        let _guard = counters.persist_lock.lock();
        let meta = UserMeta {
            first_event_at: counters.first_event_at(),
        };
        self.store
            .put(PendingWrite::Meta(user.clone()), |p| p.put_user_meta(user, &meta))
            .map_err(|e| {
                StatsError::PersistenceUnavailable(format!(
                    "{user}/meta after {} attempts: {}",
                    e.attempts, e.error
                ))
            })
    }

    /// Add `delta` to a total and write it through
    pub fn increment(&self, user: &UserId, field: CounterField, delta: u64) -> Result<CounterUpdate> {
        let delta = i64::try_from(delta)
            .map_err(|_| StatsError::invalid_event("increment delta out of range"))?;
        self.adjust(user, field, delta)
    }

    /// Subtract `delta` from a total, clamping at zero, and write it through
    pub fn decrement(&self, user: &UserId, field: CounterField, delta: u64) -> Result<CounterUpdate> {
        let delta = i64::try_from(delta)
            .map_err(|_| StatsError::invalid_event("decrement delta out of range"))?;
        self.adjust(user, field, -delta)
    }

    /// Signed change to a total, written through
    pub fn adjust(&self, user: &UserId, field: CounterField, delta: i64) -> Result<CounterUpdate> {
        if !user.is_valid() {
            return Err(StatsError::invalid_event("user id must not be empty"));
        }
        let counters = self.entry(user)?;
        let update = self.apply_in_memory(user, &counters, field, delta);
        if delta != 0 {
            self.persist(user, field)?;
        }
        Ok(update)
    }

    pub fn get(&self, user: &UserId, field: CounterField) -> Result<u64> {
        Ok(self
            .lookup(user)?
            .map(|c| c.values[field.index()].load(Ordering::Acquire))
            .unwrap_or(0))
    }

    /// Copy of all totals, taken while no writer is mid-update
    pub fn snapshot(&self, user: &UserId) -> Result<UserStatsAggregate> {
        let Some(counters) = self.lookup(user)? else {
            return Ok(UserStatsAggregate::default());
        };
        let _exclusive = counters.gate.write();
        let mut aggregate = UserStatsAggregate {
            first_event_at: counters.first_event_at(),
            last_updated: counters.last_updated(),
            ..Default::default()
        };
        for field in CounterField::ALL {
            aggregate.set(field, counters.values[field.index()].load(Ordering::Acquire));
        }
        Ok(aggregate)
    }

    pub fn first_event_at(&self, user: &UserId) -> Result<Option<DateTime<Utc>>> {
        Ok(self.lookup(user)?.and_then(|c| c.first_event_at()))
    }

    /// Number of clamped decrements since start
    pub fn underflows(&self) -> u64 {
        self.underflows.load(Ordering::Relaxed)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }
}
