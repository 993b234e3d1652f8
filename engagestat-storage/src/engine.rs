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

//! Statistics engine
//!
//! Entry point for producers and readers. One `emit` updates the user's
//! running total and the four buckets containing the event, then writes
//! every touched key through to persistence.
//!
//! ## Write path
//! ```text
//! emit(event)
//! ├── hydrate totals + buckets          (no locks held)
//! ├── user gate (shared)
//! │   ├── BucketLedger::record_event    day, week, month, year
//! │   └── CounterStore::apply_in_memory total (clamped at zero)
//! ├── write-through                     total, then day → year, with retries
//! └── late write? → RollupEngine::reverify_chain (user gate exclusive)
//! ```
//!
//! A write is late when its bucket is closed or its period ended more
//! than the grace window before the clock's `now`.
//!
//! In-memory state is never rolled back. When write-through fails the
//! caller gets a retryable error and the key stays pending until
//! [`StatsEngine::repair_pending`] or a later write to it succeeds.
//! Pending keys live in memory only; `repair_pending` also re-derives
//! every stored week, month and year from its children, so a process
//! started after a failure still repairs what the failed one left.
//! Delivery is at-least-once: a duplicated event is counted twice.

use crate::bucket::BucketDelta;
use crate::counter_store::CounterStore;
use crate::file_store::FilePersistence;
use crate::gate::UserGates;
use crate::ledger::BucketLedger;
use crate::persistence::{MemoryPersistence, StatsPersistence};
use crate::rollup::{CloseReport, RollupEngine};
use crate::write_through::{PendingWrite, WriteThrough};
use chrono::{DateTime, Utc};
use engagestat_core::{
    BucketSnapshot, Clock, CounterField, EmitReport, EngagementEvent, EngineConfig, PeriodKey,
    Result, StatsError, StatsNotice, SystemClock, UserId, UserStatsAggregate,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Operational counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCounters {
    pub events: u64,
    pub late_writes: u64,
    pub underflows: u64,
    pub retries: u64,
    pub pending_repairs: u64,
    pub repairs: u64,
}

/// Outcome of [`StatsEngine::repair_pending`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepairReport {
    /// Pending keys retried
    pub attempted: usize,
    /// Keys still pending afterwards
    pub remaining: usize,
    /// Coarse buckets checked against their children
    pub verified: usize,
    /// Coarse buckets rewritten from their children
    pub repaired: usize,
}

/// Totals and buckets for one user, copied at a single point in time
#[derive(Debug, Clone, PartialEq)]
pub struct ReadView {
    pub totals: UserStatsAggregate,
    pub buckets: BTreeMap<PeriodKey, BucketSnapshot>,
}

impl ReadView {
    /// Bucket for `key`; zero-valued when it was not part of the view
    pub fn bucket(&self, key: &PeriodKey) -> BucketSnapshot {
        self.buckets
            .get(key)
            .cloned()
            .unwrap_or_else(|| BucketSnapshot::empty(*key))
    }
}

pub struct StatsEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    store: Arc<WriteThrough>,
    counters: CounterStore,
    ledger: Arc<BucketLedger>,
    rollup: RollupEngine,
    gates: Arc<UserGates>,
    events: AtomicU64,
    late_writes: AtomicU64,
    hydrated: AtomicBool,
}

impl StatsEngine {
    pub fn new(
        config: EngineConfig,
        persistence: Arc<dyn StatsPersistence>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(WriteThrough::new(persistence, config.retry.policy()));
        let ledger = Arc::new(BucketLedger::new(store.clone()));
        let gates = Arc::new(UserGates::new());
        let rollup = RollupEngine::new(ledger.clone(), gates.clone(), config.rollup.grace_window());

        Ok(Self {
            counters: CounterStore::new(store.clone()),
            config,
            clock,
            store,
            ledger,
            rollup,
            gates,
            events: AtomicU64::new(0),
            late_writes: AtomicU64::new(0),
            hydrated: AtomicBool::new(false),
        })
    }

    /// Engine over in-process persistence and the system clock
    pub fn in_memory(config: EngineConfig) -> Result<Self> {
        Self::new(config, Arc::new(MemoryPersistence::new()), Arc::new(SystemClock))
    }

    /// Engine over the file log in `config.storage.data_dir`
    pub fn open(config: EngineConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let persistence = FilePersistence::open(&config.storage.data_dir)?;
        Self::new(config, Arc::new(persistence), clock)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Record one engagement event
    ///
    /// A zero delta is accepted and changes nothing. A negative delta
    /// retracts: buckets take the negative value, the total is decremented
    /// and clamped at zero.
    pub fn emit(&self, event: &EngagementEvent) -> Result<EmitReport> {
        if !event.user_id.is_valid() {
            return Err(StatsError::invalid_event("user id must not be empty"));
        }
        if event.delta == 0 {
            return Ok(EmitReport::default());
        }
        let counter = event.metric.counter_field().map(|f| (f, event.delta));
        self.record(
            &event.user_id,
            counter,
            BucketDelta::for_metric(event.metric, event.delta),
            event.at,
        )
    }

    /// Record a change to an extension metric; buckets only, no total
    pub fn emit_extension(
        &self,
        user: &UserId,
        name: &str,
        delta: i64,
        at: DateTime<Utc>,
    ) -> Result<EmitReport> {
        if !user.is_valid() {
            return Err(StatsError::invalid_event("user id must not be empty"));
        }
        if name.trim().is_empty() {
            return Err(StatsError::invalid_event("extension metric name must not be empty"));
        }
        if delta == 0 {
            return Ok(EmitReport::default());
        }
        self.record(user, None, BucketDelta::Extension(name.to_string(), delta), at)
    }

    fn record(
        &self,
        user: &UserId,
        counter: Option<(CounterField, i64)>,
        delta: BucketDelta,
        at: DateTime<Utc>,
    ) -> Result<EmitReport> {
        let counters = self.counters.entry(user)?;
        let gate = self.gates.gate(user);

        let now = self.clock.now();
        let expired_at = now.checked_sub_signed(self.rollup.grace_window());
        let (update, write, first_moved) = {
            let _shared = gate.read();
            // buckets first: record_event hydrates before applying anything
            let write = self.ledger.record_event_expiring(user, &delta, at, expired_at)?;
            let update = counter.map(|(field, d)| self.counters.apply_in_memory(user, &counters, field, d));
            let first_moved = self.counters.touch(&counters, at, now);
            (update, write, first_moved)
        };
        self.events.fetch_add(1, Ordering::Relaxed);

        let mut report = EmitReport::default();
        if let Some(notice) = update.as_ref().and_then(|u| u.notice.clone()) {
            report.notices.push(notice);
        }
        if !write.late.is_empty() {
            self.late_writes.fetch_add(1, Ordering::Relaxed);
            tracing::info!(user = %user, at = %at, late = write.late.len(), "late write into closed or expired period");
            report
                .notices
                .extend(write.late.iter().map(|period| StatsNotice::LateWriteDetected {
                    user: user.clone(),
                    period: *period,
                }));
        }

        let mut first_error = None;
        if let Some(update) = &update {
            if let Err(e) = self.counters.persist(user, update.field) {
                first_error.get_or_insert(e);
            }
        }
        if first_moved {
            if let Err(e) = self.counters.persist_meta(user) {
                first_error.get_or_insert(e);
            }
        }
        if let Err(e) = self.rollup.propagate(user, &write.keys) {
            first_error.get_or_insert(e);
        }
        if !write.late.is_empty() {
            if let Err(e) = self.rollup.reverify_chain(user, &write.keys) {
                first_error.get_or_insert(e);
            }
        }

        tracing::debug!(user = %user, at = %at, notices = report.notices.len(), "event recorded");
        first_error.map_or(Ok(report), Err)
    }

    /// Signed change to a total that has no bucket counterpart
    /// (posts, following) or a manual correction
    pub fn adjust_total(&self, user: &UserId, field: CounterField, delta: i64) -> Result<EmitReport> {
        if !user.is_valid() {
            return Err(StatsError::invalid_event("user id must not be empty"));
        }
        let mut report = EmitReport::default();
        if delta == 0 {
            return Ok(report);
        }
        let counters = self.counters.entry(user)?;
        let gate = self.gates.gate(user);
        let update = {
            let _shared = gate.read();
            self.counters.apply_in_memory(user, &counters, field, delta)
        };
        report.notices.extend(update.notice);
        self.counters.persist(user, field)?;
        Ok(report)
    }

    pub fn snapshot(&self, user: &UserId) -> Result<UserStatsAggregate> {
        self.counters.snapshot(user)
    }

    pub fn get_bucket(&self, user: &UserId, period: &PeriodKey) -> Result<BucketSnapshot> {
        self.ledger.get_bucket(user, period)
    }

    pub fn close_bucket(&self, user: &UserId, period: &PeriodKey) -> Result<bool> {
        self.ledger.close_bucket(user, period)
    }

    /// Close every period whose grace window has passed, as of the clock
    pub fn close_expired_periods(&self) -> Result<CloseReport> {
        self.close_expired_at(self.clock.now())
    }

    pub fn close_expired_at(&self, now: DateTime<Utc>) -> Result<CloseReport> {
        self.ensure_hydrated()?;
        self.rollup.close_expired(now)
    }

    /// Load every stored bucket once per process
    fn ensure_hydrated(&self) -> Result<()> {
        if !self.hydrated.swap(true, Ordering::AcqRel) {
            if let Err(e) = self.ledger.hydrate_all() {
                self.hydrated.store(false, Ordering::Release);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Recompute a bucket from its children and write it through
    pub fn repair(&self, user: &UserId, period: &PeriodKey) -> Result<BucketSnapshot> {
        self.rollup.repair(user, period)
    }

    /// Retry write-through for every key whose earlier put exhausted
    /// retries, then verify every coarse bucket against its children
    pub fn repair_pending(&self) -> Result<RepairReport> {
        self.ensure_hydrated()?;
        let pending = self.store.pending();
        let attempted = pending.len();
        for key in pending {
            let result = match &key {
                PendingWrite::Counter(user, field) => self.counters.persist(user, *field),
                PendingWrite::Meta(user) => self.counters.persist_meta(user),
                PendingWrite::Bucket(user, period) => self.rollup.repair(user, period).map(|_| ()),
            };
            if let Err(e) = result {
                tracing::warn!(key = %key, error = %e, "pending write still failing");
            }
        }
        let sweep = self.rollup.verify_all();
        let remaining = self.store.pending_len();
        tracing::info!(
            attempted,
            remaining,
            verified = sweep.verified,
            repaired = sweep.repaired,
            "repair pass finished"
        );
        Ok(RepairReport {
            attempted,
            remaining,
            verified: sweep.verified,
            repaired: sweep.repaired,
        })
    }

    /// Consistent copy of a user's totals and the requested buckets
    ///
    /// No event fan-out for the user is in flight while the copy is taken,
    /// so a coarse bucket in the view always equals the sum of its children
    /// in the same view.
    ///
    /// Reading a user nobody has written for leaves no per-user state.
    pub fn read_view(&self, user: &UserId, keys: &[PeriodKey]) -> Result<ReadView> {
        if self.gates.existing(user).is_none() {
            // writers register the gate before touching any state, so if
            // it is still absent after the copy no fan-out overlapped it
            let view = self.copy_view(user, keys)?;
            if self.gates.existing(user).is_none() {
                return Ok(view);
            }
        }
        let gate = self.gates.gate(user);
        let _exclusive = gate.write();
        self.copy_view(user, keys)
    }

    fn copy_view(&self, user: &UserId, keys: &[PeriodKey]) -> Result<ReadView> {
        let totals = self.counters.snapshot(user)?;
        let buckets = keys
            .iter()
            .map(|key| Ok((*key, self.ledger.get_bucket(user, key)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(ReadView { totals, buckets })
    }

    pub fn counters(&self) -> EngineCounters {
        EngineCounters {
            events: self.events.load(Ordering::Relaxed),
            late_writes: self.late_writes.load(Ordering::Relaxed),
            underflows: self.counters.underflows(),
            retries: self.store.retries(),
            pending_repairs: self.store.pending_len() as u64,
            repairs: self.rollup.repairs(),
        }
    }
}
