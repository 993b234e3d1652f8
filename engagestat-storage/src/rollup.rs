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

//! Rollup maintenance
//!
//! Deltas are propagated eagerly: the ledger applies every event to all
//! four resolutions, so a coarse bucket always equals the sum of its
//! children. This module keeps that true across failures:
//!
//! - write-through of the touched chain, finest first, with retries
//! - re-verification of week/month/year after a late write
//! - repair of a coarse bucket from its children
//! - a sweep re-deriving every coarse bucket the ledger knows of
//! - closing periods once their grace window has passed
//!
//! Weeks are checked against their days (a week can straddle a month or
//! year boundary); months against days; years against months.

use crate::gate::UserGates;
use crate::ledger::BucketLedger;
use chrono::{DateTime, Duration, Utc};
use engagestat_core::{sum_buckets, BucketSnapshot, PeriodKey, Resolution, Result, StatsError, UserId};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of one verification sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub verified: usize,
    pub repaired: usize,
    pub failed: usize,
}

/// Outcome of one close sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CloseReport {
    pub closed: usize,
    pub repaired: usize,
}

pub struct RollupEngine {
    ledger: Arc<BucketLedger>,
    gates: Arc<UserGates>,
    grace: Duration,
    repairs: AtomicU64,
}

impl RollupEngine {
    pub fn new(ledger: Arc<BucketLedger>, gates: Arc<UserGates>, grace: Duration) -> Self {
        Self {
            ledger,
            gates,
            grace,
            repairs: AtomicU64::new(0),
        }
    }

    pub fn grace_window(&self) -> Duration {
        self.grace
    }

    /// Write the buckets touched by one event through, finest first
    ///
    /// Every key is attempted even after a failure. The first failure is
    /// returned: `PersistenceUnavailable` for the day bucket,
    /// `PropagationFailure` for a coarser one.
    pub fn propagate(&self, user: &UserId, keys: &[PeriodKey]) -> Result<()> {
        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.ledger.persist(user, key) {
                let err = if key.resolution() == Resolution::Day {
                    StatsError::PersistenceUnavailable(format!(
                        "{user}/{key} after {} attempts: {}",
                        e.attempts, e.error
                    ))
                } else {
                    StatsError::PropagationFailure {
                        key: format!("{user}/{key}"),
                        attempts: e.attempts,
                        reason: e.error.to_string(),
                    }
                };
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Check the coarse buckets above a late write, repairing mismatches
    ///
    /// Returns the number of repaired buckets.
    pub fn reverify_chain(&self, user: &UserId, keys: &[PeriodKey]) -> Result<usize> {
        let gate = self.gates.gate(user);
        let _exclusive = gate.write();
        let mut repaired = 0;
        for key in keys.iter().filter(|k| k.resolution() != Resolution::Day) {
            if self.verify_locked(user, key)? {
                repaired += 1;
            }
        }
        Ok(repaired)
    }

    /// Compare one coarse bucket with the sum of its children; repair on mismatch
    pub fn verify(&self, user: &UserId, period: &PeriodKey) -> Result<bool> {
        let gate = self.gates.gate(user);
        let _exclusive = gate.write();
        self.verify_locked(user, period)
    }

    fn verify_locked(&self, user: &UserId, period: &PeriodKey) -> Result<bool> {
        if period.resolution() == Resolution::Day {
            return Ok(false);
        }
        let current = self.ledger.get_bucket(user, period)?;
        let expected = self.children_sum(user, period)?;
        if current.same_counts(&expected) {
            return Ok(false);
        }
        tracing::warn!(
            user = %user,
            period = %period,
            stored = ?current.fields(),
            expected = ?expected.fields(),
            "rollup mismatch, repairing from children"
        );
        self.apply_repair(user, &expected)?;
        Ok(true)
    }

    fn children_sum(&self, user: &UserId, period: &PeriodKey) -> Result<BucketSnapshot> {
        let children = period
            .children()
            .iter()
            .map(|child| self.ledger.get_bucket(user, child))
            .collect::<Result<Vec<_>>>()?;
        Ok(sum_buckets(*period, &children))
    }

    fn apply_repair(&self, user: &UserId, expected: &BucketSnapshot) -> Result<()> {
        self.ledger.overwrite(user, expected)?;
        self.repairs.fetch_add(1, Ordering::Relaxed);
        self.propagate(user, &[expected.period])
    }

    /// Recompute a bucket as the sum of its children and write it through
    ///
    /// Day buckets have no children; they are only written through again.
    pub fn repair(&self, user: &UserId, period: &PeriodKey) -> Result<BucketSnapshot> {
        let gate = self.gates.gate(user);
        let _exclusive = gate.write();
        if period.resolution() != Resolution::Day {
            let expected = self.children_sum(user, period)?;
            self.apply_repair(user, &expected)?;
        } else {
            self.propagate(user, &[*period])?;
        }
        self.ledger.get_bucket(user, period)
    }

    /// Verify every coarse bucket above a bucket held by the ledger
    ///
    /// Covers coarse keys that were never stored, e.g. a month whose write
    /// failed in an earlier process. Weeks and months go before years, so
    /// a year is checked against already repaired months. Failures are
    /// logged and counted; the sweep continues.
    pub fn verify_all(&self) -> SweepReport {
        let mut coarse = BTreeSet::new();
        for (user, period) in self.ledger.keys() {
            let start = period.start();
            let above: &[Resolution] = match period.resolution() {
                Resolution::Day => &[Resolution::Week, Resolution::Month, Resolution::Year],
                Resolution::Month => &[Resolution::Year],
                Resolution::Week | Resolution::Year => &[],
            };
            if period.resolution() != Resolution::Day {
                coarse.insert((period, user.clone()));
            }
            for res in above {
                coarse.insert((PeriodKey::of(start, *res), user.clone()));
            }
        }

        let mut report = SweepReport::default();
        for (period, user) in coarse {
            report.verified += 1;
            match self.verify(&user, &period) {
                Ok(true) => report.repaired += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(user = %user, period = %period, error = %e, "rollup verification failed");
                }
            }
        }
        if report.repaired > 0 || report.failed > 0 {
            tracing::info!(
                verified = report.verified,
                repaired = report.repaired,
                failed = report.failed,
                "rollup sweep finished"
            );
        }
        report
    }

    /// Close every open bucket whose period ended more than the grace
    /// window before `now`
    ///
    /// Coarse buckets are verified against their children first. Buckets
    /// that fail to persist stay pending and the sweep continues.
    pub fn close_expired(&self, now: DateTime<Utc>) -> Result<CloseReport> {
        let mut report = CloseReport::default();
        let Some(cutoff) = now.checked_sub_signed(self.grace) else {
            // grace reaches past the start of the calendar: nothing has expired
            return Ok(report);
        };
        let mut first_error = None;

        for (user, period) in self.ledger.open_ended_before(cutoff) {
            {
                let gate = self.gates.gate(&user);
                let _exclusive = gate.write();
                match self.verify_locked(&user, &period) {
                    Ok(true) => report.repaired += 1,
                    Ok(false) => {}
                    Err(e) => {
                        first_error.get_or_insert(e);
                    }
                }
            }
            match self.ledger.close_bucket(&user, &period) {
                Ok(true) => report.closed += 1,
                Ok(false) => {}
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        if report.closed > 0 {
            tracing::info!(closed = report.closed, repaired = report.repaired, %cutoff, "closed expired periods");
        }
        first_error.map_or(Ok(report), Err)
    }

    /// Number of buckets rewritten from their children since start
    pub fn repairs(&self) -> u64 {
        self.repairs.load(Ordering::Relaxed)
    }
}
