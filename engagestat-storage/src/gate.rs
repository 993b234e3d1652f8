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

//! Per-user fan-out gate
//!
//! Event fan-out (totals plus four buckets) holds the user's gate shared;
//! read views and repairs hold it exclusive. Writers for different users
//! never contend. Acquire it before any counter gate, never while holding
//! one, and never twice on the same thread.

use dashmap::DashMap;
use engagestat_core::UserId;
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct UserGates {
    gates: DashMap<UserId, Arc<RwLock<()>>, ahash::RandomState>,
}

impl UserGates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self, user: &UserId) -> Arc<RwLock<()>> {
        if let Some(gate) = self.gates.get(user) {
            return gate.value().clone();
        }
        self.gates
            .entry(user.clone())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .value()
            .clone()
    }

    /// Gate for `user` if one was ever handed out; never inserts
    pub fn existing(&self, user: &UserId) -> Option<Arc<RwLock<()>>> {
        self.gates.get(user).map(|gate| gate.value().clone())
    }

    pub fn len(&self) -> usize {
        self.gates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }
}
