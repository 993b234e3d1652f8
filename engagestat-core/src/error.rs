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

//! Engine error types
//!
//! Only conditions the caller must act on are errors. Counter underflows and
//! late writes are recorded as [`crate::StatsNotice`]s instead.

use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, StatsError>;

/// Errors surfaced by the statistics engine
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StatsError {
    /// Query filter rejected before any state was read
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// Event rejected before any state was touched
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// Write-through of a coarser bucket failed after all retries.
    /// In-memory state already holds the delta; the key awaits repair.
    #[error("Rollup propagation to {key} failed after {attempts} attempts: {reason}")]
    PropagationFailure {
        key: String,
        attempts: u32,
        reason: String,
    },

    /// Persistence collaborator failed; safe to retry
    #[error("Persistence unavailable: {0}")]
    PersistenceUnavailable(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StatsError {
    /// Whether the failure is transient; the in-memory state already holds
    /// the change and the failed keys wait for `StatsEngine::repair_pending`
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StatsError::PropagationFailure { .. } | StatsError::PersistenceUnavailable(_)
        )
    }

    pub fn invalid_filter(msg: impl Into<String>) -> Self {
        StatsError::InvalidFilter(msg.into())
    }

    pub fn invalid_event(msg: impl Into<String>) -> Self {
        StatsError::InvalidEvent(msg.into())
    }
}

impl From<toml::de::Error> for StatsError {
    fn from(e: toml::de::Error) -> Self {
        StatsError::Config(e.to_string())
    }
}

impl From<std::io::Error> for StatsError {
    fn from(e: std::io::Error) -> Self {
        StatsError::Config(e.to_string())
    }
}
