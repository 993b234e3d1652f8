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

//! Engine configuration
//!
//! Loaded with priority: environment > TOML file > defaults.
//!
//! ```toml
//! [rollup]
//! grace_window_secs = 3600
//!
//! [retry]
//! max_attempts = 3
//! initial_delay_ms = 1
//! max_delay_ms = 25
//!
//! [query]
//! max_series_points = 3700
//!
//! [storage]
//! data_dir = "./engagestat-data"
//! ```

use crate::error::{Result, StatsError};
use crate::resilience::RetryPolicy;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub rollup: RollupConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupConfig {
    /// How long after a period ends it still counts as open
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            grace_window_secs: default_grace_window_secs(),
        }
    }
}

/// Longest accepted grace window (ten years)
pub const MAX_GRACE_WINDOW_SECS: u64 = 10 * 366 * 86_400;

impl RollupConfig {
    /// Grace window as a duration; saturates for out-of-range values
    pub fn grace_window(&self) -> Duration {
        i64::try_from(self.grace_window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
            jitter: default_jitter(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_delay: StdDuration::from_millis(self.initial_delay_ms),
            max_delay: StdDuration::from_millis(self.max_delay_ms),
            multiplier: self.multiplier,
            jitter: self.jitter,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Upper bound on points in one response series
    #[serde(default = "default_max_series_points")]
    pub max_series_points: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            max_series_points: default_max_series_points(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for the file-backed persistence log
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

// Default values
fn default_grace_window_secs() -> u64 {
    3600
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1
}

fn default_max_delay_ms() -> u64 {
    25
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_jitter() -> f64 {
    0.1
}

fn default_max_series_points() -> usize {
    3700
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./engagestat-data")
}

impl EngineConfig {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load configuration with priority: env > file > defaults
    ///
    /// Supported environment variables:
    /// - ENGAGESTAT_GRACE_WINDOW_SECS: late-write grace window (default: 3600)
    /// - ENGAGESTAT_RETRY_MAX_ATTEMPTS: write-through attempts (default: 3)
    /// - ENGAGESTAT_MAX_SERIES_POINTS: series length cap (default: 3700)
    /// - ENGAGESTAT_DATA_DIR: persistence directory (default: ./engagestat-data)
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let config = match config_file {
            Some(path) if path.exists() => {
                tracing::info!("Loading configuration from file: {:?}", path);
                Self::from_file(path)?
            }
            Some(path) => {
                tracing::warn!("Config file not found: {:?}, using defaults", path);
                Self::default()
            }
            None => Self::default(),
        };

        let config = config.merge_with_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Override fields from environment-style lookups; unparsable values are ignored
    pub fn merge_with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("ENGAGESTAT_GRACE_WINDOW_SECS").and_then(|v| v.parse().ok()) {
            self.rollup.grace_window_secs = val;
        }
        if let Some(val) = lookup("ENGAGESTAT_RETRY_MAX_ATTEMPTS").and_then(|v| v.parse().ok()) {
            self.retry.max_attempts = val;
        }
        if let Some(val) = lookup("ENGAGESTAT_MAX_SERIES_POINTS").and_then(|v| v.parse().ok()) {
            self.query.max_series_points = val;
        }
        if let Some(dir) = lookup("ENGAGESTAT_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.rollup.grace_window_secs > MAX_GRACE_WINDOW_SECS {
            return Err(StatsError::Config(format!(
                "rollup.grace_window_secs must be at most {MAX_GRACE_WINDOW_SECS}"
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(StatsError::Config("retry.max_attempts must be at least 1".into()));
        }
        if !self.retry.multiplier.is_finite() || self.retry.multiplier < 1.0 {
            return Err(StatsError::Config("retry.multiplier must be >= 1.0".into()));
        }
        if !(0.0..=1.0).contains(&self.retry.jitter) {
            return Err(StatsError::Config("retry.jitter must be within 0.0..=1.0".into()));
        }
        if self.query.max_series_points == 0 {
            return Err(StatsError::Config("query.max_series_points must be at least 1".into()));
        }
        Ok(())
    }
}
