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

//! `engagestat` command line
//!
//! Drives the statistics engine over the file-backed store in a data
//! directory: ingest JSON-lines events, query stats, close expired periods
//! and retry pending write-through.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use engagestat_core::{
    Clock, CounterField, EngagementEvent, EngineConfig, FixedClock, Resolution, StatMetric,
    StatsFilterOptions, SystemClock, TimeRange, UserId,
};
use engagestat_query::QueryService;
use engagestat_storage::StatsEngine;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about = "Engagement statistics engine", long_about = None)]
struct Cli {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory path (overrides config file)
    #[arg(long, global = true, env = "ENGAGESTAT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply events from a JSON-lines file
    Ingest {
        /// One `{"userId","metric","delta","at"}` object per line
        #[arg(long)]
        events: PathBuf,
    },
    /// Print a stats response as JSON
    Stats {
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "7d")]
        range: TimeRange,
        #[arg(long, default_value = "day")]
        group_by: Resolution,
        #[arg(long, default_value = "views")]
        metric: StatMetric,
        #[arg(long)]
        start: Option<NaiveDate>,
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Evaluate relative ranges as of this instant (RFC 3339)
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Change a running total no event kind drives (posts, following)
    Adjust {
        #[arg(long)]
        user: String,
        #[arg(long)]
        field: CounterField,
        #[arg(long, allow_hyphen_values = true)]
        delta: i64,
    },
    /// Close every period whose grace window has passed
    Close {
        #[arg(long)]
        now: Option<DateTime<Utc>>,
    },
    /// Retry write-through for keys that failed earlier
    Repair,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct IngestSummary {
    lines: usize,
    accepted: usize,
    rejected: usize,
    failed: usize,
    late_writes: usize,
    underflows: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.storage.data_dir = data_dir;
    }

    match cli.command {
        Command::Ingest { events } => {
            let engine = open_engine(config, None)?;
            let summary = ingest(&engine, &events)?;
            print_json(&summary)
        }
        Command::Stats {
            user,
            range,
            group_by,
            metric,
            start,
            end,
            now,
        } => {
            let engine = Arc::new(open_engine(config, now)?);
            let filter = StatsFilterOptions {
                start_date: start,
                end_date: end,
                time_range: range,
                group_by,
                metric,
            };
            let response = QueryService::new(engine).get_stats(&UserId::new(user)?, &filter)?;
            print_json(&response)
        }
        Command::Adjust { user, field, delta } => {
            let engine = open_engine(config, None)?;
            let user = UserId::new(user)?;
            let report = engine.adjust_total(&user, field, delta)?;
            if report.underflow() {
                tracing::warn!(user = %user, field = %field, "total clamped at zero");
            }
            print_json(&engine.snapshot(&user)?)
        }
        Command::Close { now } => {
            let engine = open_engine(config, now)?;
            let report = engine.close_expired_periods()?;
            tracing::info!(closed = report.closed, repaired = report.repaired, "close sweep finished");
            print_json(&engine.counters())
        }
        Command::Repair => {
            let engine = open_engine(config, None)?;
            let report = engine.repair_pending()?;
            print_json(&report)
        }
    }
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "engagestat=info,engagestat_storage=info,engagestat_query=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn open_engine(config: EngineConfig, now: Option<DateTime<Utc>>) -> Result<StatsEngine> {
    let clock: Arc<dyn Clock> = match now {
        Some(now) => Arc::new(FixedClock::new(now)),
        None => Arc::new(SystemClock),
    };
    let data_dir = config.storage.data_dir.clone();
    StatsEngine::open(config, clock)
        .with_context(|| format!("failed to open data directory {}", data_dir.display()))
}

fn ingest(engine: &StatsEngine, path: &Path) -> Result<IngestSummary> {
    let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut summary = IngestSummary::default();

    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        summary.lines += 1;

        let event: EngagementEvent = match serde_json::from_str(&line) {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!(line = idx + 1, error = %e, "skipping malformed event");
                summary.rejected += 1;
                continue;
            }
        };

        match engine.emit(&event) {
            Ok(report) => {
                summary.accepted += 1;
                summary.late_writes += usize::from(report.late_write());
                summary.underflows += usize::from(report.underflow());
            }
            Err(e) if e.is_retryable() => {
                // applied in memory; write-through stays pending
                tracing::warn!(line = idx + 1, error = %e, "event applied, write-through pending");
                summary.failed += 1;
            }
            Err(e) => {
                tracing::warn!(line = idx + 1, error = %e, "event rejected");
                summary.rejected += 1;
            }
        }
    }

    if summary.failed > 0 {
        let report = engine.repair_pending()?;
        tracing::info!(attempted = report.attempted, remaining = report.remaining, "retried pending writes");
    }
    tracing::info!(accepted = summary.accepted, rejected = summary.rejected, "ingest finished");
    Ok(summary)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_cli_parses_stats() {
        let cli = Cli::try_parse_from([
            "engagestat",
            "--data-dir",
            "/tmp/x",
            "stats",
            "--user",
            "alice",
            "--range",
            "30d",
            "--group-by",
            "week",
            "--metric",
            "ext:shares",
            "--now",
            "2024-03-07T18:00:00Z",
        ])
        .unwrap();
        match cli.command {
            Command::Stats {
                range,
                group_by,
                metric,
                now,
                ..
            } => {
                assert_eq!(range, TimeRange::Last30Days);
                assert_eq!(group_by, Resolution::Week);
                assert_eq!(metric, StatMetric::Extension("shares".into()));
                assert!(now.is_some());
            }
            other => panic!("unexpected command {other:?}"),
        }
        assert!(Cli::try_parse_from(["engagestat", "stats", "--user", "a", "--range", "1w"]).is_err());
    }

    #[test]
    fn test_cli_parses_negative_adjust() {
        let cli = Cli::try_parse_from([
            "engagestat", "adjust", "--user", "alice", "--field", "following", "--delta", "-2",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Command::Adjust { field: CounterField::Following, delta: -2, .. }
        ));
    }

    #[test]
    fn test_ingest_counts_lines() {
        let dir = tempfile::tempdir().unwrap();
        let events = dir.path().join("events.jsonl");
        let mut file = File::create(&events).unwrap();
        writeln!(file, r#"{{"userId":"alice","metric":"postView","delta":3,"at":"2024-03-01T10:00:00Z"}}"#).unwrap();
        writeln!(file, r#"{{"userId":"alice","metric":"like","at":"2024-03-01T11:00:00Z"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"userId":"alice","metric":"share","at":"2024-03-01T11:00:00Z"}}"#).unwrap();
        writeln!(file, r#"{{"userId":"","metric":"like","at":"2024-03-01T11:00:00Z"}}"#).unwrap();
        drop(file);

        let mut config = EngineConfig::default();
        config.storage.data_dir = dir.path().join("data");
        let engine = open_engine(config, None).unwrap();
        let summary = ingest(&engine, &events).unwrap();

        assert_eq!(summary.lines, 4);
        assert_eq!(summary.accepted, 2);
        assert_eq!(summary.rejected, 2);
        let totals = engine.snapshot(&UserId::from("alice")).unwrap();
        assert_eq!(totals.total_views, 3);
        assert_eq!(totals.total_likes, 1);
    }
}
