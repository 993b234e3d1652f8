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

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use engagestat_core::{EngagementEvent, EngineConfig, Metric, PeriodKey, Resolution, UserId};
use engagestat_storage::{FilePersistence, StatsEngine};
use engagestat_core::SystemClock;
use std::sync::Arc;
use tempfile::tempdir;

fn bench_emit_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("emit_throughput");
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    for size in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            b.iter(|| {
                let engine = StatsEngine::in_memory(EngineConfig::default()).unwrap();
                for i in 0..size {
                    let event = EngagementEvent::new(
                        format!("user-{}", i % 16),
                        Metric::ALL[i % Metric::ALL.len()],
                        1,
                        start + Duration::minutes(i as i64 * 17),
                    );
                    engine.emit(black_box(&event)).unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_emit_file_backed(c: &mut Criterion) {
    let dir = tempdir().unwrap();
    let persistence = FilePersistence::open(dir.path()).unwrap();
    let engine =
        StatsEngine::new(EngineConfig::default(), Arc::new(persistence), Arc::new(SystemClock)).unwrap();
    let at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

    c.bench_function("emit_file_backed", |b| {
        b.iter(|| {
            let event = EngagementEvent::new("alice", Metric::Like, 1, at);
            engine.emit(black_box(&event)).unwrap();
        });
    });
}

fn bench_read_view(c: &mut Criterion) {
    let engine = StatsEngine::in_memory(EngineConfig::default()).unwrap();
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    for i in 0..10_000i64 {
        let event = EngagementEvent::new("alice", Metric::PostView, 1, start + Duration::hours(i % 8760));
        engine.emit(&event).unwrap();
    }
    let alice = UserId::from("alice");
    let year = PeriodKey::of(start, Resolution::Year);
    let days = PeriodKey::range(
        year.first_day(),
        year.last_day(),
        Resolution::Day,
        366,
    )
    .unwrap();

    c.bench_function("read_view_365_days", |b| {
        b.iter(|| engine.read_view(black_box(&alice), &days).unwrap());
    });
}

criterion_group!(benches, bench_emit_throughput, bench_emit_file_backed, bench_read_view);
criterion_main!(benches);
