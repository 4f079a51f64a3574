/// Progress engine throughput benchmarks
///
/// Measures the per-action cost of the engine itself (in-memory store):
/// 1. Untracked key - resolution only
/// 2. Tracked key, in progress - resolve + lock/advance/save + evaluate
/// 3. Action that completes a mission - adds reward issuance
/// 4. Reset sweep over N recurring missions
use chrono::{TimeZone, Utc};
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::sync::Arc;

use playhub_server::missions::MissionService;
use playhub_server::model::*;
use playhub_server::storage::MemoryStore;
use playhub_server::ProgressConfig;

fn mission(key: &str, goal: i64) -> NewMission {
    NewMission {
        text: format!("Do {}", key),
        coins: 10,
        experience: 25,
        frequency: Frequency::Daily,
        for_all: true,
        requirements: vec![NewRequirement::new("Task", key, goal)],
        rewards: vec![Rewardable::coins(50)],
    }
}

fn bench_record_progress(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("record_progress");

    let (service, user) = runtime.block_on(async {
        let service = MissionService::new(Arc::new(MemoryStore::new()), &ProgressConfig::default());
        let user = service.create_user("bench").await.unwrap();
        for i in 0..50 {
            service
                .create_mission(&mission(&format!("filler_{}", i), 5), Utc::now())
                .await
                .unwrap();
        }
        service
            .create_mission(&mission("play_game", 1_000_000), Utc::now())
            .await
            .unwrap();
        (service, user)
    });

    group.bench_function("1_untracked_key", |b| {
        b.to_async(&runtime)
            .iter(|| async { service.record_progress(user, "nothing", 1).await.unwrap() });
    });

    group.bench_function("2_in_progress", |b| {
        b.to_async(&runtime)
            .iter(|| async { service.record_progress(user, "play_game", 1).await.unwrap() });
    });

    group.bench_function("3_completing_action", |b| {
        let mut n = 0u64;
        b.iter_batched(
            || {
                n += 1;
                let key = format!("once_{}", n);
                runtime.block_on(async {
                    service.create_mission(&mission(&key, 1), Utc::now()).await.unwrap();
                });
                key
            },
            |key| {
                runtime.block_on(async {
                    service.record_progress(user, &key, 1).await.unwrap();
                })
            },
            criterion::BatchSize::SmallInput,
        );
    });

    group.finish();
}

fn bench_reset_sweep(c: &mut Criterion) {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("reset_sweep");
    group.sample_size(20);

    for missions in [10usize, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(missions), &missions, |b, &count| {
            b.iter_batched(
                || {
                    runtime.block_on(async {
                        let service = MissionService::new(
                            Arc::new(MemoryStore::new()),
                            &ProgressConfig::default(),
                        );
                        let created = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
                        for u in 0..20 {
                            service.create_user(&format!("user_{}", u)).await.unwrap();
                        }
                        for i in 0..count {
                            service
                                .create_mission(&mission(&format!("key_{}", i), 3), created)
                                .await
                                .unwrap();
                        }
                        service
                    })
                },
                |service| {
                    runtime.block_on(async {
                        let now = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
                        service.reset_due_missions(now).await.unwrap()
                    })
                },
                criterion::BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

criterion_group!(benches, bench_record_progress, bench_reset_sweep);
criterion_main!(benches);
