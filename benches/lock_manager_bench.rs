// Lock manager performance benchmarks: uncontended acquire/release, shared
// batch admission, and upgrade under contention.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use cooplock::{LockManager, LockManagerConfig};
use std::sync::Arc;

fn bench_uncontended_acquire_release(c: &mut Criterion) {
    let mgr = LockManager::new(LockManagerConfig::default());

    c.bench_function("acquire_release_exclusive", |b| {
        let mut holder = 0u64;
        b.iter(|| {
            holder += 1;
            mgr.acquire_exclusive(holder, "bench.resource").unwrap();
            mgr.release(holder, "bench.resource").unwrap();
            black_box(holder);
        });
    });
}

fn bench_shared_batch_admission(c: &mut Criterion) {
    let mut group = c.benchmark_group("shared_batch");

    for batch in [1usize, 4, 16, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(batch), &batch, |b, &batch| {
            b.iter(|| {
                let mgr = LockManager::new(LockManagerConfig::default());
                for holder in 0..batch as u64 {
                    mgr.acquire_shared(holder, "bench.resource").unwrap();
                }
                for holder in 0..batch as u64 {
                    mgr.release(holder, "bench.resource").unwrap();
                }
            });
        });
    }

    group.finish();
}

fn bench_upgrade_contention(c: &mut Criterion) {
    c.bench_function("sole_holder_upgrade", |b| {
        let mgr = Arc::new(LockManager::new(LockManagerConfig::default()));
        let mut holder = 0u64;
        b.iter(|| {
            holder += 1;
            let key = format!("bench.upgrade.{}", holder);
            mgr.acquire_shared(holder, key.clone()).unwrap();
            mgr.upgrade(holder, key.clone()).unwrap();
            mgr.release(holder, key).unwrap();
        });
    });
}

criterion_group!(
    benches,
    bench_uncontended_acquire_release,
    bench_shared_batch_admission,
    bench_upgrade_contention
);
criterion_main!(benches);
