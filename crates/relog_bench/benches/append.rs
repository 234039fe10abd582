//! Append path benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relog_bench::utils::random_data;
use relog_testkit::{Key, TestLog};
use std::thread;

/// Benchmark unsynced appends.
fn bench_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("append");

    for size in [64, 256, 1024, 4096].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let log = TestLog::memory();
            let data = random_data(size);
            let mut i = 0u64;

            b.iter(|| {
                let action = log.store.put(Key::new(0, format!("k{}", i % 64)), data.clone());
                i += 1;
                black_box(log.engine.append(action, false).unwrap().lsn());
            });
        });
    }
    group.finish();
}

/// Benchmark appends that wait for a sync.
fn bench_append_sync(c: &mut Criterion) {
    let mut group = c.benchmark_group("append_sync");

    group.bench_function("memory", |b| {
        let log = TestLog::memory();
        let data = random_data(256);
        b.iter(|| {
            let action = log.store.put(Key::new(0, "k"), data.clone());
            black_box(log.engine.append_sync(action).unwrap());
        });
    });

    group.sample_size(20);
    group.bench_function("file", |b| {
        let log = TestLog::file();
        let data = random_data(256);
        b.iter(|| {
            let action = log.store.put(Key::new(0, "k"), data.clone());
            black_box(log.engine.append_sync(action).unwrap());
        });
    });
    group.finish();
}

/// Benchmark concurrent producers sharing one engine.
fn bench_concurrent_append(c: &mut Criterion) {
    let mut group = c.benchmark_group("concurrent_append");

    for threads in [2, 4, 8].iter() {
        let per_thread = 1_000;
        group.throughput(Throughput::Elements((threads * per_thread) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(threads), threads, |b, &threads| {
            let log = TestLog::memory();
            let data = random_data(128);
            b.iter(|| {
                thread::scope(|s| {
                    for t in 0..threads {
                        let log = &log;
                        let data = &data;
                        s.spawn(move || {
                            for i in 0..per_thread {
                                let key = Key::new(t as u64, format!("k{}", i % 32));
                                let action = log.store.put(key, data.clone());
                                let _ = log.engine.append(action, false).unwrap();
                            }
                        });
                    }
                });
                log.freeze().unwrap();
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_append, bench_append_sync, bench_concurrent_append);
criterion_main!(benches);
