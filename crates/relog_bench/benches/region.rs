//! Region codec benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use relog_bench::utils::{generate_records, random_data};
use relog_core::region::{pack, unpack};
use relog_core::{adler32, ChecksumKind, FormatPolicy, Lsn};

/// Benchmark packing windows of various sizes.
fn bench_pack(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_pack");

    for count in [1, 16, 256].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let records = generate_records(Lsn::FIRST, count, 128);
            b.iter(|| {
                let region = pack(black_box(&records), ChecksumKind::Adler32);
                black_box(region);
            });
        });
    }
    group.finish();
}

/// Benchmark unpacking, checksum verification included.
fn bench_unpack(c: &mut Criterion) {
    let mut group = c.benchmark_group("region_unpack");

    for count in [1, 16, 256].iter() {
        group.throughput(Throughput::Elements(*count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), count, |b, &count| {
            let records = generate_records(Lsn::FIRST, count, 128);
            let last = records[records.len() - 1].lsn();
            let region = pack(&records, ChecksumKind::Adler32);
            b.iter(|| {
                let unpacked = unpack(last, black_box(region.clone()), FormatPolicy::Auto).unwrap();
                black_box(unpacked);
            });
        });
    }
    group.finish();
}

/// Benchmark the region checksum.
fn bench_adler32(c: &mut Criterion) {
    let mut group = c.benchmark_group("adler32");

    for size in [64, 1024, 65536].iter() {
        group.throughput(Throughput::Bytes(*size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), size, |b, &size| {
            let data = random_data(size);
            b.iter(|| black_box(adler32(black_box(&data))));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_pack, bench_unpack, bench_adler32);
criterion_main!(benches);
