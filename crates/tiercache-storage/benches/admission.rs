//! Benchmarks for the W-TinyLFU probabilistic structures

use std::hint::black_box;

use criterion::{Criterion, Throughput, criterion_group, criterion_main};

use tiercache_storage::tinylfu::{BloomFilter, CountMinSketch};

fn bench_sketch(c: &mut Criterion) {
    let sketch = CountMinSketch::new(1000, 5);
    for i in 0..10_000u64 {
        sketch.increment(&i);
    }

    let mut group = c.benchmark_group("sketch");
    group.throughput(Throughput::Elements(1));

    group.bench_function("increment", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = i.wrapping_add(1);
            sketch.increment(black_box(&i));
        });
    });

    group.bench_function("estimate", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = i.wrapping_add(1);
            black_box(sketch.estimate(black_box(&(i % 10_000))));
        });
    });

    group.bench_function("decay", |b| {
        b.iter(|| sketch.decay());
    });

    group.finish();
}

fn bench_bloom(c: &mut Criterion) {
    let filter = BloomFilter::with_size(2000, 5);
    for i in 0..1000u64 {
        filter.add(&i);
    }

    let mut group = c.benchmark_group("bloom");
    group.throughput(Throughput::Elements(1));

    group.bench_function("add", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = i.wrapping_add(1);
            filter.add(black_box(&i));
        });
    });

    group.bench_function("contains", |b| {
        let mut i = 0u64;
        b.iter(|| {
            i = i.wrapping_add(1);
            black_box(filter.contains(black_box(&i)));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_sketch, bench_bloom);
criterion_main!(benches);
