//! XXH32 throughput benchmarks: one-shot versus block-by-block hashing, the
//! way the dictionary buffer feeds it.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use flzma2_core::xxhash::{XxHash32, xxhash32};
use std::hint::black_box;

fn pseudo_random(size: usize) -> Vec<u8> {
    let mut data = Vec::with_capacity(size);
    let mut seed: u64 = 0x1234_5678_9ABC_DEF0;
    for _ in 0..size {
        seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
        data.push((seed >> 32) as u8);
    }
    data
}

fn bench_one_shot(c: &mut Criterion) {
    let mut group = c.benchmark_group("xxhash32_one_shot");
    for &size in &[256usize, 64 * 1024, 1024 * 1024] {
        let data = pseudo_random(size);
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| black_box(xxhash32(black_box(data))));
        });
    }
    group.finish();
}

fn bench_incremental(c: &mut Criterion) {
    let mut group = c.benchmark_group("xxhash32_incremental");
    let data = pseudo_random(1024 * 1024);
    group.throughput(Throughput::Bytes(data.len() as u64));
    for &block in &[1000usize, 65536] {
        group.bench_with_input(BenchmarkId::new("block", block), &block, |b, &block| {
            b.iter(|| {
                let mut hasher = XxHash32::new();
                for chunk in data.chunks(block) {
                    hasher.update(chunk);
                }
                black_box(hasher.finish())
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_one_shot, bench_incremental);
criterion_main!(benches);
