//! Match table build benchmarks across data patterns, search depths and the
//! two long-list strategies.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use flzma2_radix::{DataBlock, MatchTable, RadixParams};
use std::hint::black_box;

type PatternGenerator = fn(usize) -> Vec<u8>;

mod test_data {
    pub fn random(size: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(size);
        let mut seed: u64 = 0x1234_5678_9ABC_DEF0;
        for _ in 0..size {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            data.push((seed >> 32) as u8);
        }
        data
    }

    pub fn text_like(size: usize) -> Vec<u8> {
        let text = b"The quick brown fox jumps over the lazy dog. \
                     Pack my box with five dozen liquor jugs. \
                     How vexingly quick daft zebras jump! ";
        text.iter().copied().cycle().take(size).collect()
    }

    pub fn uniform(size: usize) -> Vec<u8> {
        vec![0xAA; size]
    }
}

const SIZE: usize = 1 << 20;

fn build_once(table: &MatchTable, data: &[u8]) {
    let block = DataBlock::new(data, 0, data.len());
    table.init_table(data, data.len()).unwrap();
    table.build_table(0, false, &block).unwrap();
}

fn bench_patterns(c: &mut Criterion) {
    let mut group = c.benchmark_group("radix_build_pattern");
    group.throughput(Throughput::Bytes(SIZE as u64));
    let patterns: [(&str, PatternGenerator); 3] = [
        ("random", test_data::random),
        ("text", test_data::text_like),
        ("uniform", test_data::uniform),
    ];
    let params = RadixParams {
        dictionary_size: SIZE,
        ..Default::default()
    };
    let table = MatchTable::new(&params, SIZE, 1).unwrap();
    for (name, generator) in patterns {
        let data = generator(SIZE);
        group.bench_with_input(BenchmarkId::from_parameter(name), &data, |b, data| {
            b.iter(|| build_once(&table, black_box(data)));
        });
    }
    group.finish();
}

fn bench_depth(c: &mut Criterion) {
    let mut group = c.benchmark_group("radix_build_depth");
    group.throughput(Throughput::Bytes(SIZE as u64));
    let data = test_data::text_like(SIZE);
    for depth in [6u32, 42, 254] {
        for divide_and_conquer in [true, false] {
            let params = RadixParams {
                dictionary_size: SIZE,
                depth,
                divide_and_conquer,
                ..Default::default()
            };
            let table = MatchTable::new(&params, SIZE, 1).unwrap();
            let id = format!("{depth}/{}", if divide_and_conquer { "dc" } else { "best" });
            group.bench_function(BenchmarkId::from_parameter(id), |b| {
                b.iter(|| build_once(&table, black_box(&data)));
            });
        }
    }
    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let data = test_data::text_like(SIZE);
    let params = RadixParams {
        dictionary_size: SIZE,
        ..Default::default()
    };
    let table = MatchTable::new(&params, SIZE, 1).unwrap();
    build_once(&table, &data);
    let block = DataBlock::new(&data, 0, data.len());

    let mut group = c.benchmark_group("radix_get_match");
    group.throughput(Throughput::Elements(SIZE as u64));
    group.bench_function("all_positions", |b| {
        b.iter(|| {
            let mut total = 0u64;
            for pos in 0..data.len() {
                total += table.get_match(&block, pos).length as u64;
            }
            black_box(total)
        });
    });
    group.finish();
}

criterion_group!(benches, bench_patterns, bench_depth, bench_queries);
criterion_main!(benches);
