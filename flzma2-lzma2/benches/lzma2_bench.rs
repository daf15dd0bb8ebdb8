//! Encoder benchmarks per strategy and data pattern, plus the verification
//! decoder. The match table is built once outside the timed loop.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use flzma2_lzma2::{JobProgress, Lzma2Encoder, Lzma2Params, Strategy, decoder};
use flzma2_radix::{DataBlock, MatchTable, RadixParams};
use std::hint::black_box;

type PatternGenerator = fn(usize) -> Vec<u8>;

mod test_data {
    pub fn random(size: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(size);
        let mut seed: u64 = 0x0F1E_2D3C_4B5A_6978;
        for _ in 0..size {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1);
            data.push((seed >> 32) as u8);
        }
        data
    }

    pub fn text_like(size: usize) -> Vec<u8> {
        let words: [&[u8]; 8] = [b"lorem ", b"ipsum ", b"dolor ", b"sit ", b"amet ", b"elit ", b"sed ", b"do\n"];
        let mut seed = 42u32;
        let mut data = Vec::with_capacity(size);
        while data.len() < size {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            data.extend_from_slice(words[(seed >> 16) as usize % words.len()]);
        }
        data.truncate(size);
        data
    }

    pub fn uniform(size: usize) -> Vec<u8> {
        vec![b'A'; size]
    }
}

const SIZE: usize = 1 << 20;

fn built_table(data: &[u8]) -> MatchTable {
    let params = RadixParams {
        dictionary_size: SIZE,
        ..Default::default()
    };
    let table = MatchTable::new(&params, SIZE, 1).unwrap();
    let block = DataBlock::new(data, 0, data.len());
    table.init_table(data, data.len()).unwrap();
    table.build_table(0, false, &block).unwrap();
    table
}

fn encode(encoder: &mut Lzma2Encoder, table: &MatchTable, data: &[u8], strategy: Strategy) -> Vec<u8> {
    let block = DataBlock::new(data, 0, data.len());
    let params = Lzma2Params {
        strategy,
        ..Default::default()
    };
    let mut out = Vec::with_capacity(data.len() / 2);
    encoder
        .encode(table, &block, &params, None, &JobProgress::new(), &mut out)
        .unwrap();
    out.push(0);
    out
}

fn bench_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("lzma2_encode");
    group.throughput(Throughput::Bytes(SIZE as u64));
    group.sample_size(10);
    let patterns: [(&str, PatternGenerator); 3] = [
        ("random", test_data::random),
        ("text", test_data::text_like),
        ("uniform", test_data::uniform),
    ];
    let mut encoder = Lzma2Encoder::new();
    for (name, generator) in patterns {
        let data = generator(SIZE);
        let table = built_table(&data);
        for strategy in Strategy::ALL {
            let id = BenchmarkId::new(strategy.name(), name);
            group.bench_function(id, |b| {
                b.iter(|| encode(&mut encoder, &table, black_box(&data), strategy));
            });
        }
    }
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let data = test_data::text_like(SIZE);
    let table = built_table(&data);
    let compressed = encode(&mut Lzma2Encoder::new(), &table, &data, Strategy::Ultra);

    let mut group = c.benchmark_group("lzma2_decode");
    group.throughput(Throughput::Bytes(SIZE as u64));
    group.bench_function("text", |b| {
        b.iter(|| decoder::decode_chunks(black_box(&compressed), SIZE).unwrap());
    });
    group.finish();
}

criterion_group!(benches, bench_strategies, bench_decode);
criterion_main!(benches);
