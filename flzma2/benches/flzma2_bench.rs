//! Whole-pipeline benchmarks: one-shot compression per level and per thread
//! count, and streaming through the dual buffer.

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use flzma2::{CompressStream, Context, InBuffer};
use std::hint::black_box;

mod test_data {
    pub fn text_like(size: usize) -> Vec<u8> {
        let words: [&[u8]; 8] = [b"lorem ", b"ipsum ", b"dolor ", b"sit ", b"amet ", b"elit ", b"sed ", b"do\n"];
        let mut seed = 42u32;
        let mut data = Vec::with_capacity(size);
        while data.len() < size {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            data.extend_from_slice(words[(seed >> 16) as usize % words.len()]);
            if seed % 61 == 0 {
                data.extend_from_slice(&seed.to_be_bytes());
            }
        }
        data.truncate(size);
        data
    }
}

const SIZE: usize = 4 << 20;

fn bench_levels(c: &mut Criterion) {
    let data = test_data::text_like(SIZE);
    let mut group = c.benchmark_group("compress_level");
    group.throughput(Throughput::Bytes(SIZE as u64));
    group.sample_size(10);
    for level in [1, 3, 6, 9] {
        let mut ctx = Context::with_level(level, 1).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(level), &data, |b, data| {
            b.iter(|| ctx.compress(black_box(data)).unwrap());
        });
    }
    group.finish();
}

fn bench_threads(c: &mut Criterion) {
    let data = test_data::text_like(SIZE);
    let mut group = c.benchmark_group("compress_threads");
    group.throughput(Throughput::Bytes(SIZE as u64));
    group.sample_size(10);
    for threads in [1, 2, 4, 8] {
        let mut ctx = Context::with_level(4, threads).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(threads), &data, |b, data| {
            b.iter(|| ctx.compress(black_box(data)).unwrap());
        });
    }
    group.finish();
}

fn stream_once(stream: &mut CompressStream, data: &[u8]) -> usize {
    let mut size = 0;
    stream.init(0).unwrap();
    for piece in data.chunks(1 << 16) {
        let mut input = InBuffer::new(piece);
        while input.remaining() > 0 {
            stream.compress(&mut input, None).unwrap();
            while let Some(buf) = stream.next_compressed_buffer().unwrap() {
                size += buf.len();
            }
        }
    }
    while stream.end(None).unwrap() != 0 {
        while let Some(buf) = stream.next_compressed_buffer().unwrap() {
            size += buf.len();
        }
    }
    size
}

fn bench_stream(c: &mut Criterion) {
    let data = test_data::text_like(SIZE * 2);
    let mut group = c.benchmark_group("stream");
    group.throughput(Throughput::Bytes(data.len() as u64));
    group.sample_size(10);
    for dual in [false, true] {
        let mut stream = CompressStream::new(4, dual).unwrap();
        stream.init(2).unwrap();
        let name = if dual { "dual" } else { "single" };
        group.bench_function(name, |b| {
            b.iter(|| stream_once(&mut stream, black_box(&data)));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_levels, bench_threads, bench_stream);
criterion_main!(benches);
