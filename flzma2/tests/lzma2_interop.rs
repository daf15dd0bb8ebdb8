//! Chunk streams exchanged with liblzma's raw LZMA2 coder in both directions.

use flzma2::decoder::{CHECKSUM_FLAG, decode_chunks};
use flzma2::{Context, Parameter, stream_info};
use xz2::stream::{Action, Filters, LzmaOptions, Status, Stream};

fn text(len: usize, seed: u32) -> Vec<u8> {
    let words: [&[u8]; 8] = [
        b"chunk ", b"header ", b"carries ", b"the ", b"packed ", b"size ", b"and ", b"state.\n",
    ];
    let mut state = seed;
    let mut data = Vec::with_capacity(len);
    while data.len() < len {
        state = state.wrapping_mul(1_103_515_245).wrapping_add(12345);
        data.extend_from_slice(words[(state >> 16) as usize % words.len()]);
        if state % 89 == 0 {
            data.extend_from_slice(&state.to_le_bytes());
        }
    }
    data.truncate(len);
    data
}

fn noise(len: usize) -> Vec<u8> {
    let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
    (0..len)
        .map(|_| {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed as u8
        })
        .collect()
}

/// Text and short-period runs with an incompressible stretch in between.
fn mixed(len: usize) -> Vec<u8> {
    let mut data = text(len / 2, 11);
    data.extend_from_slice(&noise(len / 8));
    while data.len() < len {
        data.extend_from_slice(b"abcde");
        data.push(b'0' + (data.len() % 7) as u8);
    }
    data.truncate(len);
    data
}

fn lzma2_filters(options: &LzmaOptions) -> Filters {
    let mut filters = Filters::new();
    filters.lzma2(options);
    filters
}

/// Run a raw liblzma coder over `input` until it reports the end of stream.
fn run_to_end(mut stream: Stream, input: &[u8], action: Action) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + 1024);
    loop {
        let consumed = stream.total_in() as usize;
        let produced = out.len();
        out.reserve(1 << 16);
        let status = stream
            .process_vec(&input[consumed..], &mut out, action)
            .unwrap();
        if matches!(status, Status::StreamEnd) {
            return out;
        }
        assert!(
            stream.total_in() as usize > consumed || out.len() > produced,
            "liblzma stalled after {consumed} input bytes"
        );
    }
}

fn liblzma_decode(chunks: &[u8], dict_size: usize) -> Vec<u8> {
    let mut options = LzmaOptions::new_preset(6).unwrap();
    options.dict_size(dict_size.max(4096) as u32);
    let stream = Stream::new_raw_decoder(&lzma2_filters(&options)).unwrap();
    run_to_end(stream, chunks, Action::Run)
}

fn liblzma_encode(data: &[u8], options: &LzmaOptions) -> Vec<u8> {
    let stream = Stream::new_raw_encoder(&lzma2_filters(options)).unwrap();
    run_to_end(stream, data, Action::Finish)
}

/// The chunk sequence of a stream: no property byte, no trailing checksum.
fn chunks_of(packed: &[u8]) -> &[u8] {
    let end = if packed[0] & CHECKSUM_FLAG != 0 {
        packed.len() - 4
    } else {
        packed.len()
    };
    &packed[1..end]
}

#[test]
fn test_liblzma_decodes_every_level() {
    let data = mixed(1_500_000);
    for level in [1, 3, 6, 9] {
        let mut ctx = Context::with_level(level, 2).unwrap();
        let packed = ctx.compress(&data).unwrap();
        let decoded = liblzma_decode(chunks_of(&packed), data.len());
        assert!(decoded == data, "level {level}");
    }
}

#[test]
fn test_liblzma_decodes_high_levels() {
    let data = text(900_000, 4);
    for level in 1..=4 {
        let mut ctx = Context::new(2).unwrap();
        ctx.set_parameter(Parameter::CompressionLevel, level).unwrap();
        ctx.set_parameter(Parameter::HighCompression, 1).unwrap();
        let packed = ctx.compress(&data).unwrap();
        let decoded = liblzma_decode(chunks_of(&packed), data.len());
        assert!(decoded == data, "high level {level}");
    }
}

#[test]
fn test_liblzma_decodes_dictionary_resets() {
    let data = mixed(3 << 20);
    for interval in [1, 2] {
        let mut ctx = Context::with_level(1, 4).unwrap();
        ctx.set_parameter(Parameter::ResetInterval, interval).unwrap();
        let packed = ctx.compress(&data).unwrap();
        assert!(stream_info(&packed).unwrap().dictionary_resets >= 2);
        let decoded = liblzma_decode(chunks_of(&packed), data.len());
        assert!(decoded == data, "reset interval {interval}");
    }
}

#[test]
fn test_liblzma_decodes_bare_chunks() {
    let data = mixed(400_000);
    let mut ctx = Context::with_level(5, 1).unwrap();
    ctx.set_parameter(Parameter::OmitProperties, 1).unwrap();
    let chunks = ctx.compress(&data).unwrap();
    assert_eq!(chunks.last(), Some(&0));
    assert!(liblzma_decode(&chunks, data.len()) == data);
}

#[test]
fn test_decodes_liblzma_presets() {
    let data = mixed(3 << 20);
    for preset in [0, 3, 6] {
        let mut options = LzmaOptions::new_preset(preset).unwrap();
        options.dict_size(1 << 20);
        let chunks = liblzma_encode(&data, &options);
        let decoded = decode_chunks(&chunks, data.len()).unwrap();
        assert!(decoded == data, "preset {preset}");
    }
}

#[test]
fn test_decodes_liblzma_literal_settings() {
    let data = text(600_000, 9);
    for (lc, lp, pb) in [(0, 2, 0), (4, 0, 2), (1, 1, 1)] {
        let mut options = LzmaOptions::new_preset(2).unwrap();
        options
            .dict_size(1 << 20)
            .literal_context_bits(lc)
            .literal_position_bits(lp)
            .position_bits(pb);
        let chunks = liblzma_encode(&data, &options);
        let decoded = decode_chunks(&chunks, data.len()).unwrap();
        assert!(decoded == data, "lc {lc} lp {lp} pb {pb}");
    }
}

#[test]
fn test_decodes_liblzma_short_distances() {
    let mut data = b"abcde".repeat(13);
    data.extend_from_slice(b"Zqabcdq");
    let mut options = LzmaOptions::new_preset(9).unwrap();
    options.dict_size(1 << 16);
    let chunks = liblzma_encode(&data, &options);
    assert_eq!(decode_chunks(&chunks, data.len()).unwrap(), data);
}
