//! Property-based tests for the compressor.
//!
//! - Any input round trips at any level and thread count
//! - Radix matches always point at equal bytes inside the block
//! - Chunks respect the LZMA2 size limits
//! - Setting a parameter twice is the same as setting it once

use proptest::prelude::*;

use flzma2::{Context, Parameter};
use flzma2_lzma2::chunk::{MAX_CHUNK_COMPRESSED_SIZE, MAX_CHUNK_UNCOMPRESSED_SIZE};
use flzma2_lzma2::chunk_infos;
use flzma2_radix::{DataBlock, MatchTable, RadixParams};

/// Inputs mixing runs, repeats of earlier data and random bytes.
fn input_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec((0u8..3, any::<u8>(), 1usize..300), 0..200).prop_map(|pieces| {
        let mut data = Vec::new();
        for (kind, byte, len) in pieces {
            match kind {
                0 => data.extend(std::iter::repeat_n(byte, len)),
                1 if !data.is_empty() => {
                    let from = (byte as usize * 31) % data.len();
                    let len = len.min(data.len() - from);
                    data.extend_from_within(from..from + len);
                }
                _ => data.extend((0..len).map(|i| byte.wrapping_mul(i as u8 | 1))),
            }
        }
        data
    })
}

fn level_strategy() -> impl Strategy<Value = u32> {
    prop_oneof![Just(1u32), Just(2), Just(3), Just(4), Just(6)]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        max_shrink_iters: 100,
        ..ProptestConfig::default()
    })]

    /// Property: decompress(compress(x)) == x.
    #[test]
    fn prop_round_trip(data in input_strategy(), level in level_strategy(), threads in 1usize..4) {
        let mut ctx = Context::with_level(level, threads).unwrap();
        let packed = ctx.compress(&data).unwrap();
        prop_assert!(packed.len() <= flzma2::compress_bound(data.len()));
        prop_assert_eq!(flzma2::decompress(&packed).unwrap(), data);
    }

    /// Property: every match the table reports is real and stays in the block.
    #[test]
    fn prop_matches_are_valid(data in input_strategy(), depth in 6u32..64) {
        prop_assume!(data.len() > 16);
        let params = RadixParams {
            dictionary_size: 1 << 20,
            depth,
            ..Default::default()
        };
        let table = MatchTable::new(&params, data.len(), 1).unwrap();
        let block = DataBlock::new(&data, 0, data.len());
        table.init_table(&data, data.len()).unwrap();
        table.build_table(0, false, &block).unwrap();
        prop_assert_eq!(table.integrity_check(&block), 0);

        for pos in 0..data.len() {
            let m = table.get_match(&block, pos);
            if m.length == 0 {
                continue;
            }
            let length = m.length as usize;
            let dist = m.dist as usize + 1;
            prop_assert!(dist <= pos, "distance {} at {}", dist, pos);
            prop_assert!(pos + length <= data.len());
            prop_assert_eq!(&data[pos..pos + length], &data[pos - dist..pos - dist + length]);
        }
    }

    /// Property: no chunk exceeds the format's size limits.
    #[test]
    fn prop_chunk_bounds(data in input_strategy(), threads in 1usize..3) {
        let mut ctx = Context::with_level(3, threads).unwrap();
        ctx.set_parameter(Parameter::OmitProperties, 1).unwrap();
        let packed = ctx.compress(&data).unwrap();
        let chunks = chunk_infos(&packed).unwrap();
        let total: usize = chunks.iter().map(|c| c.unpacked_size).sum();
        prop_assert_eq!(total, data.len());
        for chunk in chunks {
            prop_assert!(chunk.unpacked_size <= MAX_CHUNK_UNCOMPRESSED_SIZE);
            prop_assert!(chunk.packed_size <= MAX_CHUNK_COMPRESSED_SIZE);
        }
    }

    /// Property: repeating a parameter assignment changes nothing.
    #[test]
    fn prop_idempotent_configuration(
        data in input_strategy(),
        fast_length in 6usize..=273,
        strategy in 0usize..3,
    ) {
        let configure = |ctx: &mut Context, times: usize| {
            for _ in 0..times {
                ctx.set_parameter(Parameter::FastLength, fast_length).unwrap();
                ctx.set_parameter(Parameter::Strategy, strategy).unwrap();
            }
        };
        let mut once = Context::with_level(2, 1).unwrap();
        configure(&mut once, 1);
        let mut twice = Context::with_level(2, 1).unwrap();
        configure(&mut twice, 2);
        prop_assert_eq!(once.compress(&data).unwrap(), twice.compress(&data).unwrap());
    }
}
