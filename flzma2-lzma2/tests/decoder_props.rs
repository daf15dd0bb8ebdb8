//! Malformed streams must be rejected with an error, never a panic.

use proptest::prelude::*;

use flzma2_core::Flzma2Error;
use flzma2_lzma2::chunk_infos;
use flzma2_lzma2::decoder::{decode_chunks, decompress, stream_info};

/// A valid stored-chunk stream: property byte, one stored chunk, end marker.
fn stored_stream(payload: &[u8]) -> Vec<u8> {
    let mut stream = vec![0x00, 0x01];
    let size = payload.len() - 1;
    stream.push((size >> 8) as u8);
    stream.push(size as u8);
    stream.extend_from_slice(payload);
    stream.push(0x00);
    stream
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_random_bytes_never_panic(data in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = decompress(&data);
        let _ = stream_info(&data);
        let _ = chunk_infos(&data);
        let _ = decode_chunks(&data, 0);
    }

    #[test]
    fn prop_compressed_chunk_noise_is_rejected(
        noise in prop::collection::vec(any::<u8>(), 5..64),
        props in 0u8..225,
    ) {
        // Dictionary reset, new properties, 256 bytes unpacked, noise as payload.
        let packed = noise.len() - 1;
        let mut chunks = vec![0xE0, 0x00, 0xFF, (packed >> 8) as u8, packed as u8, props];
        chunks.extend_from_slice(&noise);
        chunks.push(0x00);
        if let Ok(out) = decode_chunks(&chunks, 0) {
            prop_assert_eq!(out.len(), 256);
        }
    }

    #[test]
    fn prop_stored_stream_decodes(payload in prop::collection::vec(any::<u8>(), 1..2048)) {
        let stream = stored_stream(&payload);
        prop_assert_eq!(decompress(&stream).unwrap(), payload.clone());
        let info = stream_info(&stream).unwrap();
        prop_assert_eq!(info.unpacked_size, payload.len() as u64);
        prop_assert_eq!(info.stored_chunks, 1);
    }

    #[test]
    fn prop_truncation_is_an_error(payload in prop::collection::vec(any::<u8>(), 1..256), cut in 1usize..8) {
        let stream = stored_stream(&payload);
        let cut = cut.min(stream.len() - 1);
        let truncated = &stream[..stream.len() - cut];
        prop_assert!(matches!(decompress(truncated), Err(Flzma2Error::CorruptedData { .. })), "truncated stream must be CorruptedData");
    }
}
