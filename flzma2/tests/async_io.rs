//! The streaming compressor behind the tokio adapter.
#![cfg(feature = "async-io")]

use flzma2::CompressStream;
use flzma2_core::{AsyncCompressor, AsyncCompressorWrapper};

#[tokio::test]
async fn test_async_stream_round_trip() {
    let data = b"asynchronous input, asynchronous output. ".repeat(40_000);
    let mut stream = CompressStream::new(2, true).unwrap();
    stream.init(3).unwrap();
    let mut compressor = AsyncCompressorWrapper::new(stream);

    let mut input = &data[..];
    let mut output = Vec::new();
    let written = compressor.compress_async(&mut input, &mut output).await.unwrap();

    assert_eq!(written, output.len());
    assert_eq!(flzma2::decompress(&output).unwrap(), data);
}

#[tokio::test]
async fn test_async_small_buffers() {
    let data: Vec<u8> = (0..300_000u32).map(|i| (i * 7 % 251) as u8).collect();
    let stream = CompressStream::new(1, false).unwrap();
    let mut compressor = AsyncCompressorWrapper::with_buffer_size(stream, 1000);

    let mut input = &data[..];
    let mut output = Vec::new();
    compressor.compress_async(&mut input, &mut output).await.unwrap();
    assert_eq!(flzma2::decompress(&output).unwrap(), data);
}
