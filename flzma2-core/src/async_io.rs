//! Async I/O support for flzma2 compression.
//!
//! Adapts any synchronous [`Compressor`] to tokio's `AsyncRead`/`AsyncWrite`.
//! The compression itself still runs on the calling task; only the I/O is
//! asynchronous.
//!
//! # Example
//!
//! ```rust,ignore
//! use flzma2_core::async_io::{AsyncCompressor, AsyncCompressorWrapper};
//!
//! let mut compressor = AsyncCompressorWrapper::new(stream);
//! let written = compressor.compress_async(&mut input, &mut output).await?;
//! ```
//!
//! # Feature Flag
//!
//! This module is only available when the `async-io` feature is enabled:
//!
//! ```toml
//! [dependencies]
//! flzma2-core = { version = "0.1.0", features = ["async-io"] }
//! ```

use crate::error::Result;
use crate::traits::{CompressStatus, Compressor, FlushMode};
use std::future::Future;
use std::pin::Pin;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Default buffer size for async operations (32KB).
const DEFAULT_BUFFER_SIZE: usize = 32 * 1024;

/// A trait for async compression operations.
pub trait AsyncCompressor: Send {
    /// Compress everything from `input` into `output`.
    ///
    /// # Returns
    ///
    /// The total number of bytes written to the output.
    ///
    /// # Errors
    ///
    /// Returns an error if I/O fails or the compressor reports an error.
    fn compress_async<'a, R, W>(
        &'a mut self,
        input: &'a mut R,
        output: &'a mut W,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>>
    where
        R: AsyncRead + Unpin + Send + 'a,
        W: AsyncWrite + Unpin + Send + 'a;
}

/// An async wrapper around a synchronous compressor.
pub struct AsyncCompressorWrapper<C> {
    inner: C,
    input_buffer: Vec<u8>,
    output_buffer: Vec<u8>,
}

impl<C: Compressor + Send> AsyncCompressorWrapper<C> {
    /// Create a new async compressor wrapper with default buffer size.
    pub fn new(compressor: C) -> Self {
        Self::with_buffer_size(compressor, DEFAULT_BUFFER_SIZE)
    }

    /// Create a new async compressor wrapper with a custom buffer size.
    pub fn with_buffer_size(compressor: C, buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        Self {
            inner: compressor,
            input_buffer: vec![0u8; buffer_size],
            output_buffer: vec![0u8; buffer_size],
        }
    }

    /// Get a reference to the inner compressor.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    /// Get a mutable reference to the inner compressor.
    pub fn inner_mut(&mut self) -> &mut C {
        &mut self.inner
    }

    /// Consume the wrapper and return the inner compressor.
    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: Compressor + Send> AsyncCompressor for AsyncCompressorWrapper<C> {
    fn compress_async<'a, R, W>(
        &'a mut self,
        input: &'a mut R,
        output: &'a mut W,
    ) -> Pin<Box<dyn Future<Output = Result<usize>> + Send + 'a>>
    where
        R: AsyncRead + Unpin + Send + 'a,
        W: AsyncWrite + Unpin + Send + 'a,
    {
        Box::pin(async move {
            let mut total_written = 0usize;
            let mut filled = 0usize;
            let mut consumed_total = 0usize;
            let mut eof = false;

            loop {
                if consumed_total == filled && !eof {
                    filled = input.read(&mut self.input_buffer).await?;
                    consumed_total = 0;
                    eof = filled == 0;
                }

                let flush = if eof {
                    FlushMode::Finish
                } else {
                    FlushMode::None
                };
                let (consumed, produced, status) = self.inner.compress(
                    &self.input_buffer[consumed_total..filled],
                    &mut self.output_buffer,
                    flush,
                )?;
                consumed_total += consumed;

                if produced > 0 {
                    output.write_all(&self.output_buffer[..produced]).await?;
                    total_written += produced;
                }

                if status == CompressStatus::Done {
                    output.flush().await?;
                    return Ok(total_written);
                }
            }
        })
    }
}
