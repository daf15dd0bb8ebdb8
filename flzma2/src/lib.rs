//! # flzma2
//!
//! Multithreaded LZMA2 compression built on a radix match finder.
//!
//! Input is processed one dictionary-sized block at a time. For each block
//! the match table is built in parallel, then the block is cut into slices
//! that are encoded in parallel into independent LZMA2 chunk runs, which are
//! concatenated in order. Consecutive blocks overlap so the start of a block
//! can still match into the end of the previous one.
//!
//! ## APIs
//!
//! - [`Context`]: one-shot compression of a whole buffer
//! - [`CompressStream`]: push input, pull output, flush and end
//! - [`Flzma2Writer`]: [`std::io::Write`] on top of a stream
//! - [`compress`] / [`decompress`]: convenience functions
//!
//! ## Output format
//!
//! ```text
//! ┌──────────┬──────────────────────────┬──────┬──────────────┐
//! │ property │ LZMA2 chunks             │ 0x00 │ XXH32 (LE)   │
//! │ 1 byte   │ slice 0 | slice 1 | ...  │ end  │ if 0x40 flag │
//! └──────────┴──────────────────────────┴──────┴──────────────┘
//! ```
//!
//! The property byte holds the dictionary size class in its low six bits
//! and 0x40 when a checksum follows. It is left out when
//! [`Parameter::OmitProperties`] is set, and so is the checksum.
//!
//! ## Example
//!
//! ```rust
//! use flzma2::{Context, Parameter};
//!
//! let data = b"The quick brown fox jumps over the lazy dog. ".repeat(1000);
//!
//! let packed = flzma2::compress(&data, 6).unwrap();
//! assert!(packed.len() < data.len() / 10);
//! assert_eq!(flzma2::decompress(&packed).unwrap(), data);
//!
//! let mut ctx = Context::new(2).unwrap();
//! ctx.set_parameter(Parameter::CompressionLevel, 9).unwrap();
//! ctx.set_parameter(Parameter::UseChecksum, 0).unwrap();
//! let packed = ctx.compress(&data).unwrap();
//! assert_eq!(flzma2::decompress(&packed).unwrap(), data);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod context;
pub mod dict_buffer;
pub mod params;
pub mod pool;
pub mod stream;
pub mod writer;

pub use context::{Context, ContextHandle, Progress, compress_bound};
pub use dict_buffer::{BlockData, DictBuffer};
pub use params::{CompressionParams, LevelParams, Parameter, level_params};
pub use pool::ThreadPool;
pub use stream::{CompressStream, InBuffer, OutBuffer};
pub use writer::Flzma2Writer;

pub use flzma2_core::{CompressStatus, Compressor, Flzma2Error, FlushMode, Result};
pub use flzma2_lzma2::decoder::{StreamInfo, stream_info};
pub use flzma2_lzma2::{ChunkInfo, ChunkKind, ChunkReset, Strategy, chunk_infos, decoder};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Compress `data` at `level` using every available core.
pub fn compress(data: &[u8], level: u32) -> Result<Vec<u8>> {
    Context::with_level(level, 0)?.compress(data)
}

/// Decompress a stream with a property byte, verifying its checksum.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>> {
    decoder::decompress(data)
}

/// Lock a mutex, recovering the data if a worker panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
