//! # flzma2 Core
//!
//! Shared building blocks for the flzma2 compression engine:
//!
//! - [`error`]: The error taxonomy used by every crate in the workspace
//! - [`xxhash`]: XXH32, the checksum written after the stream terminator
//! - [`traits`]: The streaming [`Compressor`] trait
//! - `async_io`: tokio adapter (feature `async-io`)
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ flzma2-cli     command-line tool                        │
//! ├─────────────────────────────────────────────────────────┤
//! │ flzma2         params, dictionary buffer, thread pool,  │
//! │                context/job scheduler, streaming façade  │
//! ├────────────────────────────┬────────────────────────────┤
//! │ flzma2-lzma2               │ flzma2-radix               │
//! │ range coder, LZMA2 encoder │ radix match finder         │
//! ├────────────────────────────┴────────────────────────────┤
//! │ flzma2-core (this crate)   errors, XXH32, traits        │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use flzma2_core::xxhash::{XxHash32, xxhash32};
//!
//! let mut hasher = XxHash32::new();
//! hasher.update(b"ab");
//! hasher.update(b"c");
//! assert_eq!(hasher.finish(), xxhash32(b"abc"));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod traits;
pub mod xxhash;

#[cfg(feature = "async-io")]
pub mod async_io;

// Re-exports for convenience
pub use error::{Flzma2Error, Result};
pub use traits::{CompressStatus, Compressor, FlushMode};
pub use xxhash::{XxHash32, xxhash32};

#[cfg(feature = "async-io")]
pub use async_io::{AsyncCompressor, AsyncCompressorWrapper};

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Flzma2Error, Result};
    pub use crate::traits::{CompressStatus, Compressor, FlushMode};
    pub use crate::xxhash::{XxHash32, xxhash32};
}
