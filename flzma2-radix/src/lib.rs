//! # flzma2 Radix
//!
//! A radix-tree match finder. Instead of searching for matches position by
//! position, it sorts all suffixes of a block into lists by shared prefix,
//! one byte at a time, and records for every position the nearest earlier
//! position sharing the longest prefix. The result is a table with one
//! `(link, length)` entry per position that the encoder queries in O(1).
//!
//! ## Build
//!
//! ```text
//! init_table        every position -> list of its 2-byte prefix
//!     │
//!     ▼
//! build_table       N jobs claim lists from a shared counter
//!     │               long lists   -> 16-bit radix pass (or buffered split)
//!     │               short lists  -> match buffer, 1 byte per level
//!     │               tiny lists   -> brute force
//!     │               repeats      -> closed-form lengths
//!     ▼
//! get_match         link + length, extended past the build depth on demand
//! ```
//!
//! ## Example
//!
//! ```rust
//! use flzma2_radix::{DataBlock, MatchTable, RadixParams};
//!
//! let data = b"the quick brown fox, the quick brown dog".to_vec();
//! let params = RadixParams { dictionary_size: 1 << 16, ..Default::default() };
//! let table = MatchTable::new(&params, data.len(), 1).unwrap();
//!
//! let block = DataBlock::new(&data, 0, data.len());
//! table.init_table(&data, data.len()).unwrap();
//! table.build_table(0, false, &block).unwrap();
//!
//! let m = table.get_match(&block, 21);
//! assert_eq!(m.dist, 20);
//! assert!(m.length >= 15);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_arguments)]

pub mod block;
pub mod builder;
mod engine;
pub mod finder;
pub mod matches;
pub mod table;

pub use block::DataBlock;
pub use builder::RadixBuilder;
pub use finder::{MatchTable, RadixParams, is_structured, match_buffer_size};
pub use matches::{RadixMatch, get_match, get_next_match};
pub use table::{BitpackCells, StructuredCells, TableCells, TableStorage};

/// Number of distinct two-byte prefixes.
pub const RADIX16_TABLE_SIZE: usize = 1 << 16;
/// Number of distinct byte values.
pub const RADIX8_TABLE_SIZE: usize = 1 << 8;

pub(crate) const STACK_SIZE: usize = RADIX16_TABLE_SIZE * 3;
pub(crate) const MAX_BRUTE_FORCE_LIST_SIZE: usize = 5;
pub(crate) const BUFFER_LINK_MASK: u32 = 0x00FF_FFFF;
pub(crate) const MATCH_BUFFER_OVERLAP: usize = 6;
pub(crate) const MAX_REPEAT: usize = 24;
pub(crate) const MAX_READ_BEYOND_DEPTH: usize = 2;

/// Longest match LZMA can encode.
pub const MAX_MATCH_LENGTH: usize = 273;
