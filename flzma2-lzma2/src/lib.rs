//! # flzma2 LZMA2
//!
//! The LZMA2 side of the engine: an adaptive range coder with price tables,
//! the LZMA probability model, and an encoder that turns a slice of a block
//! plus its radix match table into independently decodable LZMA2 chunks.
//!
//! ## Parsers
//!
//! - [`Strategy::Fast`]: greedy with one or two positions of lazy lookahead
//! - [`Strategy::Optimal`]: dynamic programming over a window of up to
//!   578 positions, priced with tables refreshed every 64 matches
//! - [`Strategy::Ultra`]: the optimal parser fed by an extra three-byte hash
//!   chain for nearer matches when the radix match is short
//!
//! ## Chunks
//!
//! ```text
//! slice ──► encode chunk ──► compressed smaller? ──yes──► 0x80|reset|size, props, payload
//!                │                    │
//!                │                    no ──► roll back model ──► 0x01/0x02 stored chunk
//!                ▼
//!      incompressible guess for next chunk (match density + byte histogram)
//! ```
//!
//! A [`decoder`] for the produced streams is included for verification.
//!
//! ## Example
//!
//! ```rust
//! use flzma2_lzma2::{JobProgress, Lzma2Encoder, Lzma2Params, decoder};
//! use flzma2_radix::{DataBlock, MatchTable, RadixParams};
//!
//! let data = b"abracadabra abracadabra abracadabra".to_vec();
//! let params = RadixParams { dictionary_size: 1 << 16, ..Default::default() };
//! let table = MatchTable::new(&params, data.len(), 1).unwrap();
//! let block = DataBlock::new(&data, 0, data.len());
//! table.init_table(&data, data.len()).unwrap();
//! table.build_table(0, false, &block).unwrap();
//!
//! let mut encoder = Lzma2Encoder::new();
//! let mut out = Vec::new();
//! let progress = JobProgress::new();
//! encoder
//!     .encode(&table, &block, &Lzma2Params::default(), None, &progress, &mut out)
//!     .unwrap();
//! out.push(0);
//!
//! assert_eq!(decoder::decode_chunks(&out, data.len()).unwrap(), data);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_arguments)]

pub mod chunk;
pub mod decoder;
pub mod encoder;
pub mod hash;
pub mod model;
mod optimal;
pub mod range_coder;

pub use chunk::{ChunkInfo, ChunkKind, ChunkReset, chunk_infos};
pub use encoder::Lzma2Encoder;
pub use model::{LzmaModel, LzmaProperties, State};

use flzma2_core::error::{Flzma2Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Longest `fast_length`.
pub const FAST_LENGTH_MAX: usize = model::MATCH_LEN_MAX;
/// Shortest `fast_length`.
pub const FAST_LENGTH_MIN: usize = 6;
/// Smallest hash chain log for the hybrid parser.
pub const CHAIN_LOG_MIN: u32 = 4;
/// Largest hash chain log for the hybrid parser.
pub const CHAIN_LOG_MAX: u32 = 14;
/// Fewest hash chain steps per search.
pub const MATCH_CYCLES_MIN: u32 = 1;
/// Most hash chain steps per search.
pub const MATCH_CYCLES_MAX: u32 = 64;

/// Encoder parsing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Greedy/lazy parse.
    Fast = 0,
    /// Optimal parse.
    Optimal = 1,
    /// Optimal parse with a hybrid hash chain.
    #[default]
    Ultra = 2,
}

impl Strategy {
    /// All strategies in index order.
    pub const ALL: [Strategy; 3] = [Strategy::Fast, Strategy::Optimal, Strategy::Ultra];

    /// Strategy from its index.
    pub fn from_index(index: u32) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }

    /// Index of the strategy.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Lowercase name.
    pub fn name(self) -> &'static str {
        match self {
            Strategy::Fast => "fast",
            Strategy::Optimal => "optimal",
            Strategy::Ultra => "ultra",
        }
    }
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Strategy {
    type Err = Flzma2Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fast" | "0" => Ok(Strategy::Fast),
            "optimal" | "opt" | "1" => Ok(Strategy::Optimal),
            "ultra" | "2" => Ok(Strategy::Ultra),
            _ => Err(Flzma2Error::invalid_parameter("strategy", -1, 0, 2)),
        }
    }
}

/// Weights for the fast parser's decisions between competing matches. A
/// candidate wins when its gain, `length * weight - cost(distance)`, beats
/// the current match's gain plus the bonus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LazyGain {
    /// Length weight for a rep match against a new match at one position.
    pub rep_weight: i32,
    /// Bonus of the current match against a rep match.
    pub rep_bonus: i32,
    /// Length weight when comparing against lookahead positions.
    pub lookahead_weight: i32,
    /// Bonus of the current match against a new match one byte ahead.
    pub next_bonus: i32,
    /// Bonus of the current match against a new match two bytes ahead.
    pub second_bonus: i32,
    /// Shortest rep match one byte ahead worth comparing.
    pub next_rep_min: u32,
    /// Shortest match (rep or new) two bytes ahead worth comparing.
    pub second_min: u32,
}

impl LazyGain {
    /// Tuned defaults.
    pub const DEFAULT: LazyGain = LazyGain {
        rep_weight: 3,
        rep_bonus: 1,
        lookahead_weight: 4,
        next_bonus: 4,
        second_bonus: 7,
        next_rep_min: 3,
        second_min: 4,
    };
}

impl Default for LazyGain {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Encoder settings for one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Lzma2Params {
    /// Literal context bits.
    pub lc: u32,
    /// Literal position bits.
    pub lp: u32,
    /// Position bits.
    pub pb: u32,
    /// Matches at least this long are taken without parsing.
    pub fast_length: usize,
    /// Hash chain steps per search (hybrid parser).
    pub match_cycles: u32,
    /// Parser.
    pub strategy: Strategy,
    /// Hash chain log (hybrid parser).
    pub chain_log: u32,
    /// Fast parser weights.
    pub lazy: LazyGain,
}

impl Default for Lzma2Params {
    fn default() -> Self {
        Self {
            lc: model::LC_DEFAULT,
            lp: model::LP_DEFAULT,
            pb: model::PB_DEFAULT,
            fast_length: 48,
            match_cycles: 1,
            strategy: Strategy::Ultra,
            chain_log: 9,
            lazy: LazyGain::DEFAULT,
        }
    }
}

impl Lzma2Params {
    /// Properties actually used: lc is lowered so that lc + lp fits LZMA2.
    pub fn effective_properties(&self) -> LzmaProperties {
        let lp = self.lp.min(model::LCLPPB_MAX);
        let lc = self.lc.min(model::LCLP_MAX - lp);
        LzmaProperties::new(lc, lp, self.pb.min(model::LCLPPB_MAX))
    }
}

/// Progress counters shared by every job of a context.
#[derive(Debug, Default)]
pub struct JobProgress {
    bytes_in: AtomicU64,
    bytes_out: AtomicU64,
    canceled: AtomicBool,
}

impl JobProgress {
    /// Zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a finished chunk.
    pub fn add(&self, bytes_in: usize, bytes_out: usize) {
        self.bytes_in.fetch_add(bytes_in as u64, Ordering::Relaxed);
        self.bytes_out.fetch_add(bytes_out as u64, Ordering::Relaxed);
    }

    /// Input bytes encoded.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in.load(Ordering::Relaxed)
    }

    /// Output bytes produced.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out.load(Ordering::Relaxed)
    }

    /// Ask running jobs to stop after their current chunk.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }

    /// Zero the counters and clear the cancel flag.
    pub fn reset(&self) {
        self.bytes_in.store(0, Ordering::Relaxed);
        self.bytes_out.store(0, Ordering::Relaxed);
        self.canceled.store(false, Ordering::Release);
    }
}

/// Dictionary size class written in the stream property byte.
pub fn dict_size_prop(dictionary_size: usize) -> u8 {
    for bit in 11u32..32 {
        if (2usize << bit) >= dictionary_size {
            return ((bit - 11) * 2) as u8;
        }
        if (3usize << bit) >= dictionary_size {
            return ((bit - 11) * 2 + 1) as u8;
        }
    }
    40
}

/// Dictionary size a property byte class stands for.
pub fn dict_size_from_prop(prop: u8) -> Option<usize> {
    match prop {
        0..=39 => Some((2 | (prop as usize & 1)) << (prop / 2 + 11)),
        40 => Some(u32::MAX as usize),
        _ => None,
    }
}

/// Worst-case output size for `src_len` input bytes, including the property
/// byte, terminator and checksum.
pub fn compress_bound(src_len: usize) -> usize {
    let average = (chunk::CHUNK_SIZE - chunk::CHUNK_SIZE / 16) / 2;
    src_len + src_len.div_ceil(average) * chunk::STORED_HEADER_SIZE + 6
}

/// Estimated memory for `threads` encoders.
pub fn memory_usage(chain_log: u32, strategy: Strategy, threads: usize) -> usize {
    let per_encoder = Lzma2Encoder::memory_usage()
        + if strategy == Strategy::Ultra {
            hash::HashChain3::memory_usage(chain_log)
        } else {
            0
        };
    per_encoder * threads.max(1)
}
