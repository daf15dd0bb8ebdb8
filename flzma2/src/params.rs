//! Compression parameters, level presets and their bounds.
//!
//! [`CompressionParams`] holds every tunable of the match finder and the
//! encoder. Presets come from two tables of ten levels each: the normal
//! table, which trades ratio for speed as the level drops, and the high
//! table, which always uses the deepest search and grows only the
//! dictionary and the hybrid hash chain.

use flzma2_core::{Flzma2Error, Result};
use flzma2_lzma2::model::{LC_DEFAULT, LCLPPB_MAX, LP_DEFAULT, PB_DEFAULT};
use flzma2_lzma2::{
    CHAIN_LOG_MAX, CHAIN_LOG_MIN, FAST_LENGTH_MAX, FAST_LENGTH_MIN, LazyGain, Lzma2Params,
    MATCH_CYCLES_MAX, MATCH_CYCLES_MIN, Strategy,
};
use flzma2_radix::RadixParams;
use flzma2_radix::finder::{
    BUFFER_RESIZE_DEFAULT, BUFFER_RESIZE_MAX, DEPTH_MAX, DEPTH_MIN, OVERLAP_FRACTION_MAX,
};
use serde::{Deserialize, Serialize};

/// Highest level of the normal table.
pub const MAX_LEVEL: u32 = 10;
/// Highest level of the high-compression table.
pub const MAX_HIGH_LEVEL: u32 = 10;
/// Level used when none is given.
pub const DEFAULT_LEVEL: u32 = 6;

/// Smallest dictionary log.
pub const DICTIONARY_LOG_MIN: u32 = 20;
/// Largest dictionary log.
pub const DICTIONARY_LOG_MAX: u32 = 30;
/// Smallest dictionary size.
pub const DICTIONARY_SIZE_MIN: usize = 1 << DICTIONARY_LOG_MIN;
/// Largest dictionary size.
pub const DICTIONARY_SIZE_MAX: usize = 1 << DICTIONARY_LOG_MAX;

/// Smallest non-zero reset interval, in dictionaries.
pub const RESET_INTERVAL_MIN: u32 = 1;
/// Largest reset interval, in dictionaries.
pub const RESET_INTERVAL_MAX: u32 = 16;
/// Reset interval of a fresh context.
pub const RESET_INTERVAL_DEFAULT: u32 = 4;

/// Most compression threads a context accepts.
pub const MAX_THREADS: usize = 200;

const MIB: usize = 1 << 20;

/// One row of a level table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LevelParams {
    /// Dictionary size in bytes.
    pub dictionary_size: usize,
    /// Overlap between blocks, in sixteenths of the dictionary.
    pub overlap_fraction: u32,
    /// Hybrid hash chain log.
    pub chain_log: u32,
    /// Log2 of the hybrid hash chain steps per search.
    pub cycles_log: u32,
    /// Match finder search depth.
    pub depth: u32,
    /// Length at which a match is taken without parsing.
    pub fast_length: usize,
    /// Split very long match finder lists through the match buffer.
    pub divide_and_conquer: bool,
    /// Encoder strategy.
    pub strategy: Strategy,
}

const fn row(
    dictionary_mib: usize,
    overlap_fraction: u32,
    chain_log: u32,
    cycles_log: u32,
    depth: u32,
    fast_length: usize,
    divide_and_conquer: bool,
    strategy: Strategy,
) -> LevelParams {
    LevelParams {
        dictionary_size: dictionary_mib * MIB,
        overlap_fraction,
        chain_log,
        cycles_log,
        depth,
        fast_length,
        divide_and_conquer,
        strategy,
    }
}

const NORMAL_LEVELS: [LevelParams; MAX_LEVEL as usize] = [
    row(1, 1, 7, 0, 6, 32, true, Strategy::Fast),
    row(2, 2, 7, 0, 10, 32, true, Strategy::Fast),
    row(2, 2, 7, 0, 10, 32, true, Strategy::Optimal),
    row(4, 2, 7, 0, 26, 40, true, Strategy::Optimal),
    row(8, 2, 8, 0, 42, 48, true, Strategy::Optimal),
    row(16, 2, 9, 0, 42, 48, true, Strategy::Ultra),
    row(32, 2, 10, 0, 50, 64, true, Strategy::Ultra),
    row(64, 2, 11, 1, 62, 96, true, Strategy::Ultra),
    row(64, 4, 12, 2, 90, 273, true, Strategy::Ultra),
    row(128, 2, 14, 3, 254, 273, false, Strategy::Ultra),
];

const HIGH_LEVELS: [LevelParams; MAX_HIGH_LEVEL as usize] = [
    row(1, 4, 9, 2, 254, 273, false, Strategy::Ultra),
    row(2, 4, 10, 2, 254, 273, false, Strategy::Ultra),
    row(4, 4, 11, 2, 254, 273, false, Strategy::Ultra),
    row(8, 4, 12, 2, 254, 273, false, Strategy::Ultra),
    row(16, 4, 13, 3, 254, 273, false, Strategy::Ultra),
    row(32, 4, 14, 3, 254, 273, false, Strategy::Ultra),
    row(64, 4, 14, 4, 254, 273, false, Strategy::Ultra),
    row(128, 4, 14, 4, 254, 273, false, Strategy::Ultra),
    row(256, 4, 14, 5, 254, 273, false, Strategy::Ultra),
    row(512, 4, 14, 5, 254, 273, false, Strategy::Ultra),
];

/// The preset for `level` (1-based) from the normal or high table.
pub fn level_params(level: u32, high: bool) -> Result<LevelParams> {
    let (table, name, max): (&[LevelParams], _, _) = if high {
        (&HIGH_LEVELS, "high compression level", MAX_HIGH_LEVEL)
    } else {
        (&NORMAL_LEVELS, "compression level", MAX_LEVEL)
    };
    if level == 0 || level > max {
        return Err(Flzma2Error::invalid_parameter(name, level as i64, 1, max as i64));
    }
    Ok(table[level as usize - 1])
}

/// A settable (or readable) compression parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Parameter {
    /// Apply a preset level from the current table.
    CompressionLevel,
    /// Select the high-compression table and reapply the level.
    HighCompression,
    /// Dictionary size as a power of two.
    DictionaryLog,
    /// Dictionary size in bytes.
    DictionarySize,
    /// Overlap kept between blocks, in sixteenths of the dictionary.
    OverlapFraction,
    /// Dictionaries compressed between dictionary resets; 0 for never.
    ResetInterval,
    /// Match buffer size adjustment.
    BufferResize,
    /// Hybrid hash chain log.
    ChainLog,
    /// Hybrid hash chain steps per search.
    HybridCycles,
    /// Match finder search depth.
    SearchDepth,
    /// Length at which a match is taken without parsing.
    FastLength,
    /// Split very long match finder lists through the match buffer.
    DivideAndConquer,
    /// Encoder strategy index.
    Strategy,
    /// Literal context bits.
    LiteralCtxBits,
    /// Literal position bits.
    LiteralPosBits,
    /// Position bits.
    PosBits,
    /// Append an XXH32 of the input after the end marker.
    UseChecksum,
    /// Leave out the property byte (and with it the checksum).
    OmitProperties,
    /// Verify every match table after it is built.
    IntegrityCheck,
    /// Number of compression threads (read-only).
    NbThreads,
}

impl Parameter {
    /// Every parameter.
    pub const ALL: [Parameter; 20] = [
        Parameter::CompressionLevel,
        Parameter::HighCompression,
        Parameter::DictionaryLog,
        Parameter::DictionarySize,
        Parameter::OverlapFraction,
        Parameter::ResetInterval,
        Parameter::BufferResize,
        Parameter::ChainLog,
        Parameter::HybridCycles,
        Parameter::SearchDepth,
        Parameter::FastLength,
        Parameter::DivideAndConquer,
        Parameter::Strategy,
        Parameter::LiteralCtxBits,
        Parameter::LiteralPosBits,
        Parameter::PosBits,
        Parameter::UseChecksum,
        Parameter::OmitProperties,
        Parameter::IntegrityCheck,
        Parameter::NbThreads,
    ];

    /// Snake-case name, as used in error messages.
    pub fn name(self) -> &'static str {
        match self {
            Parameter::CompressionLevel => "compression_level",
            Parameter::HighCompression => "high_compression",
            Parameter::DictionaryLog => "dictionary_log",
            Parameter::DictionarySize => "dictionary_size",
            Parameter::OverlapFraction => "overlap_fraction",
            Parameter::ResetInterval => "reset_interval",
            Parameter::BufferResize => "buffer_resize",
            Parameter::ChainLog => "chain_log",
            Parameter::HybridCycles => "hybrid_cycles",
            Parameter::SearchDepth => "search_depth",
            Parameter::FastLength => "fast_length",
            Parameter::DivideAndConquer => "divide_and_conquer",
            Parameter::Strategy => "strategy",
            Parameter::LiteralCtxBits => "literal_ctx_bits",
            Parameter::LiteralPosBits => "literal_pos_bits",
            Parameter::PosBits => "pos_bits",
            Parameter::UseChecksum => "use_checksum",
            Parameter::OmitProperties => "omit_properties",
            Parameter::IntegrityCheck => "integrity_check",
            Parameter::NbThreads => "nb_threads",
        }
    }

    /// Whether the parameter may change while a stream frame is open.
    pub fn is_frame_safe(self) -> bool {
        matches!(
            self,
            Parameter::LiteralCtxBits | Parameter::LiteralPosBits | Parameter::PosBits
        )
    }
}

impl std::fmt::Display for Parameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for Parameter {
    type Err = Flzma2Error;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.replace('-', "_").to_ascii_lowercase();
        Parameter::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| Flzma2Error::invalid_parameter("parameter name", -1, 0, 0))
    }
}

/// Every tunable of the match finder and the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionParams {
    /// Dictionary size in bytes.
    pub dictionary_size: usize,
    /// Overlap kept between blocks, in sixteenths of the dictionary.
    pub overlap_fraction: u32,
    /// Dictionaries compressed between dictionary resets; 0 for never.
    pub reset_interval: u32,
    /// Match buffer size adjustment, 2 is neutral.
    pub buffer_resize: u32,
    /// Hybrid hash chain log.
    pub chain_log: u32,
    /// Hybrid hash chain steps per search.
    pub match_cycles: u32,
    /// Match finder search depth.
    pub depth: u32,
    /// Length at which a match is taken without parsing.
    pub fast_length: usize,
    /// Split very long match finder lists through the match buffer.
    pub divide_and_conquer: bool,
    /// Encoder strategy.
    pub strategy: Strategy,
    /// Literal context bits.
    pub lc: u32,
    /// Literal position bits.
    pub lp: u32,
    /// Position bits.
    pub pb: u32,
}

impl Default for CompressionParams {
    fn default() -> Self {
        let mut params = Self {
            dictionary_size: 0,
            overlap_fraction: 0,
            reset_interval: RESET_INTERVAL_DEFAULT,
            buffer_resize: BUFFER_RESIZE_DEFAULT,
            chain_log: 0,
            match_cycles: 1,
            depth: 0,
            fast_length: 0,
            divide_and_conquer: true,
            strategy: Strategy::Ultra,
            lc: LC_DEFAULT,
            lp: LP_DEFAULT,
            pb: PB_DEFAULT,
        };
        params.apply_level(&NORMAL_LEVELS[DEFAULT_LEVEL as usize - 1]);
        params
    }
}

impl CompressionParams {
    /// Parameters of a preset level.
    pub fn from_level(level: u32, high: bool) -> Result<Self> {
        let mut params = Self::default();
        params.apply_level(&level_params(level, high)?);
        Ok(params)
    }

    /// Overwrite everything a level row covers. The reset interval is kept.
    pub fn apply_level(&mut self, level: &LevelParams) {
        self.dictionary_size = level.dictionary_size;
        self.overlap_fraction = level.overlap_fraction;
        self.chain_log = level.chain_log;
        self.match_cycles = 1 << level.cycles_log;
        self.depth = level.depth;
        self.fast_length = level.fast_length;
        self.divide_and_conquer = level.divide_and_conquer;
        self.strategy = level.strategy;
        self.buffer_resize = BUFFER_RESIZE_DEFAULT;
        self.lc = LC_DEFAULT;
        self.lp = LP_DEFAULT;
        self.pb = PB_DEFAULT;
    }

    /// Check every field against its bound. lc + lp above 4 is accepted
    /// here; lc is lowered when encoding.
    pub fn validate(&self) -> Result<()> {
        bounded(
            "dictionary_size",
            self.dictionary_size,
            DICTIONARY_SIZE_MIN,
            DICTIONARY_SIZE_MAX,
        )?;
        bounded("overlap_fraction", self.overlap_fraction, 0, OVERLAP_FRACTION_MAX)?;
        if self.reset_interval != 0 {
            bounded(
                "reset_interval",
                self.reset_interval,
                RESET_INTERVAL_MIN,
                RESET_INTERVAL_MAX,
            )?;
        }
        bounded("buffer_resize", self.buffer_resize, 0, BUFFER_RESIZE_MAX)?;
        bounded("chain_log", self.chain_log, CHAIN_LOG_MIN, CHAIN_LOG_MAX)?;
        bounded(
            "hybrid_cycles",
            self.match_cycles,
            MATCH_CYCLES_MIN,
            MATCH_CYCLES_MAX,
        )?;
        bounded("search_depth", self.depth, DEPTH_MIN, DEPTH_MAX)?;
        bounded("fast_length", self.fast_length, FAST_LENGTH_MIN, FAST_LENGTH_MAX)?;
        bounded("literal_ctx_bits", self.lc, 0, LCLPPB_MAX)?;
        bounded("literal_pos_bits", self.lp, 0, LCLPPB_MAX)?;
        bounded("pos_bits", self.pb, 0, LCLPPB_MAX)?;
        Ok(())
    }

    /// Set one field after checking its bound. Parameters that are not
    /// fields of this struct are rejected with [`Flzma2Error::Internal`].
    pub fn set(&mut self, param: Parameter, value: usize) -> Result<()> {
        let name = param.name();
        match param {
            Parameter::DictionaryLog => {
                bounded(name, value, DICTIONARY_LOG_MIN as usize, DICTIONARY_LOG_MAX as usize)?;
                self.dictionary_size = 1 << value;
            }
            Parameter::DictionarySize => {
                bounded(name, value, DICTIONARY_SIZE_MIN, DICTIONARY_SIZE_MAX)?;
                self.dictionary_size = value;
            }
            Parameter::OverlapFraction => {
                self.overlap_fraction = bounded(name, value, 0, OVERLAP_FRACTION_MAX as usize)? as u32;
            }
            Parameter::ResetInterval => {
                if value != 0 {
                    bounded(
                        name,
                        value,
                        RESET_INTERVAL_MIN as usize,
                        RESET_INTERVAL_MAX as usize,
                    )?;
                }
                self.reset_interval = value as u32;
            }
            Parameter::BufferResize => {
                self.buffer_resize = bounded(name, value, 0, BUFFER_RESIZE_MAX as usize)? as u32;
            }
            Parameter::ChainLog => {
                self.chain_log =
                    bounded(name, value, CHAIN_LOG_MIN as usize, CHAIN_LOG_MAX as usize)? as u32;
            }
            Parameter::HybridCycles => {
                self.match_cycles = bounded(
                    name,
                    value,
                    MATCH_CYCLES_MIN as usize,
                    MATCH_CYCLES_MAX as usize,
                )? as u32;
            }
            Parameter::SearchDepth => {
                self.depth = bounded(name, value, DEPTH_MIN as usize, DEPTH_MAX as usize)? as u32;
            }
            Parameter::FastLength => {
                self.fast_length = bounded(name, value, FAST_LENGTH_MIN, FAST_LENGTH_MAX)?;
            }
            Parameter::DivideAndConquer => self.divide_and_conquer = value != 0,
            Parameter::Strategy => {
                let index = bounded(name, value, 0, Strategy::ALL.len() - 1)?;
                self.strategy = Strategy::ALL[index];
            }
            Parameter::LiteralCtxBits => {
                self.lc = bounded(name, value, 0, LCLPPB_MAX as usize)? as u32;
                self.check_lclp(name, value)?;
            }
            Parameter::LiteralPosBits => {
                self.lp = bounded(name, value, 0, LCLPPB_MAX as usize)? as u32;
                self.check_lclp(name, value)?;
            }
            Parameter::PosBits => {
                self.pb = bounded(name, value, 0, LCLPPB_MAX as usize)? as u32;
            }
            _ => return Err(Flzma2Error::internal(format!("{name} is not a field parameter"))),
        }
        Ok(())
    }

    /// The stored value stays; the caller is told lc + lp overflows.
    fn check_lclp(&self, name: &'static str, value: usize) -> Result<()> {
        if self.lc + self.lp > LCLPPB_MAX {
            let others = (self.lc + self.lp) as usize - value;
            return Err(Flzma2Error::invalid_parameter(
                name,
                value as i64,
                0,
                LCLPPB_MAX as i64 - others as i64,
            ));
        }
        Ok(())
    }

    /// Read one field. `None` for parameters that are not fields.
    pub fn get(&self, param: Parameter) -> Option<usize> {
        let value = match param {
            Parameter::DictionaryLog => self.dictionary_log() as usize,
            Parameter::DictionarySize => self.dictionary_size,
            Parameter::OverlapFraction => self.overlap_fraction as usize,
            Parameter::ResetInterval => self.reset_interval as usize,
            Parameter::BufferResize => self.buffer_resize as usize,
            Parameter::ChainLog => self.chain_log as usize,
            Parameter::HybridCycles => self.match_cycles as usize,
            Parameter::SearchDepth => self.depth as usize,
            Parameter::FastLength => self.fast_length,
            Parameter::DivideAndConquer => self.divide_and_conquer as usize,
            Parameter::Strategy => self.strategy.index(),
            Parameter::LiteralCtxBits => self.lc as usize,
            Parameter::LiteralPosBits => self.lp as usize,
            Parameter::PosBits => self.pb as usize,
            _ => return None,
        };
        Some(value)
    }

    /// Smallest log, at least the minimum, whose power covers the dictionary.
    pub fn dictionary_log(&self) -> u32 {
        let mut log = DICTIONARY_LOG_MIN;
        while (1usize << log) < self.dictionary_size {
            log += 1;
        }
        log
    }

    /// Match finder view of these parameters.
    pub fn radix_params(&self) -> RadixParams {
        RadixParams {
            dictionary_size: self.dictionary_size.min(DICTIONARY_SIZE_MAX),
            match_buffer_resize: self.buffer_resize,
            overlap_fraction: self.overlap_fraction,
            divide_and_conquer: self.divide_and_conquer,
            depth: self.depth,
        }
    }

    /// Encoder view of these parameters.
    pub fn lzma2_params(&self) -> Lzma2Params {
        Lzma2Params {
            lc: self.lc,
            lp: self.lp,
            pb: self.pb,
            fast_length: self.fast_length,
            match_cycles: self.match_cycles,
            strategy: self.strategy,
            chain_log: self.chain_log,
            lazy: LazyGain::DEFAULT,
        }
    }
}

fn bounded<T>(name: &'static str, value: T, min: T, max: T) -> Result<T>
where
    T: PartialOrd + Copy + TryInto<i64>,
{
    if value < min || value > max {
        let wide = |v: T| v.try_into().unwrap_or(i64::MAX);
        return Err(Flzma2Error::invalid_parameter(name, wide(value), wide(min), wide(max)));
    }
    Ok(value)
}
