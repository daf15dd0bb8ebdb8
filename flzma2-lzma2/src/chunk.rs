//! LZMA2 chunk framing.
//!
//! Every chunk starts with a control byte:
//!
//! ```text
//! 0x00                end of stream
//! 0x01                stored, dictionary reset
//! 0x02                stored, no reset
//! 1RRUUUUU            compressed; RR = reset level, UUUUU = size bits 16..20
//! ```
//!
//! followed by the big-endian `unpacked - 1` (16 bits), and for compressed
//! chunks `packed - 1` (16 bits) plus a property byte when RR >= 2.

use crate::model::LzmaProperties;
use flzma2_core::error::{Flzma2Error, Result};
use flzma2_radix::{DataBlock, TableCells};
use serde::Serialize;

/// Largest compressed payload of one chunk.
pub const MAX_CHUNK_COMPRESSED_SIZE: usize = 1 << 16;

/// Largest uncompressed size of one compressed chunk.
pub const MAX_CHUNK_UNCOMPRESSED_SIZE: usize = 1 << 21;

/// Largest payload of one stored chunk.
pub const MAX_STORED_CHUNK_SIZE: usize = 1 << 16;

/// Compressed output at which the encoder closes a chunk.
pub const CHUNK_SIZE: usize = MAX_CHUNK_COMPRESSED_SIZE - 2048;

/// Integer square root of [`CHUNK_SIZE`].
pub(crate) const SQRT_CHUNK_SIZE: u64 = 252;

/// Header bytes of a compressed chunk without the property byte.
pub const CHUNK_HEADER_SIZE: usize = 5;

/// Header bytes of a stored chunk.
pub const STORED_HEADER_SIZE: usize = 3;

/// Control byte constants.
pub mod control {
    /// End of stream marker.
    pub const END: u8 = 0x00;

    /// Stored chunk with dictionary reset.
    pub const STORED_DICT_RESET: u8 = 0x01;

    /// Stored chunk without reset.
    pub const STORED: u8 = 0x02;

    /// Compressed chunk flag.
    pub const COMPRESSED: u8 = 0x80;

    /// Position of the reset level.
    pub const RESET_SHIFT: u32 = 5;

    /// No reset.
    pub const RESET_NOTHING: u8 = 0;

    /// State reset.
    pub const RESET_STATE: u8 = 1 << RESET_SHIFT;

    /// State reset with new properties.
    pub const RESET_STATE_PROPS: u8 = 2 << RESET_SHIFT;

    /// State, properties and dictionary reset.
    pub const RESET_ALL: u8 = 3 << RESET_SHIFT;

    /// Bits 16..20 of `unpacked - 1`.
    pub const SIZE_HIGH_MASK: u8 = 0x1F;

    /// Check if control byte indicates a compressed chunk.
    #[inline]
    pub const fn is_compressed(ctrl: u8) -> bool {
        ctrl & COMPRESSED != 0
    }

    /// Reset level of a compressed chunk, 0..=3.
    #[inline]
    pub const fn reset_level(ctrl: u8) -> u8 {
        (ctrl >> RESET_SHIFT) & 3
    }
}

/// Physical form of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// Raw bytes.
    Stored,
    /// Range-coded.
    Compressed,
}

/// What a chunk resets before it is decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkReset {
    /// Nothing.
    None,
    /// Coder state.
    State,
    /// Coder state and properties.
    StateProperties,
    /// Dictionary, state and properties.
    Dictionary,
}

/// Header information for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChunkInfo {
    /// Stored or compressed.
    pub kind: ChunkKind,
    /// Reset level.
    pub reset: ChunkReset,
    /// Decoded size.
    pub unpacked_size: usize,
    /// Payload size in the stream.
    pub packed_size: usize,
    /// Properties carried by the chunk, if any.
    #[serde(skip)]
    pub properties: Option<LzmaProperties>,
    /// Offset of the control byte within the chunk sequence.
    pub offset: usize,
}

impl ChunkInfo {
    /// Bytes of header in front of the payload.
    pub fn header_size(&self) -> usize {
        match self.kind {
            ChunkKind::Stored => STORED_HEADER_SIZE,
            ChunkKind::Compressed => {
                CHUNK_HEADER_SIZE + usize::from(self.reset >= ChunkReset::StateProperties)
            }
        }
    }

    /// Header plus payload.
    pub fn total_size(&self) -> usize {
        self.header_size() + self.packed_size
    }
}

/// Parse one chunk header at `offset`. Returns `None` at the end marker.
pub fn parse_chunk_header(chunks: &[u8], offset: usize) -> Result<Option<ChunkInfo>> {
    let Some(&ctrl) = chunks.get(offset) else {
        return Err(Flzma2Error::corrupted(offset as u64, "missing end of stream marker"));
    };
    if ctrl == control::END {
        return Ok(None);
    }
    let read_u16 = |at: usize| -> Result<usize> {
        match chunks.get(at..at + 2) {
            Some(b) => Ok(((b[0] as usize) << 8) | b[1] as usize),
            None => Err(Flzma2Error::corrupted(at as u64, "truncated chunk header")),
        }
    };

    let info = if control::is_compressed(ctrl) {
        let unpacked_size = ((((ctrl & control::SIZE_HIGH_MASK) as usize) << 16) | read_u16(offset + 1)?) + 1;
        let packed_size = read_u16(offset + 3)? + 1;
        let reset = match control::reset_level(ctrl) {
            0 => ChunkReset::None,
            1 => ChunkReset::State,
            2 => ChunkReset::StateProperties,
            _ => ChunkReset::Dictionary,
        };
        let properties = if reset >= ChunkReset::StateProperties {
            let at = offset + CHUNK_HEADER_SIZE;
            let Some(&byte) = chunks.get(at) else {
                return Err(Flzma2Error::corrupted(at as u64, "truncated chunk header"));
            };
            Some(
                LzmaProperties::from_byte(byte)
                    .ok_or_else(|| Flzma2Error::corrupted(at as u64, "invalid lc/lp/pb byte"))?,
            )
        } else {
            None
        };
        ChunkInfo {
            kind: ChunkKind::Compressed,
            reset,
            unpacked_size,
            packed_size,
            properties,
            offset,
        }
    } else {
        let reset = match ctrl {
            control::STORED_DICT_RESET => ChunkReset::Dictionary,
            control::STORED => ChunkReset::None,
            _ => {
                return Err(Flzma2Error::corrupted(
                    offset as u64,
                    format!("invalid control byte {ctrl:#04x}"),
                ));
            }
        };
        let size = read_u16(offset + 1)? + 1;
        ChunkInfo {
            kind: ChunkKind::Stored,
            reset,
            unpacked_size: size,
            packed_size: size,
            properties: None,
            offset,
        }
    };

    if offset + info.total_size() > chunks.len() {
        return Err(Flzma2Error::corrupted(offset as u64, "chunk payload extends past the input"));
    }
    Ok(Some(info))
}

/// Walk a chunk sequence, starting at its first control byte, without
/// decoding any payload.
pub fn chunk_infos(chunks: &[u8]) -> Result<Vec<ChunkInfo>> {
    let mut infos = Vec::new();
    let mut offset = 0;
    while let Some(info) = parse_chunk_header(chunks, offset)? {
        offset += info.total_size();
        infos.push(info);
    }
    Ok(infos)
}

/// Offset just past the end marker of a chunk sequence.
pub fn chunks_end(chunks: &[u8]) -> Result<usize> {
    let mut offset = 0;
    while let Some(info) = parse_chunk_header(chunks, offset)? {
        offset += info.total_size();
    }
    Ok(offset + 1)
}

const MIN_TEST_CHUNK_SIZE: usize = 0x4000;

/// Lower bound on saved bytes, as a shift of the compressed size, below
/// which the next chunk is tested for incompressibility.
pub(crate) const RANDOM_FILTER_MARGIN_BITS: u32 = 8;

/// Short matches farther than this are counted at their full length.
const MAX_DIST_TABLE: [[usize; 5]; 3] = [
    [0, 0, 0, 1 << 6, 1 << 14],
    [0, 0, 1 << 6, 1 << 14, 1 << 22],
    [0, 0, 1 << 6, 1 << 14, 1 << 22],
];
const MARGIN_DIVISOR: [usize; 3] = [60, 45, 120];
const DEVIATION_LIMIT: [u64; 3] = [24, 24, 20];

fn isqrt(mut op: u64) -> u64 {
    if op == 0 {
        return 0;
    }
    let mut res = 0u64;
    let mut one = 1u64 << ((63 - op.leading_zeros()) & !1);
    while one != 0 {
        if op >= res + one {
            op -= res + one;
            res += 2 * one;
        }
        res >>= 1;
        one >>= 2;
    }
    res
}

/// Guess whether the chunk starting at `start` would not compress.
///
/// The match table is sampled first: runs of literals and short or distant
/// matches add to a cost, and any chunk whose cost falls behind the position
/// by the strategy's margin is considered compressible. Otherwise the byte
/// histogram decides; a flat distribution means random data.
pub fn is_chunk_incompressible<T: TableCells>(
    cells: &T,
    block: &DataBlock<'_>,
    start: usize,
    strategy: usize,
) -> bool {
    if block.end < start + MIN_TEST_CHUNK_SIZE {
        return false;
    }
    let strategy = strategy.min(2);
    let end = (start + CHUNK_SIZE).min(block.end);
    let chunk_size = end - start;
    let terminator = start + chunk_size / MARGIN_DIVISOR[strategy];

    let mut count = 0usize;
    let mut prev_dist = 0usize;
    let mut pos = start;
    while pos < end {
        match cells.entry(pos) {
            Some((link, length)) if (link as usize) < pos && length > 0 => {
                let length = length as usize;
                let dist = pos - link as usize;
                if length > 4 {
                    count += usize::from(dist != prev_dist);
                } else if dist < MAX_DIST_TABLE[strategy][length] {
                    count += 1;
                } else {
                    count += length;
                }
                pos += length;
                prev_dist = dist;
            }
            _ => {
                pos += 1;
                count += 1;
                prev_dist = 0;
            }
        }
        if count + terminator <= pos {
            return false;
        }
    }

    let mut char_count = [0u64; 256];
    for &byte in &block.data[start..end] {
        char_count[byte as usize] += 4;
    }
    let avg = (chunk_size / 64) as i64;
    let total: u64 = char_count
        .iter()
        .map(|&c| {
            let delta = c as i64 - avg;
            (delta * delta) as u64
        })
        .sum();
    let sqrt_chunk = if chunk_size == CHUNK_SIZE {
        SQRT_CHUNK_SIZE
    } else {
        isqrt(chunk_size as u64)
    };
    isqrt(total) / sqrt_chunk <= DEVIATION_LIMIT[strategy]
}

#[cfg(test)]
mod tests {
    use super::*;
    use flzma2_radix::BitpackCells;

    fn random_bytes(size: usize, mut seed: u64) -> Vec<u8> {
        (0..size)
            .map(|_| {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                (seed >> 33) as u8
            })
            .collect()
    }

    #[test]
    fn test_isqrt() {
        assert_eq!(isqrt(0), 0);
        assert_eq!(isqrt(1), 1);
        assert_eq!(isqrt(63_488), 251);
        assert_eq!(isqrt(1 << 40), 1 << 20);
        assert_eq!(isqrt(99), 9);
    }

    #[test]
    fn test_parse_headers() {
        // stored with dict reset, 3 bytes; compressed state+props reset; end
        let mut stream = vec![0x01, 0x00, 0x02, b'a', b'b', b'c'];
        stream.extend([0xC1, 0x23, 0x45, 0x00, 0x04, 93, 0, 1, 2, 3, 4]);
        stream.push(control::END);

        let infos = chunk_infos(&stream).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].kind, ChunkKind::Stored);
        assert_eq!(infos[0].reset, ChunkReset::Dictionary);
        assert_eq!(infos[0].unpacked_size, 3);
        assert_eq!(infos[1].kind, ChunkKind::Compressed);
        assert_eq!(infos[1].reset, ChunkReset::StateProperties);
        assert_eq!(infos[1].unpacked_size, 0x12346);
        assert_eq!(infos[1].packed_size, 5);
        assert_eq!(infos[1].properties, Some(LzmaProperties::new(3, 0, 2)));
        assert_eq!(infos[1].offset, 6);
        assert_eq!(chunks_end(&stream).unwrap(), stream.len());
    }

    #[test]
    fn test_malformed_headers() {
        assert!(chunk_infos(&[]).is_err());
        assert!(chunk_infos(&[0x03, 0, 0]).is_err());
        assert!(chunk_infos(&[0x02, 0x00]).is_err());
        // Payload runs past the end.
        assert!(chunk_infos(&[0x02, 0x00, 0x09, 1, 2]).is_err());
        // Property byte with lc + lp > 4.
        assert!(chunk_infos(&[0xE0, 0, 0, 0, 4, 13, 0, 0, 0, 0, 0, 0]).is_err());
    }

    #[test]
    fn test_random_data_is_incompressible() {
        let data = random_bytes(1 << 17, 7);
        let cells = BitpackCells::new(data.len()).unwrap();
        let block = DataBlock::new(&data, 0, data.len());
        for strategy in 0..3 {
            assert!(is_chunk_incompressible(&cells, &block, 0, strategy));
        }
    }

    #[test]
    fn test_matches_make_data_compressible() {
        let data = b"abcdefgh".repeat(1 << 14);
        let cells = BitpackCells::new(data.len()).unwrap();
        for pos in 8..data.len() {
            cells.set_link_and_length(pos, (pos - 8) as u32, 63);
        }
        let block = DataBlock::new(&data, 0, data.len());
        assert!(!is_chunk_incompressible(&cells, &block, 0, 1));
        // Too little data left to test.
        assert!(!is_chunk_incompressible(&cells, &block, data.len() - 100, 1));
    }
}
