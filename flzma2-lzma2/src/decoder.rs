//! LZMA2 decoder used to verify encoder output.
//!
//! Decodes a chunk sequence up to its end marker, honoring dictionary,
//! state and property resets and stored chunks. Malformed input yields
//! [`Flzma2Error::CorruptedData`] with the offset of the fault.
//!
//! A stream as written by the engine is laid out as:
//!
//! ```text
//! [property byte] chunk chunk ... 0x00 [XXH32 little-endian]
//! ```
//!
//! The property byte holds the dictionary size class in its low six bits
//! and [`CHECKSUM_FLAG`] when a digest follows the end marker.

use crate::chunk::{ChunkKind, ChunkReset, parse_chunk_header};
use crate::model::{
    DIST_ALIGN_BITS, DIST_SLOT_BITS, END_POS_MODEL_INDEX, LEN_HIGH_BITS, LEN_LOW_BITS, LEN_LOW_SYMBOLS,
    LEN_MID_BITS, LEN_MID_SYMBOLS, LengthModel, LiteralModel, LzmaModel, LzmaProperties, MATCH_LEN_MIN,
    START_POS_MODEL_INDEX, footer_offset, len_to_dist_state,
};
use crate::range_coder::RangeDecoder;
use flzma2_core::error::{Flzma2Error, Result};
use flzma2_core::xxhash::{DIGEST_SIZE, xxhash32};
use serde::Serialize;
use tracing::trace;

/// Property byte flag marking a trailing XXH32 digest.
pub const CHECKSUM_FLAG: u8 = 0x40;

/// Property byte bits holding the dictionary size class.
pub const DICT_PROP_MASK: u8 = 0x3F;

/// Largest valid dictionary size class.
pub const DICT_PROP_MAX: u8 = 40;

/// Summary of a stream, read from its headers only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    /// Dictionary size class from the property byte.
    pub dict_prop: u8,
    /// Dictionary size the class stands for.
    pub dictionary_size: usize,
    /// Whether an XXH32 digest follows the end marker.
    pub has_checksum: bool,
    /// Total decoded size.
    pub unpacked_size: u64,
    /// Total stream size including property byte and digest.
    pub packed_size: u64,
    /// Number of compressed chunks.
    pub compressed_chunks: usize,
    /// Number of stored chunks.
    pub stored_chunks: usize,
    /// Number of chunks that reset the dictionary.
    pub dictionary_resets: usize,
}

/// Split a property byte into dictionary class and checksum flag.
pub fn parse_stream_prop(prop: u8) -> Result<(u8, bool)> {
    let dict_prop = prop & DICT_PROP_MASK;
    if dict_prop > DICT_PROP_MAX || prop & !(DICT_PROP_MASK | CHECKSUM_FLAG) != 0 {
        return Err(Flzma2Error::corrupted(0, format!("invalid property byte {prop:#04x}")));
    }
    Ok((dict_prop, prop & CHECKSUM_FLAG != 0))
}

/// Decoder state carried across chunks.
#[derive(Debug)]
pub struct Lzma2Decoder {
    model: LzmaModel,
    lit_pos_mask: usize,
    pos_mask: usize,
    dict_start: usize,
    need_dictionary_reset: bool,
    need_properties: bool,
}

impl Lzma2Decoder {
    /// Create a decoder expecting a dictionary reset first.
    pub fn new() -> Self {
        let props = LzmaProperties::default();
        Self {
            model: LzmaModel::new(props),
            lit_pos_mask: 0,
            pos_mask: (1 << props.pb) - 1,
            dict_start: 0,
            need_dictionary_reset: true,
            need_properties: true,
        }
    }

    /// Decode chunks from `chunks` up to and including the end marker,
    /// appending to `out`. `base_offset` is the stream offset of
    /// `chunks[0]`. Returns the number of bytes consumed.
    pub fn decode(&mut self, chunks: &[u8], base_offset: u64, out: &mut Vec<u8>) -> Result<usize> {
        let mut offset = 0;
        loop {
            let info = parse_chunk_header(chunks, offset).map_err(|e| rebase(e, base_offset))?;
            let Some(info) = info else {
                return Ok(offset + 1);
            };
            let stream_offset = base_offset + offset as u64;

            if info.reset == ChunkReset::Dictionary {
                self.dict_start = out.len();
                self.need_dictionary_reset = false;
                self.need_properties = true;
            } else if self.need_dictionary_reset {
                return Err(Flzma2Error::corrupted(stream_offset, "first chunk does not reset the dictionary"));
            }

            let payload_start = offset + info.header_size();
            let payload = &chunks[payload_start..payload_start + info.packed_size];
            match info.kind {
                ChunkKind::Stored => out.extend_from_slice(payload),
                ChunkKind::Compressed => {
                    if let Some(props) = info.properties {
                        self.set_properties(props);
                        self.need_properties = false;
                    } else if self.need_properties {
                        return Err(Flzma2Error::corrupted(stream_offset, "chunk needs properties"));
                    } else if info.reset == ChunkReset::State {
                        self.model.reset();
                    }
                    self.decode_compressed(payload, base_offset + payload_start as u64, info.unpacked_size, out)?;
                }
            }
            trace!(offset, kind = ?info.kind, unpacked = info.unpacked_size, "decoded chunk");
            offset += info.total_size();
        }
    }

    fn set_properties(&mut self, props: LzmaProperties) {
        self.model.reset_with(props);
        self.lit_pos_mask = (1 << props.lp) - 1;
        self.pos_mask = (1 << props.pb) - 1;
    }

    fn decode_compressed(&mut self, payload: &[u8], base_offset: u64, size: usize, out: &mut Vec<u8>) -> Result<()> {
        let mut rc = RangeDecoder::new(payload, base_offset)?;
        let end = out.len() + size;
        let lc = self.model.props.lc;
        let model = &mut self.model;

        while out.len() < end {
            let pos = out.len() - self.dict_start;
            let pos_state = pos & self.pos_mask;
            let state = model.state;

            if rc.decode_bit(&mut model.is_match[state.value()][pos_state])? == 0 {
                let prev_byte = if pos > 0 { out[out.len() - 1] } else { 0 };
                let index = LiteralModel::get_state(pos, prev_byte, lc, self.lit_pos_mask);
                let probs = &mut model.literal.probs[index];
                let mut symbol = 1u32;
                if state.is_literal() {
                    while symbol < 0x100 {
                        symbol = (symbol << 1) | rc.decode_bit(&mut probs[symbol as usize])?;
                    }
                } else {
                    let rep0 = model.reps[0] as usize;
                    if rep0 >= pos {
                        return Err(Flzma2Error::corrupted(base_offset + rc.position() as u64, "distance too large"));
                    }
                    let mut match_byte = out[out.len() - rep0 - 1] as u32;
                    let mut offs = 0x100u32;
                    while symbol < 0x100 {
                        match_byte <<= 1;
                        let match_bit = match_byte & offs;
                        let bit = rc.decode_bit(&mut probs[(offs + match_bit + symbol) as usize])?;
                        symbol = (symbol << 1) | bit;
                        if bit == 0 {
                            offs &= !match_bit;
                        } else {
                            offs &= match_bit;
                        }
                    }
                }
                out.push(symbol as u8);
                model.state = state.after_literal();
                continue;
            }

            let len = if rc.decode_bit(&mut model.is_rep[state.value()])? == 0 {
                let len = decode_length(&mut rc, &mut model.match_len, pos_state)?;
                let dist = decode_distance(&mut rc, model, len)?;
                if dist == u32::MAX {
                    return Err(Flzma2Error::corrupted(
                        base_offset + rc.position() as u64,
                        "end marker inside an LZMA2 chunk",
                    ));
                }
                let reps = &mut model.reps;
                reps[3] = reps[2];
                reps[2] = reps[1];
                reps[1] = reps[0];
                reps[0] = dist;
                model.state = state.after_match();
                len
            } else if rc.decode_bit(&mut model.is_rep0[state.value()])? == 0 {
                if rc.decode_bit(&mut model.is_rep0_long[state.value()][pos_state])? == 0 {
                    model.state = state.after_short_rep();
                    1
                } else {
                    model.state = state.after_rep();
                    decode_length(&mut rc, &mut model.rep_len, pos_state)?
                }
            } else {
                let reps = &mut model.reps;
                let dist = if rc.decode_bit(&mut model.is_rep1[state.value()])? == 0 {
                    reps[1]
                } else {
                    let dist = if rc.decode_bit(&mut model.is_rep2[state.value()])? == 0 {
                        reps[2]
                    } else {
                        let dist = reps[3];
                        reps[3] = reps[2];
                        dist
                    };
                    reps[2] = reps[1];
                    dist
                };
                reps[1] = reps[0];
                reps[0] = dist;
                model.state = state.after_rep();
                decode_length(&mut rc, &mut model.rep_len, pos_state)?
            };

            let dist = model.reps[0] as usize;
            if dist >= pos {
                return Err(Flzma2Error::corrupted(base_offset + rc.position() as u64, "distance too large"));
            }
            if out.len() + len > end {
                return Err(Flzma2Error::corrupted(
                    base_offset + rc.position() as u64,
                    "match crosses the chunk end",
                ));
            }
            let src = out.len() - dist - 1;
            for i in 0..len {
                let byte = out[src + i];
                out.push(byte);
            }
        }
        Ok(())
    }
}

impl Default for Lzma2Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_length(rc: &mut RangeDecoder<'_>, lm: &mut LengthModel, pos_state: usize) -> Result<usize> {
    let sym = if rc.decode_bit(&mut lm.choice)? == 0 {
        rc.decode_bit_tree(&mut lm.low[pos_state], LEN_LOW_BITS)? as usize
    } else if rc.decode_bit(&mut lm.choice2)? == 0 {
        LEN_LOW_SYMBOLS + rc.decode_bit_tree(&mut lm.mid[pos_state], LEN_MID_BITS)? as usize
    } else {
        LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS + rc.decode_bit_tree(&mut lm.high, LEN_HIGH_BITS)? as usize
    };
    Ok(sym + MATCH_LEN_MIN)
}

fn decode_distance(rc: &mut RangeDecoder<'_>, model: &mut LzmaModel, len: usize) -> Result<u32> {
    let distance = &mut model.distance;
    let slot = rc.decode_bit_tree(&mut distance.slot[len_to_dist_state(len)], DIST_SLOT_BITS)?;
    if slot < START_POS_MODEL_INDEX as u32 {
        return Ok(slot);
    }
    let footer_bits = (slot >> 1) - 1;
    let base = (2 | (slot & 1)) << footer_bits;
    let dist = if slot < END_POS_MODEL_INDEX as u32 {
        let offset = footer_offset(slot, base);
        base + rc.decode_bit_tree_reverse(&mut distance.special[offset..], footer_bits)?
    } else {
        let direct = rc.decode_direct(footer_bits - DIST_ALIGN_BITS)?;
        let align = rc.decode_bit_tree_reverse(&mut distance.align, DIST_ALIGN_BITS)?;
        base.wrapping_add(direct << DIST_ALIGN_BITS).wrapping_add(align)
    };
    Ok(dist)
}

fn rebase(error: Flzma2Error, base_offset: u64) -> Flzma2Error {
    match error {
        Flzma2Error::CorruptedData { offset, message } => Flzma2Error::CorruptedData {
            offset: offset + base_offset,
            message,
        },
        other => other,
    }
}

/// Decode a bare chunk sequence ending in the end marker.
pub fn decode_chunks(chunks: &[u8], capacity_hint: usize) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(capacity_hint);
    Lzma2Decoder::new().decode(chunks, 0, &mut out)?;
    Ok(out)
}

/// Decode a stream without a property byte. `checksum` says whether a
/// digest follows the end marker.
pub fn decompress_raw(stream: &[u8], checksum: bool) -> Result<Vec<u8>> {
    decode_stream(stream, 0, checksum)
}

/// Decode a stream that starts with a property byte.
pub fn decompress(stream: &[u8]) -> Result<Vec<u8>> {
    let Some(&prop) = stream.first() else {
        return Err(Flzma2Error::corrupted(0, "empty stream"));
    };
    let (_, checksum) = parse_stream_prop(prop)?;
    decode_stream(stream, 1, checksum)
}

fn decode_stream(stream: &[u8], start: usize, checksum: bool) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let consumed = Lzma2Decoder::new().decode(&stream[start..], start as u64, &mut out)?;
    if checksum {
        let at = start + consumed;
        let Some(digest) = stream.get(at..at + DIGEST_SIZE) else {
            return Err(Flzma2Error::corrupted(at as u64, "missing checksum"));
        };
        let expected = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]]);
        let computed = xxhash32(&out);
        if expected != computed {
            return Err(Flzma2Error::checksum_mismatch(expected, computed));
        }
    }
    Ok(out)
}

/// Read a stream's headers and chunk layout without decoding.
pub fn stream_info(stream: &[u8]) -> Result<StreamInfo> {
    let Some(&prop) = stream.first() else {
        return Err(Flzma2Error::corrupted(0, "empty stream"));
    };
    let (dict_prop, has_checksum) = parse_stream_prop(prop)?;
    let infos = crate::chunk::chunk_infos(&stream[1..]).map_err(|e| rebase(e, 1))?;
    let chunks_size: usize = infos.iter().map(|c| c.total_size()).sum();
    let mut packed_size = 1 + chunks_size as u64 + 1;
    if has_checksum {
        packed_size += DIGEST_SIZE as u64;
    }
    Ok(StreamInfo {
        dict_prop,
        dictionary_size: crate::dict_size_from_prop(dict_prop).unwrap_or(usize::MAX),
        has_checksum,
        unpacked_size: infos.iter().map(|c| c.unpacked_size as u64).sum(),
        packed_size,
        compressed_chunks: infos.iter().filter(|c| c.kind == ChunkKind::Compressed).count(),
        stored_chunks: infos.iter().filter(|c| c.kind == ChunkKind::Stored).count(),
        dictionary_resets: infos.iter().filter(|c| c.reset == ChunkReset::Dictionary).count(),
    })
}
