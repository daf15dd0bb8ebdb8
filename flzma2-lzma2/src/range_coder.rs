//! Range coder for LZMA2 chunks.
//!
//! The range coder is an adaptive binary arithmetic coder:
//! - 32-bit range, 64-bit low with carry propagation through cached 0xFF bytes
//! - Normalization when the range drops below 2^24
//! - 11-bit probabilities updated with a shift of 5
//!
//! Bit costs for the parsers come from two 128-entry price tables indexed by
//! the quantized probability. One bit is worth 32 price units.

use flzma2_core::error::{Flzma2Error, Result};

/// Number of bits in probability model.
pub const PROB_BITS: u32 = 11;

/// Probability representing 50%.
pub const PROB_INIT: u16 = 1 << (PROB_BITS - 1);

/// Probability scale.
pub const PROB_MAX: u16 = 1 << PROB_BITS;

/// Number of bits to shift for probability update.
pub const MOVE_BITS: u32 = 5;

/// Price units per encoded bit, as a shift.
pub const BIT_PRICE_SHIFT_BITS: u32 = 5;

/// Probability quantization for price lookups.
const MOVE_REDUCING_BITS: u32 = 4;

/// Lowest price a literal can have.
pub const MIN_LITERAL_PRICE: u32 = 8;

/// Top value for range normalization.
const TOP_VALUE: u32 = 1 << 24;

/// Bytes produced by [`RangeEncoder::flush`].
pub const FLUSH_SIZE: usize = 5;

static PRICE_TABLE: [[u8; 128]; 2] = [
    [
        0, 193, 182, 166, 154, 145, 137, 131, 125, 120, 115, 111, 107, 103, 100, 97, //
        94, 91, 89, 86, 84, 82, 80, 78, 76, 74, 72, 71, 69, 67, 66, 64, //
        63, 61, 60, 59, 57, 56, 55, 54, 53, 52, 50, 49, 48, 47, 46, 45, //
        44, 43, 42, 42, 41, 40, 39, 38, 37, 36, 36, 35, 34, 33, 33, 32, //
        31, 30, 30, 29, 28, 28, 27, 26, 26, 25, 25, 24, 23, 23, 22, 21, //
        21, 20, 20, 19, 19, 18, 18, 17, 17, 16, 16, 15, 15, 14, 14, 13, //
        13, 12, 12, 11, 11, 10, 10, 9, 9, 8, 8, 8, 7, 7, 6, 6, //
        5, 5, 5, 4, 4, 3, 3, 3, 2, 2, 2, 1, 1, 0, 0, 0,
    ],
    [
        0, 0, 0, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 5, 5, 5, //
        6, 6, 7, 7, 8, 8, 8, 9, 9, 10, 10, 11, 11, 12, 12, 13, //
        13, 13, 14, 14, 15, 15, 16, 17, 17, 18, 18, 19, 19, 20, 20, 21, //
        21, 22, 23, 23, 24, 24, 25, 26, 26, 27, 28, 28, 29, 30, 30, 31, //
        32, 33, 33, 34, 35, 36, 36, 37, 38, 39, 40, 41, 41, 42, 43, 44, //
        45, 46, 47, 48, 49, 50, 51, 53, 54, 55, 56, 57, 59, 60, 61, 63, //
        64, 66, 67, 69, 70, 72, 74, 76, 78, 80, 82, 84, 86, 89, 91, 94, //
        97, 100, 103, 107, 111, 115, 119, 125, 130, 137, 145, 154, 165, 181, 192, 0,
    ],
];

/// Estimated cost of coding `bit` with probability `prob`.
#[inline(always)]
pub fn price(prob: u16, bit: u32) -> u32 {
    PRICE_TABLE[(bit & 1) as usize][(prob >> MOVE_REDUCING_BITS) as usize] as u32
}

/// Cost of a 0 bit.
#[inline(always)]
pub fn price_0(prob: u16) -> u32 {
    price(prob, 0)
}

/// Cost of a 1 bit.
#[inline(always)]
pub fn price_1(prob: u16) -> u32 {
    price(prob, 1)
}

/// Cost of an MSB-first bit tree symbol.
pub fn bit_tree_price(probs: &[u16], bit_count: u32, symbol: u32) -> u32 {
    let mut total = 0;
    let mut symbol = symbol | (1 << bit_count);
    while symbol > 1 {
        let bit = symbol & 1;
        symbol >>= 1;
        total += price(probs[symbol as usize], bit);
    }
    total
}

/// Cost of an LSB-first bit tree symbol.
pub fn bit_tree_reverse_price(probs: &[u16], bit_count: u32, symbol: u32) -> u32 {
    let mut total = 0;
    let mut m = 1usize;
    let mut symbol = symbol;
    for _ in 0..bit_count {
        let bit = symbol & 1;
        symbol >>= 1;
        total += price(probs[m], bit);
        m = (m << 1) | bit as usize;
    }
    total
}

/// Range encoder writing into a growable buffer.
#[derive(Debug)]
pub struct RangeEncoder {
    buffer: Vec<u8>,
    low: u64,
    range: u32,
    cache: u8,
    cache_size: u64,
}

impl RangeEncoder {
    /// Create a new range encoder.
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Create an encoder with a preallocated output buffer.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            low: 0,
            range: 0xFFFF_FFFF,
            cache: 0,
            cache_size: 0,
        }
    }

    /// Clear the output and restart coding.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.low = 0;
        self.range = 0xFFFF_FFFF;
        self.cache = 0;
        self.cache_size = 0;
    }

    /// Bytes written so far, not counting pending cache bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing has been written.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Encoded bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    fn shift_low(&mut self) {
        let low = self.low;
        self.low = (low << 8) & 0xFFFF_FFFF;
        if !(0xFF00_0000..=0xFFFF_FFFF).contains(&low) {
            let carry = (low >> 32) as u8;
            self.buffer.push(self.cache.wrapping_add(carry));
            self.cache = (low >> 24) as u8;
            if self.cache_size != 0 {
                let fill = 0xFFu8.wrapping_add(carry);
                for _ in 0..self.cache_size {
                    self.buffer.push(fill);
                }
                self.cache_size = 0;
            }
        } else {
            self.cache_size += 1;
        }
    }

    #[inline(always)]
    fn normalize(&mut self) {
        if self.range < TOP_VALUE {
            self.range <<= 8;
            self.shift_low();
        }
    }

    /// Encode a single bit with an adaptive probability.
    #[inline]
    pub fn encode_bit(&mut self, prob: &mut u16, bit: u32) {
        let bound = (self.range >> PROB_BITS) * (*prob as u32);
        if bit == 0 {
            self.range = bound;
            *prob += (PROB_MAX - *prob) >> MOVE_BITS;
        } else {
            self.low += bound as u64;
            self.range -= bound;
            *prob -= *prob >> MOVE_BITS;
        }
        self.normalize();
    }

    /// Encode a 0 bit.
    #[inline]
    pub fn encode_bit_0(&mut self, prob: &mut u16) {
        self.encode_bit(prob, 0);
    }

    /// Encode a 1 bit.
    #[inline]
    pub fn encode_bit_1(&mut self, prob: &mut u16) {
        self.encode_bit(prob, 1);
    }

    /// Encode `bit_count` bits MSB first through a bit tree.
    pub fn encode_bit_tree(&mut self, probs: &mut [u16], bit_count: u32, symbol: u32) {
        let mut m = 1usize;
        for i in (0..bit_count).rev() {
            let bit = (symbol >> i) & 1;
            self.encode_bit(&mut probs[m], bit);
            m = (m << 1) | bit as usize;
        }
    }

    /// Encode `bit_count` bits LSB first through a bit tree.
    pub fn encode_bit_tree_reverse(&mut self, probs: &mut [u16], bit_count: u32, symbol: u32) {
        let mut m = 1usize;
        let mut symbol = symbol;
        for _ in 0..bit_count {
            let bit = symbol & 1;
            symbol >>= 1;
            self.encode_bit(&mut probs[m], bit);
            m = (m << 1) | bit as usize;
        }
    }

    /// Encode raw bits with probability 1/2, MSB first.
    pub fn encode_direct(&mut self, value: u32, bit_count: u32) {
        for i in (0..bit_count).rev() {
            self.range >>= 1;
            if (value >> i) & 1 != 0 {
                self.low += self.range as u64;
            }
            self.normalize();
        }
    }

    /// Push out the final bytes of the coder state.
    pub fn flush(&mut self) {
        for _ in 0..FLUSH_SIZE {
            self.shift_low();
        }
    }
}

impl Default for RangeEncoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Range decoder over one chunk payload.
#[derive(Debug)]
pub struct RangeDecoder<'a> {
    input: &'a [u8],
    pos: usize,
    base_offset: u64,
    range: u32,
    code: u32,
}

impl<'a> RangeDecoder<'a> {
    /// Start decoding `input`. `base_offset` is the stream offset of the first
    /// byte, used in error reports.
    pub fn new(input: &'a [u8], base_offset: u64) -> Result<Self> {
        if input.len() < FLUSH_SIZE {
            return Err(Flzma2Error::corrupted(base_offset, "range coder payload too short"));
        }
        if input[0] != 0 {
            return Err(Flzma2Error::corrupted(base_offset, "range coder must start with 0x00"));
        }
        let code = u32::from_be_bytes([input[1], input[2], input[3], input[4]]);
        Ok(Self {
            input,
            pos: FLUSH_SIZE,
            base_offset,
            range: 0xFFFF_FFFF,
            code,
        })
    }

    /// Bytes consumed so far.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Whether the code value ended at zero, as a correctly flushed
    /// encoder leaves it.
    pub fn is_finished_ok(&self) -> bool {
        self.code == 0
    }

    #[inline(always)]
    fn normalize(&mut self) -> Result<()> {
        if self.range < TOP_VALUE {
            let Some(&byte) = self.input.get(self.pos) else {
                return Err(Flzma2Error::corrupted(
                    self.base_offset + self.pos as u64,
                    "unexpected end of compressed chunk",
                ));
            };
            self.pos += 1;
            self.range <<= 8;
            self.code = (self.code << 8) | byte as u32;
        }
        Ok(())
    }

    /// Decode a single bit with an adaptive probability.
    #[inline]
    pub fn decode_bit(&mut self, prob: &mut u16) -> Result<u32> {
        self.normalize()?;
        let bound = (self.range >> PROB_BITS) * (*prob as u32);
        if self.code < bound {
            self.range = bound;
            *prob += (PROB_MAX - *prob) >> MOVE_BITS;
            Ok(0)
        } else {
            self.range -= bound;
            self.code -= bound;
            *prob -= *prob >> MOVE_BITS;
            Ok(1)
        }
    }

    /// Decode `bit_count` bits MSB first through a bit tree.
    pub fn decode_bit_tree(&mut self, probs: &mut [u16], bit_count: u32) -> Result<u32> {
        let mut m = 1u32;
        for _ in 0..bit_count {
            m = (m << 1) | self.decode_bit(&mut probs[m as usize])?;
        }
        Ok(m - (1 << bit_count))
    }

    /// Decode `bit_count` bits LSB first through a bit tree.
    pub fn decode_bit_tree_reverse(&mut self, probs: &mut [u16], bit_count: u32) -> Result<u32> {
        let mut m = 1usize;
        let mut symbol = 0u32;
        for i in 0..bit_count {
            let bit = self.decode_bit(&mut probs[m])?;
            m = (m << 1) | bit as usize;
            symbol |= bit << i;
        }
        Ok(symbol)
    }

    /// Decode raw bits with probability 1/2, MSB first.
    pub fn decode_direct(&mut self, bit_count: u32) -> Result<u32> {
        let mut result = 0u32;
        for _ in 0..bit_count {
            self.normalize()?;
            self.range >>= 1;
            let bit = if self.code >= self.range {
                self.code -= self.range;
                1
            } else {
                0
            };
            result = (result << 1) | bit;
        }
        Ok(result)
    }
}
