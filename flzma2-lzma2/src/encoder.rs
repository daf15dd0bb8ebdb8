//! LZMA2 encoder for one slice of a block.
//!
//! The encoder reads matches from a built [`MatchTable`], parses them with
//! the configured [`Strategy`] and writes LZMA2 chunks to a growable output
//! buffer. Each call starts from a reset state, so every slice can be
//! decoded without the ones encoded by other jobs, while still referencing
//! the dictionary bytes before it.

use crate::chunk::{
    self, CHUNK_HEADER_SIZE, CHUNK_SIZE, MAX_CHUNK_COMPRESSED_SIZE, MAX_CHUNK_UNCOMPRESSED_SIZE,
    MAX_STORED_CHUNK_SIZE, RANDOM_FILTER_MARGIN_BITS, STORED_HEADER_SIZE, control,
};
use crate::hash::{HashChain3, MATCHES_MAX, common_length};
use crate::model::{
    DIST_ALIGN_BITS, DIST_ALIGN_MASK, DIST_ALIGN_SIZE, DIST_SLOT_BITS, DIST_SLOTS, END_POS_MODEL_INDEX,
    FULL_DISTANCES, LEN_HIGH_BITS, LEN_LOW_BITS, LEN_LOW_SYMBOLS, LEN_MID_BITS, LEN_MID_SYMBOLS,
    LEN_SYMBOLS_TOTAL, LEN_TO_DIST_STATES, LITERAL_CODER_SIZE, LengthModel, LiteralModel, LzmaModel,
    LzmaProperties, MATCH_LEN_MAX, MATCH_LEN_MIN, POS_STATES_MAX, REPS, START_POS_MODEL_INDEX, State,
    dist_slot, footer_offset, len_to_dist_state,
};
use crate::optimal::{OPTIMIZER_BUFFER_SIZE, OptNode};
use crate::range_coder::{
    BIT_PRICE_SHIFT_BITS, RangeEncoder, bit_tree_price, bit_tree_reverse_price, price, price_0, price_1,
};
use crate::{FAST_LENGTH_MIN, JobProgress, LazyGain, Lzma2Params, Strategy};
use flzma2_core::error::{Flzma2Error, Result};
use flzma2_radix::{DataBlock, MatchTable, RadixMatch, TableCells, get_match, get_next_match, with_cells};
use tracing::{debug, trace};

/// Matches or rep lengths encoded between price table refreshes.
const REPRICE_FREQUENCY: u32 = 64;

/// Longest encoding of a single symbol, in bytes.
const MAX_MATCH_ENCODE_SIZE: usize = 20;

/// Largest distance slot table.
const DIST_TABLE_SIZE_MAX: usize = DIST_SLOTS;

/// Short matches are only worth taking below these distances.
const FAST_MAX_DIST: [u32; 5] = [0, 0, 0, 1 << 6, 1 << 14];

/// Length prices per position state.
#[derive(Debug, Clone)]
pub(crate) struct LengthPrices {
    table_size: usize,
    prices: [[u32; LEN_SYMBOLS_TOTAL]; POS_STATES_MAX],
}

impl LengthPrices {
    fn new() -> Self {
        Self {
            table_size: LEN_SYMBOLS_TOTAL,
            prices: [[0; LEN_SYMBOLS_TOTAL]; POS_STATES_MAX],
        }
    }

    /// Price of `len` at `pos_state`.
    #[inline(always)]
    pub(crate) fn get(&self, pos_state: usize, len: usize) -> u32 {
        self.prices[pos_state][len - MATCH_LEN_MIN]
    }

    fn update(&mut self, lm: &LengthModel, pos_states: usize) {
        let table_size = self.table_size;
        let low_price = price_0(lm.choice);
        let choice_1 = price_1(lm.choice);
        let mid_price = choice_1 + price_0(lm.choice2);
        let high_price = choice_1 + price_1(lm.choice2);

        for pos_state in 0..pos_states {
            let row = &mut self.prices[pos_state];
            for (sym, slot) in row.iter_mut().enumerate().take(table_size.min(LEN_LOW_SYMBOLS)) {
                *slot = low_price + bit_tree_price(&lm.low[pos_state], LEN_LOW_BITS, sym as u32);
            }
            let mid_end = table_size.min(LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS);
            for sym in LEN_LOW_SYMBOLS..mid_end {
                row[sym] = mid_price
                    + bit_tree_price(&lm.mid[pos_state], LEN_MID_BITS, (sym - LEN_LOW_SYMBOLS) as u32);
            }
        }

        let high_start = LEN_LOW_SYMBOLS + LEN_MID_SYMBOLS;
        if table_size > high_start {
            // The high coder is shared, so one row is priced and copied.
            for sym in high_start..table_size {
                self.prices[0][sym] =
                    high_price + bit_tree_price(&lm.high, LEN_HIGH_BITS, (sym - high_start) as u32);
            }
            let (first, rest) = self.prices.split_at_mut(1);
            for row in rest.iter_mut().take(pos_states - 1) {
                row[high_start..table_size].copy_from_slice(&first[0][high_start..table_size]);
            }
        }
    }
}

fn encode_length(rc: &mut RangeEncoder, lm: &mut LengthModel, len: usize, pos_state: usize) {
    let sym = (len - MATCH_LEN_MIN) as u32;
    if sym < LEN_LOW_SYMBOLS as u32 {
        rc.encode_bit_0(&mut lm.choice);
        rc.encode_bit_tree(&mut lm.low[pos_state], LEN_LOW_BITS, sym);
    } else {
        rc.encode_bit_1(&mut lm.choice);
        let sym = sym - LEN_LOW_SYMBOLS as u32;
        if sym < LEN_MID_SYMBOLS as u32 {
            rc.encode_bit_0(&mut lm.choice2);
            rc.encode_bit_tree(&mut lm.mid[pos_state], LEN_MID_BITS, sym);
        } else {
            rc.encode_bit_1(&mut lm.choice2);
            rc.encode_bit_tree(&mut lm.high, LEN_HIGH_BITS, sym - LEN_MID_SYMBOLS as u32);
        }
    }
}

#[inline]
fn highbit(value: u32) -> i32 {
    31 - value.leading_zeros() as i32
}

/// Radix match at `pos`, never reaching past the block end.
#[inline]
pub(crate) fn radix_match<T: TableCells>(
    cells: &T,
    block: &DataBlock<'_>,
    max_depth: u32,
    pos: usize,
) -> RadixMatch {
    let mut m = get_match(cells, block, max_depth, pos);
    m.length = m.length.min((block.end - pos) as u32);
    m
}

#[inline]
fn radix_next_match<T: TableCells>(
    cells: &T,
    block: &DataBlock<'_>,
    max_depth: u32,
    pos: usize,
) -> RadixMatch {
    let mut m = get_next_match(cells, block, max_depth, pos);
    m.length = m.length.min((block.end - pos) as u32);
    m
}

/// Length of the match at `pos` against rep distance `rep`, or 0.
#[inline]
pub(crate) fn rep_length(data: &[u8], pos: usize, rep: u32, max_len: usize) -> usize {
    if max_len < MATCH_LEN_MIN {
        return 0;
    }
    let Some(src) = pos.checked_sub(rep as usize + 1) else {
        return 0;
    };
    if data[pos] != data[src] || data[pos + 1] != data[src + 1] {
        return 0;
    }
    MATCH_LEN_MIN + common_length(data, pos + 2, src + 2, pos + max_len)
}

/// LZMA2 encoder state for one job.
#[derive(Debug)]
pub struct Lzma2Encoder {
    pub(crate) model: LzmaModel,
    saved: LzmaModel,
    pub(crate) rc: RangeEncoder,
    props: LzmaProperties,
    pub(crate) lit_pos_mask: usize,
    pub(crate) pos_mask: usize,
    pub(crate) fast_length: usize,
    pub(crate) match_cycles: u32,
    strategy: Strategy,
    lazy: LazyGain,
    pub(crate) chunk_size: usize,
    chunk_limit: usize,

    pub(crate) len_end_max: usize,
    match_price_count: u32,
    rep_len_price_count: u32,
    dist_price_table_size: usize,
    pub(crate) align_prices: [u32; DIST_ALIGN_SIZE],
    pub(crate) dist_slot_prices: [[u32; DIST_TABLE_SIZE_MAX]; LEN_TO_DIST_STATES],
    pub(crate) distance_prices: [[u32; FULL_DISTANCES]; LEN_TO_DIST_STATES],
    pub(crate) len_prices: Box<LengthPrices>,
    pub(crate) rep_len_prices: Box<LengthPrices>,

    /// Match candidates; index 0 is a sentinel below the shortest.
    pub(crate) matches: Vec<RadixMatch>,
    pub(crate) opt_buf: Vec<OptNode>,
    pub(crate) hash: Option<HashChain3>,
}

impl Lzma2Encoder {
    /// Create an encoder. Buffers are sized on first use.
    pub fn new() -> Self {
        let props = LzmaProperties::default();
        Self {
            model: LzmaModel::new(props),
            saved: LzmaModel::new(props),
            rc: RangeEncoder::with_capacity(MAX_CHUNK_COMPRESSED_SIZE + MAX_MATCH_ENCODE_SIZE * 2),
            props,
            lit_pos_mask: 0,
            pos_mask: (1 << props.pb) - 1,
            fast_length: 48,
            match_cycles: 1,
            strategy: Strategy::Ultra,
            lazy: LazyGain::DEFAULT,
            chunk_size: CHUNK_SIZE,
            chunk_limit: MAX_CHUNK_COMPRESSED_SIZE - MAX_MATCH_ENCODE_SIZE * 2,
            len_end_max: OPTIMIZER_BUFFER_SIZE - 1,
            match_price_count: 0,
            rep_len_price_count: 0,
            dist_price_table_size: DIST_TABLE_SIZE_MAX,
            align_prices: [0; DIST_ALIGN_SIZE],
            dist_slot_prices: [[0; DIST_TABLE_SIZE_MAX]; LEN_TO_DIST_STATES],
            distance_prices: [[0; FULL_DISTANCES]; LEN_TO_DIST_STATES],
            len_prices: Box::new(LengthPrices::new()),
            rep_len_prices: Box::new(LengthPrices::new()),
            matches: Vec::with_capacity(MATCHES_MAX + 2),
            opt_buf: vec![OptNode::default(); OPTIMIZER_BUFFER_SIZE],
            hash: None,
        }
    }

    /// Approximate memory held by one encoder, excluding the hash chain.
    pub fn memory_usage() -> usize {
        std::mem::size_of::<Self>()
            + 2 * std::mem::size_of::<LengthPrices>()
            + OPTIMIZER_BUFFER_SIZE * std::mem::size_of::<OptNode>()
            + (MATCHES_MAX + 2) * std::mem::size_of::<RadixMatch>()
            + MAX_CHUNK_COMPRESSED_SIZE
            + 2 * (LITERAL_CODER_SIZE << crate::model::LCLP_MAX) * 2
    }

    /// Properties of the last encode.
    pub fn properties(&self) -> LzmaProperties {
        self.props
    }

    fn configure(&mut self, params: &Lzma2Params, block: &DataBlock<'_>) {
        let props = params.effective_properties();
        self.props = props;
        self.lit_pos_mask = (1 << props.lp) - 1;
        self.pos_mask = (1 << props.pb) - 1;
        self.fast_length = params.fast_length.clamp(FAST_LENGTH_MIN, MATCH_LEN_MAX);
        self.match_cycles = params.match_cycles.clamp(crate::MATCH_CYCLES_MIN, crate::MATCH_CYCLES_MAX);
        self.strategy = params.strategy;
        self.lazy = params.lazy;

        self.rc.reset();
        self.model.reset_with(props);
        self.len_prices.table_size = self.fast_length + 1 - MATCH_LEN_MIN;
        self.rep_len_prices.table_size = self.fast_length + 1 - MATCH_LEN_MIN;
        let mut bits = 0;
        while block.end > (1usize << bits) {
            bits += 1;
        }
        self.dist_price_table_size = (bits * 2).min(DIST_TABLE_SIZE_MAX);
        self.match_price_count = 0;
        self.rep_len_price_count = 0;
        self.len_end_max = OPTIMIZER_BUFFER_SIZE - 1;

        if self.strategy == Strategy::Ultra {
            let chain_log = params.chain_log.clamp(crate::CHAIN_LOG_MIN, crate::CHAIN_LOG_MAX);
            let reuse = matches!(&self.hash, Some(h) if h.chain_size() == 1 << chain_log);
            if !reuse {
                self.hash = Some(HashChain3::new(chain_log));
            }
            if let Some(hash) = self.hash.as_mut() {
                hash.reset(block.start);
            }
        }
    }

    // Symbol encoders

    fn encode_literal(&mut self, pos: usize, symbol: u8, prev_byte: u8) {
        let state = self.model.state;
        let pos_state = pos & self.pos_mask;
        self.rc.encode_bit_0(&mut self.model.is_match[state.value()][pos_state]);
        self.model.state = state.after_literal();

        let index = LiteralModel::get_state(pos, prev_byte, self.props.lc, self.lit_pos_mask);
        let probs = &mut self.model.literal.probs[index];
        let mut symbol = symbol as u32 | 0x100;
        while symbol < 0x10000 {
            self.rc.encode_bit(&mut probs[(symbol >> 8) as usize], (symbol >> 7) & 1);
            symbol <<= 1;
        }
    }

    fn encode_literal_matched(&mut self, pos: usize, symbol: u8, prev_byte: u8, match_byte: u8) {
        let state = self.model.state;
        let pos_state = pos & self.pos_mask;
        self.rc.encode_bit_0(&mut self.model.is_match[state.value()][pos_state]);
        self.model.state = state.after_literal();

        let index = LiteralModel::get_state(pos, prev_byte, self.props.lc, self.lit_pos_mask);
        let probs = &mut self.model.literal.probs[index];
        let mut symbol = symbol as u32 | 0x100;
        let mut match_byte = match_byte as u32;
        let mut offs = 0x100u32;
        while symbol < 0x10000 {
            match_byte <<= 1;
            let index = offs + (match_byte & offs) + (symbol >> 8);
            self.rc.encode_bit(&mut probs[index as usize], (symbol >> 7) & 1);
            symbol <<= 1;
            offs &= !(match_byte ^ symbol);
        }
    }

    /// Literal at `pos`, matched against rep0 after a match.
    pub(crate) fn encode_literal_at(&mut self, data: &[u8], pos: usize) {
        let symbol = data[pos];
        let prev_byte = data[pos - 1];
        if self.model.state.is_literal() {
            self.encode_literal(pos, symbol, prev_byte);
        } else {
            let match_byte = data[pos - self.model.reps[0] as usize - 1];
            self.encode_literal_matched(pos, symbol, prev_byte, match_byte);
        }
    }

    pub(crate) fn encode_short_rep(&mut self, pos_state: usize) {
        let state = self.model.state.value();
        self.rc.encode_bit_1(&mut self.model.is_match[state][pos_state]);
        self.rc.encode_bit_1(&mut self.model.is_rep[state]);
        self.rc.encode_bit_0(&mut self.model.is_rep0[state]);
        self.rc.encode_bit_0(&mut self.model.is_rep0_long[state][pos_state]);
        self.model.state = self.model.state.after_short_rep();
    }

    pub(crate) fn encode_rep_long(&mut self, len: usize, rep: usize, pos_state: usize) {
        let state = self.model.state.value();
        self.rc.encode_bit_1(&mut self.model.is_match[state][pos_state]);
        self.rc.encode_bit_1(&mut self.model.is_rep[state]);
        if rep == 0 {
            self.rc.encode_bit_0(&mut self.model.is_rep0[state]);
            self.rc.encode_bit_1(&mut self.model.is_rep0_long[state][pos_state]);
        } else {
            let reps = &mut self.model.reps;
            let distance = reps[rep];
            self.rc.encode_bit_1(&mut self.model.is_rep0[state]);
            if rep == 1 {
                self.rc.encode_bit_0(&mut self.model.is_rep1[state]);
            } else {
                self.rc.encode_bit_1(&mut self.model.is_rep1[state]);
                self.rc.encode_bit(&mut self.model.is_rep2[state], (rep - 2) as u32);
                if rep == 3 {
                    reps[3] = reps[2];
                }
                reps[2] = reps[1];
            }
            reps[1] = reps[0];
            reps[0] = distance;
        }
        encode_length(&mut self.rc, &mut self.model.rep_len, len, pos_state);
        self.model.state = self.model.state.after_rep();
        self.rep_len_price_count += 1;
    }

    pub(crate) fn encode_normal_match(&mut self, len: usize, dist: u32, pos_state: usize) {
        let state = self.model.state.value();
        self.rc.encode_bit_1(&mut self.model.is_match[state][pos_state]);
        self.rc.encode_bit_0(&mut self.model.is_rep[state]);
        self.model.state = self.model.state.after_match();
        encode_length(&mut self.rc, &mut self.model.match_len, len, pos_state);

        let slot = dist_slot(dist);
        let distance = &mut self.model.distance;
        self.rc
            .encode_bit_tree(&mut distance.slot[len_to_dist_state(len)], DIST_SLOT_BITS, slot);
        if slot >= START_POS_MODEL_INDEX as u32 {
            let footer_bits = (slot >> 1) - 1;
            let base = (2 | (slot & 1)) << footer_bits;
            let reduced = dist - base;
            if slot < END_POS_MODEL_INDEX as u32 {
                let offset = footer_offset(slot, base);
                self.rc
                    .encode_bit_tree_reverse(&mut distance.special[offset..], footer_bits, reduced);
            } else {
                self.rc
                    .encode_direct(reduced >> DIST_ALIGN_BITS, footer_bits - DIST_ALIGN_BITS);
                self.rc
                    .encode_bit_tree_reverse(&mut distance.align, DIST_ALIGN_BITS, reduced & DIST_ALIGN_MASK);
            }
        }
        let reps = &mut self.model.reps;
        reps[3] = reps[2];
        reps[2] = reps[1];
        reps[1] = reps[0];
        reps[0] = dist;
        self.match_price_count += 1;
    }

    /// A literal, or a short rep when the byte repeats rep0.
    pub(crate) fn encode_literal_or_short_rep(&mut self, data: &[u8], pos: usize) {
        if data[pos] != data[pos - self.model.reps[0] as usize - 1] {
            self.encode_literal_at(data, pos);
        } else {
            self.encode_short_rep(pos & self.pos_mask);
        }
    }

    // Prices

    fn fill_align_prices(&mut self) {
        for (i, price) in self.align_prices.iter_mut().enumerate() {
            *price = bit_tree_reverse_price(&self.model.distance.align, DIST_ALIGN_BITS, i as u32);
        }
    }

    fn fill_distances_prices(&mut self) {
        self.match_price_count = 0;

        let mut footer_prices = [0u32; FULL_DISTANCES];
        for (dist, footer_price) in footer_prices.iter_mut().enumerate().skip(START_POS_MODEL_INDEX) {
            let dist = dist as u32;
            let slot = dist_slot(dist);
            let footer_bits = (slot >> 1) - 1;
            let base = (2 | (slot & 1)) << footer_bits;
            let offset = footer_offset(slot, base);
            *footer_price =
                bit_tree_reverse_price(&self.model.distance.special[offset..], footer_bits, dist - base);
        }

        let table_size = self.dist_price_table_size;
        for lps in 0..LEN_TO_DIST_STATES {
            let slot_prices = &mut self.dist_slot_prices[lps];
            let probs = &self.model.distance.slot[lps];
            for (slot, slot_price) in slot_prices.iter_mut().enumerate().take(table_size) {
                *slot_price = bit_tree_price(probs, DIST_SLOT_BITS, slot as u32);
                if slot >= END_POS_MODEL_INDEX {
                    let direct_bits = ((slot >> 1) - 1) as u32 - DIST_ALIGN_BITS;
                    *slot_price += direct_bits << BIT_PRICE_SHIFT_BITS;
                }
            }

            let dp = &mut self.distance_prices[lps];
            dp[..START_POS_MODEL_INDEX].copy_from_slice(&slot_prices[..START_POS_MODEL_INDEX]);
            for dist in START_POS_MODEL_INDEX..FULL_DISTANCES {
                dp[dist] = slot_prices[dist_slot(dist as u32) as usize] + footer_prices[dist];
            }
        }
    }

    fn update_len_prices(&mut self) {
        let pos_states = self.pos_mask + 1;
        self.len_prices.update(&self.model.match_len, pos_states);
    }

    fn update_rep_len_prices(&mut self) {
        let pos_states = self.pos_mask + 1;
        self.rep_len_prices.update(&self.model.rep_len, pos_states);
    }

    /// Cost of a normal match distance at `len`.
    #[inline]
    pub(crate) fn distance_price(&self, dist: u32, len: usize) -> u32 {
        let lps = len_to_dist_state(len);
        if (dist as usize) < FULL_DISTANCES {
            self.distance_prices[lps][dist as usize]
        } else {
            self.dist_slot_prices[lps][dist_slot(dist) as usize] + self.align_prices[(dist & DIST_ALIGN_MASK) as usize]
        }
    }

    /// Cost of a literal in `state`.
    pub(crate) fn literal_price(&self, pos: usize, state: State, prev_byte: u8, symbol: u8, match_byte: u8) -> u32 {
        let index = LiteralModel::get_state(pos, prev_byte, self.props.lc, self.lit_pos_mask);
        let probs = &self.model.literal.probs[index];
        if state.is_literal() {
            let mut symbol = symbol as u32 | 0x100;
            let mut total = 0;
            while symbol < 0x10000 {
                total += price(probs[(symbol >> 8) as usize], (symbol >> 7) & 1);
                symbol <<= 1;
            }
            total
        } else {
            matched_literal_price(probs, symbol, match_byte)
        }
    }

    /// Cost of a literal coded against `match_byte`.
    pub(crate) fn matched_literal_price_at(&self, pos: usize, prev_byte: u8, symbol: u8, match_byte: u8) -> u32 {
        let index = LiteralModel::get_state(pos, prev_byte, self.props.lc, self.lit_pos_mask);
        matched_literal_price(&self.model.literal.probs[index], symbol, match_byte)
    }

    /// Cost of a short rep, after the is-match and is-rep bits.
    #[inline]
    pub(crate) fn short_rep_price(&self, state: State, pos_state: usize) -> u32 {
        let s = state.value();
        price_0(self.model.is_rep0[s]) + price_0(self.model.is_rep0_long[s][pos_state])
    }

    /// Cost of selecting rep `rep`, after the is-match and is-rep bits.
    #[inline]
    pub(crate) fn rep_price(&self, rep: usize, state: State, pos_state: usize) -> u32 {
        let s = state.value();
        if rep == 0 {
            price_0(self.model.is_rep0[s]) + price_1(self.model.is_rep0_long[s][pos_state])
        } else {
            let cost = price_1(self.model.is_rep0[s]);
            if rep == 1 {
                cost + price_0(self.model.is_rep1[s])
            } else {
                cost + price_1(self.model.is_rep1[s]) + price(self.model.is_rep2[s], (rep - 2) as u32)
            }
        }
    }

    /// Cost of a rep0 match of `len`, after the is-match and is-rep bits.
    #[inline]
    pub(crate) fn rep0_match_price(&self, len: usize, state: State, pos_state: usize) -> u32 {
        let s = state.value();
        self.rep_len_prices.get(pos_state, len)
            + price_0(self.model.is_rep0[s])
            + price_1(self.model.is_rep0_long[s][pos_state])
    }

    // Parsers

    fn encode_chunk_fast<T: TableCells>(
        &mut self,
        cells: &T,
        block: &DataBlock<'_>,
        max_depth: u32,
        start: usize,
        uncompressed_end: usize,
    ) -> usize {
        let data = block.data;
        let lazy = self.lazy;
        let mut pos = start;
        let mut prev = start;

        while pos < uncompressed_end && self.rc.len() < self.chunk_size {
            let mut best = radix_match(cells, block, max_depth, pos);
            if (best.length as usize) < MATCH_LEN_MIN {
                pos += 1;
                continue;
            }
            if best.length >= 5 || best.dist < FAST_MAX_DIST[best.length as usize] {
                best.dist += REPS as u32;
            } else {
                best.length = 0;
            }

            let mut max_len = (block.end - pos).min(MATCH_LEN_MAX);
            let mut best_rep = RadixMatch::default();
            let mut take_now = false;
            for rep in 0..REPS {
                let len = rep_length(data, pos, self.model.reps[rep], max_len);
                if len == 0 {
                    continue;
                }
                if len >= max_len {
                    best = RadixMatch {
                        length: len as u32,
                        dist: rep as u32,
                    };
                    take_now = true;
                    break;
                }
                if len > best_rep.length as usize {
                    best_rep = RadixMatch {
                        length: len as u32,
                        dist: rep as u32,
                    };
                }
            }

            if !take_now && (best.length as usize) < max_len {
                if best_rep.length >= 2 {
                    if best_rep.length > best.length {
                        best = best_rep;
                    } else {
                        let gain2 = best_rep.length as i32 * lazy.rep_weight - best_rep.dist as i32;
                        let gain1 =
                            best.length as i32 * lazy.rep_weight - highbit(best.dist + 1) + lazy.rep_bonus;
                        if gain2 > gain1 {
                            best = best_rep;
                        }
                    }
                }
                if (best.length as usize) < MATCH_LEN_MIN {
                    pos += 1;
                    continue;
                }

                let mut next = pos + 1;
                while (best.length as usize) < MATCH_LEN_MAX && next < uncompressed_end {
                    let next_match = radix_next_match(cells, block, max_depth, next);
                    if next_match.length as usize >= MATCH_LEN_MIN {
                        max_len = (block.end - next).min(MATCH_LEN_MAX);
                        let best_rep = self.best_rep_at(data, next, max_len);
                        if best_rep.length >= lazy.next_rep_min {
                            let gain2 = best_rep.length as i32 * lazy.rep_weight - best_rep.dist as i32;
                            let gain1 =
                                best.length as i32 * lazy.rep_weight - highbit(best.dist + 1) + lazy.rep_bonus;
                            if gain2 > gain1 {
                                best = best_rep;
                                pos = next;
                            }
                        }
                        if next_match.length >= lazy.next_rep_min && next_match.dist != best.dist {
                            let gain2 = next_match.length as i32 * lazy.lookahead_weight - highbit(next_match.dist + 1);
                            let gain1 = best.length as i32 * lazy.lookahead_weight - highbit(best.dist + 1)
                                + lazy.next_bonus;
                            if gain2 > gain1 {
                                best = next_match;
                                best.dist += REPS as u32;
                                pos = next;
                                next += 1;
                                continue;
                            }
                        }
                    }
                    next += 1;
                    if next >= uncompressed_end {
                        break;
                    }

                    let next_match = radix_next_match(cells, block, max_depth, next);
                    if next_match.length < lazy.second_min {
                        break;
                    }
                    max_len = (block.end - next).min(MATCH_LEN_MAX);
                    let best_rep = self.best_rep_at(data, next, max_len);
                    if best_rep.length >= lazy.second_min {
                        let gain2 = best_rep.length as i32 * lazy.lookahead_weight - (best_rep.dist >> 1) as i32;
                        let gain1 = best.length as i32 * lazy.lookahead_weight - highbit(best.dist + 1)
                            + lazy.rep_bonus;
                        if gain2 > gain1 {
                            best = best_rep;
                            pos = next;
                        }
                    }
                    if next_match.dist != best.dist {
                        let gain2 = next_match.length as i32 * lazy.lookahead_weight - highbit(next_match.dist + 1);
                        let gain1 = best.length as i32 * lazy.lookahead_weight - highbit(best.dist + 1)
                            + lazy.second_bonus;
                        if gain2 > gain1 {
                            best = next_match;
                            best.dist += REPS as u32;
                            pos = next;
                            next += 1;
                            continue;
                        }
                    }
                    break;
                }
            }

            while prev < pos {
                if self.rc.len() >= self.chunk_limit {
                    return prev;
                }
                self.encode_literal_or_short_rep(data, prev);
                prev += 1;
            }

            if best.length as usize >= MATCH_LEN_MIN {
                let len = best.length as usize;
                if best.dist >= REPS as u32 {
                    self.encode_normal_match(len, best.dist - REPS as u32, pos & self.pos_mask);
                } else {
                    self.encode_rep_long(len, best.dist as usize, pos & self.pos_mask);
                }
                pos += len;
                prev = pos;
            }
        }

        while prev < pos && self.rc.len() < self.chunk_limit {
            self.encode_literal_or_short_rep(data, prev);
            prev += 1;
        }
        prev
    }

    fn best_rep_at(&self, data: &[u8], pos: usize, max_len: usize) -> RadixMatch {
        let mut best = RadixMatch::default();
        for rep in 0..REPS {
            let len = rep_length(data, pos, self.model.reps[rep], max_len);
            if len > best.length as usize {
                best = RadixMatch {
                    length: len as u32,
                    dist: rep as u32,
                };
            }
        }
        best
    }

    fn encode_chunk_best<T: TableCells>(
        &mut self,
        cells: &T,
        block: &DataBlock<'_>,
        max_depth: u32,
        start: usize,
        uncompressed_end: usize,
    ) -> usize {
        let hybrid = self.strategy == Strategy::Ultra;
        self.fill_distances_prices();
        self.fill_align_prices();
        self.update_len_prices();
        self.update_rep_len_prices();

        let mut pos = start;
        while pos < uncompressed_end && self.rc.len() < self.chunk_size {
            let m = radix_match(cells, block, max_depth, pos);
            if m.length > 1 {
                pos = self.encode_optimum_sequence(cells, block, max_depth, hybrid, pos, uncompressed_end, m);
                if self.match_price_count >= REPRICE_FREQUENCY {
                    self.fill_align_prices();
                    self.fill_distances_prices();
                    self.update_len_prices();
                }
                if self.rep_len_price_count >= REPRICE_FREQUENCY {
                    self.rep_len_price_count = 0;
                    self.update_rep_len_prices();
                }
            } else {
                self.encode_literal_or_short_rep(block.data, pos);
                pos += 1;
            }
        }
        pos
    }

    fn encode_chunk<T: TableCells>(
        &mut self,
        cells: &T,
        block: &DataBlock<'_>,
        max_depth: u32,
        start: usize,
        uncompressed_end: usize,
    ) -> usize {
        if self.strategy == Strategy::Fast {
            self.encode_chunk_fast(cells, block, max_depth, start, uncompressed_end)
        } else {
            self.encode_chunk_best(cells, block, max_depth, start, uncompressed_end)
        }
    }

    /// Encode `block.start..block.end` of a block whose match table is
    /// `table`, appending chunks to `out`. `stream_prop` is written before
    /// the first chunk when given. Returns the number of bytes appended.
    ///
    /// Positions before `block.start` are dictionary history; the slice
    /// starts with a state and property reset, and with a dictionary reset
    /// when it begins at position 0.
    pub fn encode(
        &mut self,
        table: &MatchTable,
        block: &DataBlock<'_>,
        params: &Lzma2Params,
        stream_prop: Option<u8>,
        progress: &JobProgress,
        out: &mut Vec<u8>,
    ) -> Result<usize> {
        if block.start >= block.end {
            if let Some(prop) = stream_prop {
                out.push(prop);
                return Ok(1);
            }
            return Ok(0);
        }
        self.configure(params, block);
        table.limit_lengths(block.end);
        let max_depth = table.max_depth();
        with_cells!(table.storage(), cells => self.encode_slice(cells, block, max_depth, stream_prop, progress, out))
    }

    fn encode_slice<T: TableCells>(
        &mut self,
        cells: &T,
        block: &DataBlock<'_>,
        max_depth: u32,
        mut stream_prop: Option<u8>,
        progress: &JobProgress,
        out: &mut Vec<u8>,
    ) -> Result<usize> {
        let data = block.data;
        let initial_len = out.len();
        let props_byte = self.props.to_byte();
        let uncompressed_limit = if self.strategy == Strategy::Fast {
            MAX_CHUNK_UNCOMPRESSED_SIZE - MATCH_LEN_MAX + 1
        } else {
            MAX_CHUNK_UNCOMPRESSED_SIZE - OPTIMIZER_BUFFER_SIZE + 2
        };

        let mut encode_properties = true;
        let mut incompressible = false;
        let mut pos = block.start;

        while pos < block.end {
            self.rc.reset();
            let next_index = if incompressible {
                (pos + CHUNK_SIZE).min(block.end)
            } else {
                self.saved.copy_from(&self.model);
                let end = (pos + uncompressed_limit).min(block.end);
                let mut cur = pos;
                if pos == 0 {
                    self.encode_literal(0, data[0], 0);
                    cur += 1;
                }
                let next = self.encode_chunk(cells, block, max_depth, cur, end);
                self.rc.flush();
                next
            };

            let compressed_size = self.rc.len();
            let uncompressed_size = next_index - pos;
            if compressed_size > MAX_CHUNK_COMPRESSED_SIZE || uncompressed_size > MAX_CHUNK_UNCOMPRESSED_SIZE {
                return Err(Flzma2Error::internal(format!(
                    "chunk at {pos} exceeds size limits: {uncompressed_size} -> {compressed_size}"
                )));
            }

            let header_size = usize::from(stream_prop.is_some()) + CHUNK_HEADER_SIZE + usize::from(encode_properties);
            let chunk_start = out.len();
            if let Some(prop) = stream_prop.take() {
                out.push(prop);
            }

            if incompressible || uncompressed_size + STORED_HEADER_SIZE <= compressed_size + header_size {
                if uncompressed_size > MAX_STORED_CHUNK_SIZE {
                    return Err(Flzma2Error::internal(format!(
                        "stored chunk at {pos} too large: {uncompressed_size}"
                    )));
                }
                out.push(if pos == 0 { control::STORED_DICT_RESET } else { control::STORED });
                out.extend_from_slice(&((uncompressed_size - 1) as u16).to_be_bytes());
                out.extend_from_slice(&data[pos..next_index]);
                if !incompressible {
                    self.model.copy_from(&self.saved);
                }
                debug!(pos, uncompressed_size, compressed_size, incompressible, "stored chunk");
            } else {
                let reset = if pos == 0 {
                    control::RESET_ALL
                } else if encode_properties {
                    control::RESET_STATE_PROPS
                } else {
                    control::RESET_NOTHING
                };
                let size_high = (((uncompressed_size - 1) >> 16) as u8) & control::SIZE_HIGH_MASK;
                out.push(control::COMPRESSED | reset | size_high);
                out.extend_from_slice(&((uncompressed_size - 1) as u16).to_be_bytes());
                out.extend_from_slice(&((compressed_size - 1) as u16).to_be_bytes());
                if encode_properties {
                    out.push(props_byte);
                    encode_properties = false;
                }
                out.extend_from_slice(self.rc.as_slice());
                trace!(pos, uncompressed_size, compressed_size, reset, "compressed chunk");
            }

            if incompressible
                || uncompressed_size + STORED_HEADER_SIZE
                    <= compressed_size + (compressed_size >> RANDOM_FILTER_MARGIN_BITS) + header_size
            {
                incompressible = chunk::is_chunk_incompressible(cells, block, next_index, self.strategy.index());
            }

            progress.add(uncompressed_size, out.len() - chunk_start);
            pos = next_index;
            if progress.is_canceled() {
                return Err(Flzma2Error::Canceled);
            }
        }
        Ok(out.len() - initial_len)
    }
}

impl Default for Lzma2Encoder {
    fn default() -> Self {
        Self::new()
    }
}

fn matched_literal_price(probs: &[u16; LITERAL_CODER_SIZE], symbol: u8, match_byte: u8) -> u32 {
    let mut total = 0;
    let mut offs = 0x100u32;
    let mut symbol = symbol as u32 | 0x100;
    let mut match_byte = match_byte as u32;
    while symbol < 0x10000 {
        match_byte <<= 1;
        total += price(probs[(offs + (match_byte & offs) + (symbol >> 8)) as usize], (symbol >> 7) & 1);
        symbol <<= 1;
        offs &= !(match_byte ^ symbol);
    }
    total
}
