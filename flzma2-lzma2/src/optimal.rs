//! Price-driven parser for the optimal and ultra strategies.
//!
//! Starting at a position with a match, every reachable end point in a
//! small window is priced: literals, short reps, rep matches of each
//! length and normal matches of each length. The cheapest path is then
//! traced back and encoded. In hybrid mode a hash chain adds nearer,
//! shorter matches and three-step sequences ending in a rep0 match.

use crate::encoder::{Lzma2Encoder, radix_match, rep_length};
use crate::hash::common_length;
use crate::model::{MATCH_LEN_MAX, MATCH_LEN_MIN, REPS, State};
use crate::range_coder::{MIN_LITERAL_PRICE, price_0, price_1};
use flzma2_radix::{DataBlock, RadixMatch, TableCells};
use tracing::trace;

/// Parsing stops when the farthest priced node is this close to the end.
const OPTIMIZER_END_SIZE: usize = 32;

/// Nodes in the optimizer buffer.
pub(crate) const OPTIMIZER_BUFFER_SIZE: usize = MATCH_LEN_MAX * 2 + OPTIMIZER_END_SIZE;

/// How far ahead a lower price lets the parser skip.
const OPTIMIZER_SKIP_SIZE: usize = 16;

const INFINITY_PRICE: u32 = 1 << 30;

/// `dist` value marking a literal.
const NULL_DIST: u32 = u32::MAX;

/// One position in the optimizer buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OptNode {
    price: u32,
    /// Length of the step that reaches this node.
    len: u32,
    /// Rep index below [`REPS`], or distance plus [`REPS`].
    dist: u32,
    /// Bytes of match and literal preceding a final rep0 step, or 0.
    extra: u32,
    state: State,
    reps: [u32; REPS],
}

impl Default for OptNode {
    fn default() -> Self {
        Self {
            price: INFINITY_PRICE,
            len: 0,
            dist: NULL_DIST,
            extra: 0,
            state: State::new(),
            reps: [0; REPS],
        }
    }
}

impl OptNode {
    #[inline]
    fn set(&mut self, price: u32, len: usize, dist: u32, extra: usize) {
        self.price = price;
        self.len = len as u32;
        self.dist = dist;
        self.extra = extra as u32;
    }

    #[inline]
    fn mark_literal(&mut self) {
        self.dist = NULL_DIST;
        self.extra = 0;
    }

    #[inline]
    fn mark_short_rep(&mut self) {
        self.dist = 0;
        self.extra = 0;
    }
}

/// Rep distances after a step with `dist`.
#[inline]
fn next_reps(prev: &[u32; REPS], dist: u32) -> [u32; REPS] {
    if (dist as usize) < REPS {
        let mut reps = *prev;
        reps[..=dist as usize].rotate_right(1);
        reps
    } else {
        [dist - REPS as u32, prev[0], prev[1], prev[2]]
    }
}

/// Turn the back-linked path ending at `cur` into forward steps.
fn reverse_chain(opt_buf: &mut [OptNode], mut cur: usize) {
    let mut len = opt_buf[cur].len as usize;
    let mut dist = opt_buf[cur].dist;

    loop {
        let extra = opt_buf[cur].extra as usize;
        cur -= len;

        if extra > 0 {
            opt_buf[cur].len = len as u32;
            len = extra;
            if extra == 1 {
                opt_buf[cur].dist = dist;
                dist = NULL_DIST;
                cur -= 1;
            } else {
                // Match or rep, then one literal, then the rep0 just stored.
                opt_buf[cur].dist = 0;
                cur -= 1;
                len -= 1;
                opt_buf[cur].dist = NULL_DIST;
                opt_buf[cur].len = 1;
                cur -= len;
            }
        }

        let next_len = opt_buf[cur].len as usize;
        let next_dist = opt_buf[cur].dist;
        opt_buf[cur].dist = dist;
        opt_buf[cur].len = len as u32;

        if cur == 0 {
            break;
        }
        len = next_len;
        dist = next_dist;
    }
}

impl Lzma2Encoder {
    #[inline]
    fn match_length_price(&self, base: u32, dist: u32, len: usize, pos_state: usize) -> u32 {
        base + self.len_prices.get(pos_state, len) + self.distance_price(dist, len)
    }

    /// Collect the candidate matches at `pos` after the sentinel entry.
    /// Returns the longest length.
    fn collect_matches(&mut self, data: &[u8], pos: usize, length_limit: usize, m: RadixMatch) -> usize {
        self.matches.clear();
        self.matches.push(RadixMatch::default());
        let use_hash = m.length >= 3 && length_limit >= 4;
        match self.hash.as_mut() {
            Some(hash) if use_hash => {
                hash.get_matches(data, pos, length_limit, self.match_cycles, m, &mut self.matches)
            }
            _ => {
                self.matches.push(m);
                m.length as usize
            }
        }
    }

    /// Price normal matches from the candidate list for lengths of at least
    /// `start_len`. Each candidate covers the lengths above the one before it.
    fn price_candidate_matches(&mut self, cur: usize, start_len: usize, base_price: u32, pos_state: usize) {
        let mut start_match = 1;
        while start_match < self.matches.len() && start_len > self.matches[start_match].length as usize {
            start_match += 1;
        }
        self.matches[start_match - 1].length = start_len as u32 - 1;

        for index in (start_match..self.matches.len()).rev() {
            let candidate = self.matches[index];
            let base_len = self.matches[index - 1].length as usize + 1;
            let mut len = candidate.length as usize;
            while len >= base_len {
                let cost = self.match_length_price(base_price, candidate.dist, len, pos_state);
                let node = &mut self.opt_buf[cur + len];
                if cost < node.price {
                    node.set(cost, len, candidate.dist + REPS as u32, 0);
                } else {
                    break;
                }
                len -= 1;
            }
        }
    }

    /// Price every option at the first buffer position. Returns the
    /// farthest priced node, or 0 when a match of at least the fast length
    /// was stored in node 0 for immediate encoding.
    fn init_optimizer_pos0(
        &mut self,
        block: &DataBlock<'_>,
        m: RadixMatch,
        pos: usize,
        hybrid: bool,
        reps: &mut [u32; REPS],
    ) -> usize {
        let data = block.data;
        let max_length = (block.end - pos).min(MATCH_LEN_MAX);
        let mut rep_lens = [0usize; REPS];
        let mut rep_max_index = 0;
        *reps = self.model.reps;
        for (i, rep_len) in rep_lens.iter_mut().enumerate() {
            *rep_len = rep_length(data, pos, reps[i], max_length);
        }
        for i in 1..REPS {
            if rep_lens[i] > rep_lens[rep_max_index] {
                rep_max_index = i;
            }
        }

        if rep_lens[rep_max_index] >= self.fast_length {
            let node = &mut self.opt_buf[0];
            node.len = rep_lens[rep_max_index] as u32;
            node.dist = rep_max_index as u32;
            return 0;
        }
        if m.length as usize >= self.fast_length {
            let node = &mut self.opt_buf[0];
            node.len = m.length;
            node.dist = m.dist + REPS as u32;
            return 0;
        }

        let cur_byte = data[pos];
        let match_byte = data[pos - reps[0] as usize - 1];
        let state = self.model.state;
        let pos_state = pos & self.pos_mask;
        let is_match_prob = self.model.is_match[state.value()][pos_state];
        let is_rep_prob = self.model.is_rep[state.value()];

        self.opt_buf[0].state = state;
        self.opt_buf[0].reps = *reps;
        let literal = price_0(is_match_prob) + self.literal_price(pos, state, data[pos - 1], cur_byte, match_byte);
        self.opt_buf[1].price = literal;
        self.opt_buf[1].mark_literal();

        let match_price = price_1(is_match_prob);
        let rep_match_price = match_price + price_1(is_rep_prob);
        if match_byte == cur_byte {
            let short_rep = rep_match_price + self.short_rep_price(state, pos_state);
            if short_rep < self.opt_buf[1].price {
                self.opt_buf[1].price = short_rep;
                self.opt_buf[1].mark_short_rep();
            }
        }
        self.opt_buf[1].len = 1;

        for (i, &rep_len) in rep_lens.iter().enumerate() {
            if rep_len < MATCH_LEN_MIN {
                continue;
            }
            let rep_price = rep_match_price + self.rep_price(i, state, pos_state);
            for len in (MATCH_LEN_MIN..=rep_len).rev() {
                let cost = rep_price + self.rep_len_prices.get(pos_state, len);
                let node = &mut self.opt_buf[len];
                if cost < node.price {
                    node.set(cost, len, i as u32, 0);
                }
            }
        }

        let normal_match_price = match_price + price_0(is_rep_prob);
        let start_len = if rep_lens[0] >= MATCH_LEN_MIN { rep_lens[0] + 1 } else { MATCH_LEN_MIN };
        let main_len = if !hybrid {
            for len in start_len..=m.length as usize {
                let cost = self.match_length_price(normal_match_price, m.dist, len, pos_state);
                let node = &mut self.opt_buf[len];
                if cost < node.price {
                    node.set(cost, len, m.dist + REPS as u32, 0);
                }
            }
            m.length as usize
        } else if start_len <= m.length as usize {
            let limit = (block.end - pos).min(self.fast_length);
            let main_len = self.collect_matches(data, pos, limit, m);
            self.price_candidate_matches(0, start_len, normal_match_price, pos_state);
            main_len
        } else {
            0
        };
        main_len.max(rep_lens[rep_max_index])
    }

    /// Price every option at buffer position `cur`, which encodes `pos`.
    /// Returns the new farthest priced node.
    #[allow(clippy::too_many_arguments)]
    fn optimal_parse(
        &mut self,
        block: &DataBlock<'_>,
        mut m: RadixMatch,
        pos: usize,
        cur: usize,
        mut len_end: usize,
        hybrid: bool,
        reps: &mut [u32; REPS],
    ) -> usize {
        let data = block.data;
        let pos_mask = self.pos_mask;
        let pos_state = pos & pos_mask;
        let fast_length = self.fast_length;
        let cur_opt = self.opt_buf[cur];
        let mut prev_index = cur - cur_opt.len as usize;

        let state = if cur_opt.len == 1 {
            let prev = &self.opt_buf[prev_index];
            *reps = prev.reps;
            if cur_opt.dist == 0 {
                prev.state.after_short_rep()
            } else {
                prev.state.after_literal()
            }
        } else {
            let dist = cur_opt.dist;
            let state = if cur_opt.extra > 0 {
                prev_index -= cur_opt.extra as usize;
                if dist as usize >= REPS && cur_opt.extra == 1 {
                    State::MATCH_AFTER_LIT
                } else {
                    State::REP_AFTER_LIT
                }
            } else if (dist as usize) < REPS {
                self.opt_buf[prev_index].state.after_rep()
            } else {
                self.opt_buf[prev_index].state.after_match()
            };
            *reps = next_reps(&self.opt_buf[prev_index].reps, dist);
            state
        };
        self.opt_buf[cur].state = state;
        self.opt_buf[cur].reps = *reps;
        let is_rep_prob = self.model.is_rep[state.value()];

        let cur_price = cur_opt.price;
        let next_price = self.opt_buf[cur + 1].price;
        let is_match_prob = self.model.is_match[state.value()][pos_state];
        let cur_byte = data[pos];
        let match_byte = data[pos - reps[0] as usize - 1];

        let mut cur_and_lit_price = cur_price + price_0(is_match_prob);
        let mut try_lit = cur_and_lit_price + MIN_LITERAL_PRICE / 2 <= next_price;
        if try_lit {
            cur_and_lit_price += self.literal_price(pos, state, data[pos - 1], cur_byte, match_byte);
            if cur_and_lit_price < next_price {
                let next = &mut self.opt_buf[cur + 1];
                next.price = cur_and_lit_price;
                next.len = 1;
                next.mark_literal();
                if hybrid {
                    try_lit = false;
                }
            }
        }
        let match_price = cur_price + price_1(is_match_prob);
        let rep_match_price = match_price + price_1(is_rep_prob);
        if match_byte == cur_byte {
            let short_rep = rep_match_price + self.short_rep_price(state, pos_state);
            let next = &mut self.opt_buf[cur + 1];
            if short_rep <= next.price {
                next.price = short_rep;
                next.len = 1;
                next.mark_short_rep();
            }
        }
        let bytes_avail = (block.end - pos).min(OPTIMIZER_BUFFER_SIZE - 1 - cur);
        if bytes_avail < MATCH_LEN_MIN {
            return len_end;
        }

        if hybrid && try_lit && match_byte != cur_byte {
            // Literal then rep0.
            let limit = (bytes_avail - 1).min(fast_length);
            let src = pos - reps[0] as usize;
            let len_test = common_length(data, pos + 1, src, pos + 1 + limit);
            if len_test >= MATCH_LEN_MIN {
                let state_2 = state.after_literal();
                let pos_state_next = (pos + 1) & pos_mask;
                let cost = cur_and_lit_price
                    + price_1(self.model.is_match[state_2.value()][pos_state_next])
                    + price_1(self.model.is_rep[state_2.value()])
                    + self.rep0_match_price(len_test, state_2, pos_state_next);
                let offset = cur + 1 + len_test;
                if cost < self.opt_buf[offset].price {
                    len_end = len_end.max(offset);
                    self.opt_buf[offset].set(cost, len_test, 0, 1);
                }
            }
        }

        let max_length = bytes_avail.min(fast_length);
        let mut start_len = MATCH_LEN_MIN;

        if m.length > 0 {
            for rep_index in 0..REPS {
                let len_test = rep_length(data, pos, reps[rep_index], max_length);
                if len_test == 0 {
                    continue;
                }
                len_end = len_end.max(cur + len_test);
                let cur_rep_price = rep_match_price + self.rep_price(rep_index, state, pos_state);
                for len in MATCH_LEN_MIN..=len_test {
                    let cost = cur_rep_price + self.rep_len_prices.get(pos_state, len);
                    let node = &mut self.opt_buf[cur + len];
                    if cost < node.price {
                        node.set(cost, len, rep_index as u32, 0);
                    }
                }
                if rep_index == 0 {
                    start_len = len_test + 1;
                }

                let src = pos - reps[rep_index] as usize - 1;
                if hybrid
                    && len_test + 3 <= bytes_avail
                    && data[pos + len_test + 1..pos + len_test + 3] == data[src + len_test + 1..src + len_test + 3]
                {
                    // Rep, literal, then rep0 at the same distance.
                    let len_test_2 = MATCH_LEN_MIN
                        + common_length(
                            data,
                            pos + len_test + 3,
                            src + len_test + 3,
                            pos + (len_test + 1 + fast_length).min(bytes_avail),
                        );
                    let state_2 = state.after_rep();
                    let pos_state_next = (pos + len_test) & pos_mask;
                    let mut cost = cur_rep_price
                        + self.rep_len_prices.get(pos_state, len_test)
                        + price_0(self.model.is_match[state_2.value()][pos_state_next])
                        + self.matched_literal_price_at(
                            pos + len_test,
                            data[pos + len_test - 1],
                            data[pos + len_test],
                            data[src + len_test],
                        );
                    let state_2 = State::LIT_AFTER_REP;
                    let pos_state_next = (pos + len_test + 1) & pos_mask;
                    cost += price_1(self.model.is_match[state_2.value()][pos_state_next])
                        + price_1(self.model.is_rep[state_2.value()])
                        + self.rep0_match_price(len_test_2, state_2, pos_state_next);
                    let offset = cur + len_test + 1 + len_test_2;
                    if cost < self.opt_buf[offset].price {
                        len_end = len_end.max(offset);
                        self.opt_buf[offset].set(cost, len_test_2, rep_index as u32, len_test + 1);
                    }
                }
            }
        }

        if m.length as usize >= start_len && max_length >= start_len {
            let normal_match_price = match_price + price_0(is_rep_prob);
            if !hybrid {
                let length = (m.length as usize).min(max_length);
                len_end = len_end.max(cur + length);
                let mut len = length;
                while len >= start_len {
                    let cost = self.match_length_price(normal_match_price, m.dist, len, pos_state);
                    let node = &mut self.opt_buf[cur + len];
                    if cost < node.price {
                        node.set(cost, len, m.dist + REPS as u32, 0);
                    } else {
                        break;
                    }
                    len -= 1;
                }
            } else {
                m.length = m.length.min(max_length as u32);
                let main_len = self.collect_matches(data, pos, max_length, m);
                len_end = len_end.max(cur + main_len);
                len_end = self.price_hybrid_matches(
                    block,
                    pos,
                    cur,
                    len_end,
                    start_len,
                    normal_match_price,
                    bytes_avail,
                    state,
                );
            }
        }
        len_end
    }

    /// Hybrid pricing of the candidate list, including match, literal, then
    /// rep0 sequences for each candidate's full length.
    #[allow(clippy::too_many_arguments)]
    fn price_hybrid_matches(
        &mut self,
        block: &DataBlock<'_>,
        pos: usize,
        cur: usize,
        mut len_end: usize,
        start_len: usize,
        normal_match_price: u32,
        bytes_avail: usize,
        state: State,
    ) -> usize {
        let data = block.data;
        let pos_mask = self.pos_mask;
        let pos_state = pos & pos_mask;
        let fast_length = self.fast_length;

        let mut start_match = 1;
        while start_match < self.matches.len() && start_len > self.matches[start_match].length as usize {
            start_match += 1;
        }
        self.matches[start_match - 1].length = start_len as u32 - 1;

        for index in (start_match..self.matches.len()).rev() {
            let candidate = self.matches[index];
            let full_len = candidate.length as usize;
            let src = pos - candidate.dist as usize - 1;
            let rep0_pos = full_len + 1;
            let base_len = self.matches[index - 1].length as usize + 1;

            let mut len = full_len;
            while len >= base_len {
                let cost = self.match_length_price(normal_match_price, candidate.dist, len, pos_state);
                let sub_len = len < full_len;
                let node = &mut self.opt_buf[cur + len];
                if cost < node.price {
                    node.set(cost, len, candidate.dist + REPS as u32, 0);
                } else if sub_len {
                    break;
                }

                if !sub_len
                    && rep0_pos + 2 <= bytes_avail
                    && data[pos + rep0_pos..pos + rep0_pos + 2] == data[src + rep0_pos..src + rep0_pos + 2]
                {
                    // Match, literal, then rep0 at the match distance.
                    let limit = (rep0_pos + fast_length).min(bytes_avail);
                    let len_test_2 =
                        MATCH_LEN_MIN + common_length(data, pos + rep0_pos + 2, src + rep0_pos + 2, pos + limit);
                    let state_2 = state.after_match();
                    let pos_state_next = (pos + len) & pos_mask;
                    let mut total = cost
                        + price_0(self.model.is_match[state_2.value()][pos_state_next])
                        + self.matched_literal_price_at(pos + len, data[pos + len - 1], data[pos + len], data[src + len]);
                    let state_2 = State::LIT_AFTER_MATCH;
                    let pos_state_next = (pos_state_next + 1) & pos_mask;
                    total += price_1(self.model.is_match[state_2.value()][pos_state_next])
                        + price_1(self.model.is_rep[state_2.value()])
                        + self.rep0_match_price(len_test_2, state_2, pos_state_next);
                    let offset = cur + rep0_pos + len_test_2;
                    if total < self.opt_buf[offset].price {
                        len_end = len_end.max(offset);
                        self.opt_buf[offset].set(total, len_test_2, candidate.dist + REPS as u32, rep0_pos);
                    }
                }
                len -= 1;
            }
        }
        len_end
    }

    /// Parse and encode from `start` until the path ends at a position
    /// without a pending long match. Returns the next unencoded position.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn encode_optimum_sequence<T: TableCells>(
        &mut self,
        cells: &T,
        block: &DataBlock<'_>,
        max_depth: u32,
        hybrid: bool,
        mut start: usize,
        uncompressed_end: usize,
        mut m: RadixMatch,
    ) -> usize {
        let mut len_end = self.len_end_max;
        loop {
            for node in &mut self.opt_buf[1..=len_end] {
                node.price = INFINITY_PRICE;
            }

            let mut reps = [0u32; REPS];
            let mut pos = start;
            len_end = self.init_optimizer_pos0(block, m, pos, hybrid, &mut reps);
            m.length = 0;
            let mut cur = 1;

            if len_end > 0 {
                pos += 1;
                'parse: while cur < len_end {
                    if len_end >= OPTIMIZER_BUFFER_SIZE - OPTIMIZER_END_SIZE {
                        // Near the buffer end; prefer farther end points.
                        let mut price = self.opt_buf[cur].price;
                        let delta = price / cur as u32 / 2;
                        for j in cur + 1..=len_end {
                            let price2 = self.opt_buf[j].price;
                            if price >= price2 {
                                price = price2;
                                cur = j;
                            }
                            price += delta;
                        }
                        break;
                    }

                    let end = (cur + OPTIMIZER_SKIP_SIZE).min(len_end);
                    let mut price = self.opt_buf[cur].price;
                    for j in cur + 1..=end {
                        let price2 = self.opt_buf[j].price;
                        if price >= price2 {
                            price = price2;
                            pos += j - cur;
                            cur = j;
                            if cur == len_end {
                                break 'parse;
                            }
                        }
                    }

                    m = radix_match(cells, block, max_depth, pos);
                    if m.length as usize >= self.fast_length {
                        break;
                    }
                    len_end = self.optimal_parse(block, m, pos, cur, len_end, hybrid, &mut reps);
                    cur += 1;
                    pos += 1;
                }
                trace!(start, cur, "optimal parse end");
                reverse_chain(&mut self.opt_buf, cur);
            }

            let mut i = 0;
            loop {
                let node = self.opt_buf[i];
                let len = node.len as usize;
                let at = start + i;
                if len == 1 && node.dist == NULL_DIST {
                    self.encode_literal_at(block.data, at);
                    i += 1;
                } else {
                    let pos_state = at & self.pos_mask;
                    if node.dist as usize >= REPS {
                        self.encode_normal_match(len, node.dist - REPS as u32, pos_state);
                        i += len;
                    } else if len == 1 {
                        self.encode_short_rep(pos_state);
                        i += 1;
                    } else {
                        self.encode_rep_long(len, node.dist as usize, pos_state);
                        i += len;
                    }
                }
                if i >= cur {
                    break;
                }
            }
            start += i;

            if !(m.length as usize >= self.fast_length
                && start < uncompressed_end
                && self.rc.len() < self.chunk_size)
            {
                break;
            }
        }
        self.len_end_max = len_end;
        start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_size() {
        assert_eq!(OPTIMIZER_BUFFER_SIZE, 578);
    }

    #[test]
    fn test_next_reps() {
        let prev = [10, 20, 30, 40];
        assert_eq!(next_reps(&prev, 0), [10, 20, 30, 40]);
        assert_eq!(next_reps(&prev, 1), [20, 10, 30, 40]);
        assert_eq!(next_reps(&prev, 3), [40, 10, 20, 30]);
        assert_eq!(next_reps(&prev, 4 + 99), [99, 10, 20, 30]);
    }

    fn node(len: u32, dist: u32, extra: u32) -> OptNode {
        OptNode {
            len,
            dist,
            extra,
            ..OptNode::default()
        }
    }

    #[test]
    fn test_reverse_simple_chain() {
        // literal, match of 3, rep of 2
        let mut buf = vec![OptNode::default(); 8];
        buf[1] = node(1, NULL_DIST, 0);
        buf[4] = node(3, 4 + 7, 0);
        buf[6] = node(2, 1, 0);
        reverse_chain(&mut buf, 6);
        assert_eq!((buf[0].len, buf[0].dist), (1, NULL_DIST));
        assert_eq!((buf[1].len, buf[1].dist), (3, 4 + 7));
        assert_eq!((buf[4].len, buf[4].dist), (2, 1));
    }

    #[test]
    fn test_reverse_match_literal_rep0() {
        // A match of 3, a literal, then rep0 of 4, stored as one node.
        let mut buf = vec![OptNode::default(); 10];
        buf[8] = node(4, 4 + 5, 4);
        reverse_chain(&mut buf, 8);
        assert_eq!((buf[0].len, buf[0].dist), (3, 4 + 5));
        assert_eq!((buf[3].len, buf[3].dist), (1, NULL_DIST));
        assert_eq!((buf[4].len, buf[4].dist), (4, 0));
    }

    #[test]
    fn test_reverse_literal_rep0() {
        let mut buf = vec![OptNode::default(); 8];
        buf[5] = node(4, 0, 1);
        reverse_chain(&mut buf, 5);
        assert_eq!((buf[0].len, buf[0].dist), (1, NULL_DIST));
        assert_eq!((buf[1].len, buf[1].dist), (4, 0));
    }
}
