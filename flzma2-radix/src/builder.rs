//! Per-thread build state and the buffered list recursion.
//!
//! A radix list is copied into the match buffer together with the next four
//! bytes of every suffix, then split into sub-lists one byte at a time. The
//! cached bytes let three passes in four run without touching the
//! dictionary. Results are written back to the table at the end.

use crate::block::{count_common, load4};
use crate::engine::{handle_repeat, handle_repeat2};
use crate::table::{NULL_LINK, TableCells};
use crate::{
    BUFFER_LINK_MASK, MATCH_BUFFER_OVERLAP, MAX_BRUTE_FORCE_LIST_SIZE, MAX_REPEAT,
    RADIX8_TABLE_SIZE, RADIX16_TABLE_SIZE, STACK_SIZE,
};
use flzma2_core::{Flzma2Error, Result};

/// One suffix in the match buffer.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct BuildMatch {
    /// Position of the suffix in the block.
    pub from: u32,
    /// The four bytes following the current depth.
    pub src: [u8; 4],
    /// Buffer index of the next suffix in its list, with the shared prefix
    /// length in the top eight bits.
    pub next: u32,
}

/// Tail of a list being split.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ListTail {
    pub prev_index: u32,
    pub list_count: u32,
}

impl Default for ListTail {
    fn default() -> Self {
        Self {
            prev_index: NULL_LINK,
            list_count: 0,
        }
    }
}

/// A list awaiting recursion: head plus, until settled, the radix that owns
/// it; afterwards the list length.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct StackEntry {
    pub head: u32,
    pub count: u32,
}

/// Scratch state owned by one build thread.
pub struct RadixBuilder {
    pub(crate) match_buffer: Vec<BuildMatch>,
    pub(crate) match_buffer_limit: usize,
    pub(crate) tails_8: Box<[ListTail]>,
    pub(crate) tails_16: Box<[ListTail]>,
    pub(crate) stack: Box<[StackEntry]>,
}

impl RadixBuilder {
    /// Create a builder with a match buffer of `buffer_size` entries.
    pub fn new(buffer_size: usize) -> Result<Self> {
        Ok(Self {
            match_buffer: alloc_buffer(buffer_size)?,
            match_buffer_limit: buffer_size,
            tails_8: vec![ListTail::default(); RADIX8_TABLE_SIZE].into_boxed_slice(),
            tails_16: vec![ListTail::default(); RADIX16_TABLE_SIZE].into_boxed_slice(),
            stack: vec![StackEntry::default(); STACK_SIZE].into_boxed_slice(),
        })
    }

    /// Entries in the match buffer.
    pub fn buffer_size(&self) -> usize {
        self.match_buffer.len()
    }

    /// Bytes used by a builder with `buffer_size` match buffer entries.
    pub fn memory_usage(buffer_size: usize) -> usize {
        buffer_size * std::mem::size_of::<BuildMatch>()
            + (RADIX8_TABLE_SIZE + RADIX16_TABLE_SIZE) * std::mem::size_of::<ListTail>()
            + STACK_SIZE * std::mem::size_of::<StackEntry>()
    }

    /// Grow the match buffer if needed and set the chunk limit.
    pub(crate) fn resize(&mut self, buffer_size: usize) -> Result<()> {
        if buffer_size > self.match_buffer.len() {
            self.match_buffer = alloc_buffer(buffer_size)?;
        }
        self.match_buffer_limit = buffer_size;
        Ok(())
    }

    /// Append `pos` to the sub-list for `radix_8`, pushing a new list on the
    /// stack when it is the first member.
    #[inline]
    pub(crate) fn push_tail8(&mut self, radix_8: usize, pos: usize, depth: u32, st_index: &mut usize) {
        let tail = &mut self.tails_8[radix_8];
        let prev = tail.prev_index;
        tail.prev_index = pos as u32;
        if prev != NULL_LINK {
            tail.list_count += 1;
            self.match_buffer[prev as usize].next = pos as u32 | (depth << 24);
        } else {
            tail.list_count = 1;
            self.stack[*st_index] = StackEntry {
                head: pos as u32,
                count: radix_8 as u32,
            };
            *st_index += 1;
        }
    }

    /// Reset the tails used by stack entries `from..to` and replace each
    /// entry's radix with its list length.
    #[inline]
    pub(crate) fn settle_stack(&mut self, from: usize, to: usize) {
        for entry in &mut self.stack[from..to] {
            let tail = &mut self.tails_8[entry.count as usize];
            tail.prev_index = NULL_LINK;
            entry.count = tail.list_count;
        }
    }

    /// Copy the list starting at `link` into the match buffer in chunks and
    /// sort each chunk, writing the results back to `cells`.
    ///
    /// Long runs of a repeated byte or byte pair are cut out of the list and
    /// resolved directly in the table.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn recurse_lists_buffered<T: TableCells>(
        &mut self,
        cells: &T,
        data: &[u8],
        block_start: usize,
        mut link: usize,
        depth: u32,
        max_depth: u32,
        orig_list_count: u32,
        stack_base: usize,
    ) {
        let mut orig_list_count = orig_list_count as usize;
        if orig_list_count < 2 || self.match_buffer_limit < 2 {
            return;
        }
        let offset = depth as usize;
        let limit = self.match_buffer_limit.min(self.match_buffer.len());
        let mut start = 0usize;

        loop {
            let mut list_count = (start + orig_list_count).min(limit);
            let mut count = start;
            let mut prev_link = usize::MAX;
            let mut rpt = 0usize;
            let mut rpt_tail = link;

            while count < list_count {
                if link >= data.len() {
                    // Ran off the end of the list.
                    orig_list_count = count - start;
                    list_count = count;
                    break;
                }
                let next_link = cells.link(link) as usize;
                let dist = prev_link.wrapping_sub(link);
                if dist > 2 {
                    self.match_buffer[count] = BuildMatch {
                        from: link as u32,
                        src: load4(data, link + offset),
                        next: (count as u32 + 1) | (depth << 24),
                    };
                    rpt = 0;
                    prev_link = link;
                    rpt_tail = link;
                    link = next_link;
                } else {
                    rpt += 3 - dist;
                    if rpt < MAX_REPEAT - 2 {
                        self.match_buffer[count] = BuildMatch {
                            from: link as u32,
                            src: load4(data, link + offset),
                            next: (count as u32 + 1) | (depth << 24),
                        };
                        prev_link = link;
                        link = next_link;
                    } else {
                        // Cut the run out of the list and resolve it in place.
                        let (rewind, removed) = if dist == 1 {
                            link = handle_repeat(cells, data, block_start, link, depth);
                            (MAX_REPEAT / 2, rpt_tail.saturating_sub(link))
                        } else {
                            link = handle_repeat2(cells, data, block_start, link, depth);
                            (MAX_REPEAT - 1, rpt_tail.saturating_sub(link) >> 1)
                        };
                        count = (count + 1).saturating_sub(rewind).max(start);
                        orig_list_count = orig_list_count.saturating_sub(removed);
                        rpt = 0;
                        list_count = (start + orig_list_count).min(limit);
                        continue;
                    }
                }
                count += 1;
            }

            count = list_count;
            if count == 0 {
                return;
            }
            // The last element points to itself.
            self.match_buffer[count - 1].next = (count as u32 - 1) | (depth << 24);

            let mut overlap = 0;
            if list_count < start + orig_list_count {
                overlap = (list_count >> MATCH_BUFFER_OVERLAP).max(1);
            }
            self.recurse_list_chunk(data, block_start, depth, max_depth, list_count, stack_base);
            orig_list_count -= list_count - start;

            // Write back everything except the last link and the overlap.
            count -= overlap.max(1);
            for pos in 0..count {
                let entry = self.match_buffer[pos];
                let from = entry.from as usize;
                if from < block_start {
                    return;
                }
                let length = (entry.next >> 24).min(T::MAX_LENGTH);
                let next = (entry.next & BUFFER_LINK_MASK) as usize;
                cells.set_link_and_length(from, self.match_buffer[next].from, length);
            }

            start = 0;
            if overlap > 0 {
                for (dest, src) in (list_count - overlap..list_count).enumerate() {
                    let from = self.match_buffer[src].from;
                    self.match_buffer[dest] = BuildMatch {
                        from,
                        src: load4(data, from as usize + offset),
                        next: (dest as u32 + 1) | (depth << 24),
                    };
                }
                start = overlap;
            }
            if orig_list_count == 0 {
                return;
            }
        }
    }

    fn recurse_list_chunk(
        &mut self,
        data: &[u8],
        block_start: usize,
        depth: u32,
        max_depth: u32,
        list_count: usize,
        stack_base: usize,
    ) {
        if list_count < 2 {
            return;
        }
        if list_count <= MAX_BRUTE_FORCE_LIST_SIZE {
            self.brute_force_buffered(data, block_start, 0, list_count, 0, depth, max_depth);
        } else {
            self.recurse_list_chunk_generic(
                data,
                block_start,
                depth,
                max_depth.max(6),
                list_count,
                stack_base,
            );
        }
    }

    /// Split the buffered list one byte at a time until every sub-list is
    /// short enough for brute force or reaches `max_depth`.
    fn recurse_list_chunk_generic(
        &mut self,
        data: &[u8],
        block_start: usize,
        base_depth: u32,
        max_depth: u32,
        list_count: usize,
        stack_base: usize,
    ) {
        let mut depth = base_depth + 1;
        let mut st_index = stack_base;

        // First pass on the byte at the base depth.
        let last = list_count - 1;
        for pos in 0..last {
            let radix_8 = self.match_buffer[pos].src[0] as usize;
            self.push_tail8(radix_8, pos, depth, &mut st_index);
        }
        self.link_last(last, 0, depth, None);
        self.settle_stack(stack_base, st_index);

        while st_index > stack_base {
            st_index -= 1;
            let count = self.stack[st_index].count as usize;
            if count < 2 {
                continue;
            }
            let mut pos = self.stack[st_index].head as usize;
            let mut link = self.match_buffer[pos].from as usize;
            if link < block_start {
                continue;
            }
            // Not enough stack left for another level.
            if st_index > STACK_SIZE - RADIX8_TABLE_SIZE && st_index + count > STACK_SIZE {
                continue;
            }
            depth = self.match_buffer[pos].next >> 24;
            let slot = ((depth - base_depth) & 3) as usize;
            if count <= MAX_BRUTE_FORCE_LIST_SIZE {
                self.brute_force_buffered(data, block_start, pos, count, slot, depth, max_depth);
                continue;
            }

            // At power-of-two depths look for runs of equal distances, which
            // come from repetitive data and would otherwise be split forever.
            let test = max_depth != 6
                && depth & 3 == 0
                && depth.is_power_of_two()
                && max_depth >= depth + (depth >> 1);
            depth += 1;
            let reload = slot == 3 && max_depth != 6;
            let prev_st_index = st_index;

            if !test && depth < max_depth {
                for _ in 0..count - 1 {
                    let radix_8 = self.match_buffer[pos].src[slot] as usize;
                    let next_index = (self.match_buffer[pos].next & BUFFER_LINK_MASK) as usize;
                    if reload {
                        self.match_buffer[pos].src = load4(data, link + depth as usize);
                    }
                    let next_link = self.match_buffer[next_index].from as usize;
                    self.push_tail8(radix_8, pos, depth, &mut st_index);
                    pos = next_index;
                    link = next_link;
                }
                self.link_last(pos, slot, depth, (slot == 3).then_some((data, link)));
                self.settle_stack(prev_st_index, st_index);
            } else if test {
                let rpt_depth = depth - 1;
                let mut rpt: Option<usize> = None;
                let mut rpt_head_next = 0usize;
                let mut rpt_dist = 0usize;
                for _ in 0..count - 1 {
                    let radix_8 = self.match_buffer[pos].src[slot] as usize;
                    let next_index = (self.match_buffer[pos].next & BUFFER_LINK_MASK) as usize;
                    let next_link = self.match_buffer[next_index].from as usize;
                    let dist = link.wrapping_sub(next_link);
                    if dist > rpt_depth as usize {
                        if let Some(n) = rpt.filter(|&n| n > 0) {
                            self.handle_repeat_buffered(data, rpt_head_next, n, rpt_dist, rpt_depth);
                        }
                        rpt = None;
                        self.push_tail8(radix_8, pos, depth, &mut st_index);
                    } else if rpt.is_none() || dist != rpt_dist {
                        if let Some(n) = rpt.filter(|&n| n > 0) {
                            self.handle_repeat_buffered(data, rpt_head_next, n, rpt_dist, rpt_depth);
                        }
                        rpt = Some(0);
                        rpt_head_next = next_index;
                        rpt_dist = dist;
                        self.push_tail8(radix_8, pos, depth, &mut st_index);
                    } else {
                        rpt = rpt.map(|n| n + 1);
                    }
                    pos = next_index;
                    link = next_link;
                }
                if let Some(n) = rpt.filter(|&n| n > 0) {
                    self.handle_repeat_buffered(data, rpt_head_next, n, rpt_dist, rpt_depth);
                }
                self.link_last(pos, slot, depth, (slot == 3).then_some((data, link)));
                self.settle_stack(prev_st_index, st_index);
            } else {
                // Final depth: link the sub-lists and discard them.
                for _ in 0..count {
                    let radix_8 = self.match_buffer[pos].src[slot] as usize;
                    let next_index = (self.match_buffer[pos].next & BUFFER_LINK_MASK) as usize;
                    let tail = &mut self.tails_8[radix_8];
                    let prev = tail.prev_index;
                    tail.prev_index = pos as u32;
                    if prev != NULL_LINK {
                        self.match_buffer[prev as usize].next = pos as u32 | (depth << 24);
                    } else {
                        self.stack[st_index].count = radix_8 as u32;
                        st_index += 1;
                    }
                    pos = next_index;
                }
                for entry in &self.stack[prev_st_index..st_index] {
                    self.tails_8[entry.count as usize].prev_index = NULL_LINK;
                }
                st_index = prev_st_index;
            }
        }
    }

    /// Attach the last element of a pass to its sub-list without starting a
    /// new one. `reload` refreshes its cached bytes at `depth`.
    #[inline]
    fn link_last(&mut self, pos: usize, slot: usize, depth: u32, reload: Option<(&[u8], usize)>) {
        let radix_8 = self.match_buffer[pos].src[slot] as usize;
        let tail = &mut self.tails_8[radix_8];
        let prev = tail.prev_index;
        if prev != NULL_LINK {
            tail.list_count += 1;
            if let Some((data, link)) = reload {
                self.match_buffer[pos].src = load4(data, link + depth as usize);
            }
            self.match_buffer[prev as usize].next = pos as u32 | (depth << 24);
        }
    }

    /// Assign lengths to a run of `count` suffixes spaced `rpt_len` apart,
    /// starting at buffer index `next`.
    fn handle_repeat_buffered(&mut self, data: &[u8], next: usize, count: usize, rpt_len: usize, depth: u32) {
        let max_len = BUFFER_MAX_LENGTH;
        let from = self.match_buffer[next].from as usize;
        let Some(older) = from.checked_sub(rpt_len) else {
            return;
        };
        let length = count_common(data, from, older, depth as usize + rpt_len, max_len as usize);
        let mut length = length as u32;
        let mut pos = next;
        for _ in 0..count {
            let next_index = self.match_buffer[pos].next & BUFFER_LINK_MASK;
            self.match_buffer[pos].next = next_index | (length.min(max_len) << 24);
            length = length.saturating_add(rpt_len as u32);
            pos = next_index as usize;
        }
    }

    /// Find the longest match for each member of a short list by direct
    /// comparison, using the cached bytes first.
    #[allow(clippy::too_many_arguments)]
    fn brute_force_buffered(
        &mut self,
        data: &[u8],
        block_start: usize,
        mut pos: usize,
        list_count: usize,
        slot: usize,
        depth: u32,
        max_depth: u32,
    ) {
        #[derive(Clone, Copy, Default)]
        struct Candidate {
            pos: usize,
            from: usize,
            src: [u8; 4],
        }

        let mut buffer = [Candidate::default(); MAX_BRUTE_FORCE_LIST_SIZE + 1];
        let limit = max_depth.saturating_sub(depth) as usize;
        let offset = depth as usize;

        for i in 0..list_count {
            let entry = self.match_buffer[pos];
            buffer[i] = Candidate {
                pos,
                from: entry.from as usize,
                src: entry.src,
            };
            pos = (entry.next & BUFFER_LINK_MASK) as usize;
        }

        let mut i = 0;
        loop {
            let mut longest = 0;
            let mut longest_index = i + 1;
            let a = buffer[i];
            for (j, b) in buffer.iter().enumerate().take(list_count).skip(i + 1) {
                let mut len_test = slot;
                while len_test < 4 && a.src[len_test] == b.src[len_test] && len_test - slot < limit {
                    len_test += 1;
                }
                len_test -= slot;
                if len_test > 0 {
                    len_test = count_common(data, a.from + offset, b.from + offset, len_test, limit);
                }
                if len_test > longest {
                    longest_index = j;
                    longest = len_test;
                    if len_test >= limit {
                        break;
                    }
                }
            }
            if longest > 0 {
                self.match_buffer[a.pos].next =
                    buffer[longest_index].pos as u32 | ((depth + longest as u32) << 24);
            }
            i += 1;
            if i >= list_count - 1 || buffer[i].from < block_start {
                break;
            }
        }
    }
}

/// Buffered lengths fit the top eight bits of `next`.
const BUFFER_MAX_LENGTH: u32 = 255;

fn alloc_buffer(size: usize) -> Result<Vec<BuildMatch>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| Flzma2Error::out_of_memory(size * std::mem::size_of::<BuildMatch>()))?;
    buffer.resize(size, BuildMatch::default());
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_sizes() {
        let builder = RadixBuilder::new(1000).unwrap();
        assert_eq!(builder.buffer_size(), 1000);
        assert_eq!(builder.tails_8.len(), RADIX8_TABLE_SIZE);
        assert_eq!(builder.stack.len(), STACK_SIZE);
        assert!(RadixBuilder::memory_usage(1000) > 1000 * 12);
    }

    #[test]
    fn test_resize_only_grows() {
        let mut builder = RadixBuilder::new(512).unwrap();
        builder.resize(256).unwrap();
        assert_eq!(builder.buffer_size(), 512);
        assert_eq!(builder.match_buffer_limit, 256);
        builder.resize(4096).unwrap();
        assert_eq!(builder.buffer_size(), 4096);
    }

    #[test]
    fn test_brute_force_buffered_picks_longest() {
        // Suffixes at 12, 8, 4, 0 all start with "ab"; 12 and 4 share "abcd".
        let data = b"abxyabcdabzzabcdQQQQ";
        let mut builder = RadixBuilder::new(256).unwrap();
        let froms = [12u32, 8, 4, 0];
        for (i, &from) in froms.iter().enumerate() {
            builder.match_buffer[i] = BuildMatch {
                from,
                src: load4(data, from as usize + 2),
                next: (i as u32 + 1) | (2 << 24),
            };
        }
        builder.match_buffer[3].next = 3 | (2 << 24);
        builder.brute_force_buffered(data, 0, 0, 4, 0, 2, 16);
        let first = builder.match_buffer[0].next;
        assert_eq!(first & BUFFER_LINK_MASK, 2);
        assert_eq!(first >> 24, 4);
    }
}
