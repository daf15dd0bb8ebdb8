//! Table-level passes of the radix build.
//!
//! Initialisation threads every position onto the list of its two-byte
//! prefix. Build threads then claim whole lists and refine them: long lists
//! through a 16-bit radix pass, the rest through the match buffer, and lists
//! near the end of the block through a bounds-checked pass.

use crate::block::{byte_at, count_common, load4};
use crate::builder::{BuildMatch, RadixBuilder};
use crate::table::{NULL_LINK, TableCells};
use crate::{
    BUFFER_LINK_MASK, MAX_BRUTE_FORCE_LIST_SIZE, MAX_READ_BEYOND_DEPTH, MAX_REPEAT,
    RADIX16_TABLE_SIZE, STACK_SIZE,
};
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::warn;

/// Head and length of one two-byte-prefix list.
#[derive(Debug)]
pub(crate) struct ListHead {
    pub head: AtomicU32,
    pub count: AtomicU32,
}

impl ListHead {
    pub fn new() -> Self {
        Self {
            head: AtomicU32::new(NULL_LINK),
            count: AtomicU32::new(0),
        }
    }

    #[inline]
    fn head(&self) -> u32 {
        self.head.load(Ordering::Relaxed)
    }

    #[inline]
    fn set(&self, head: u32, count: u32) {
        self.head.store(head, Ordering::Relaxed);
        self.count.store(count, Ordering::Relaxed);
    }

    /// Read the list and mark it claimed.
    #[inline]
    pub fn take(&self) -> ListHeadValue {
        ListHeadValue {
            head: self.head.swap(NULL_LINK, Ordering::Relaxed),
            count: self.count.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.set(NULL_LINK, 0);
    }
}

/// A claimed list.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ListHeadValue {
    pub head: u32,
    pub count: u32,
}

/// Thread every position of `data[..end]` onto the list of its two-byte
/// prefix. Returns the number of lists, whose radix values are left in
/// `stack`. List heads must be null on entry.
pub(crate) fn init_lists<T: TableCells>(
    cells: &T,
    heads: &[ListHead],
    stack: &[AtomicU32],
    data: &[u8],
    end: usize,
) -> usize {
    if end <= 2 {
        for pos in 0..end {
            cells.set_null(pos);
        }
        return 0;
    }

    cells.set_null(0);
    let mut st_index = 0;
    let mut radix_16 = ((data[0] as usize) << 8) | data[1] as usize;
    stack[st_index].store(radix_16 as u32, Ordering::Relaxed);
    st_index += 1;
    heads[radix_16].set(0, 1);
    radix_16 = ((radix_16 & 0xFF) << 8) | data[2] as usize;

    let last = end - 2;
    for pos in 1..last {
        let next_radix = ((radix_16 & 0xFF) << 8) | data[pos + 2] as usize;
        let list = &heads[radix_16];
        let prev = list.head();
        if prev != NULL_LINK {
            cells.init_link(pos, prev);
            list.head.store(pos as u32, Ordering::Relaxed);
            list.count.fetch_add(1, Ordering::Relaxed);
        } else {
            cells.set_null(pos);
            list.set(pos as u32, 1);
            stack[st_index].store(radix_16 as u32, Ordering::Relaxed);
            st_index += 1;
        }
        radix_16 = next_radix;
    }

    // The second to last position is linked but never joins a list.
    let prev = heads[radix_16].head();
    if prev != NULL_LINK {
        cells.set_link_and_length(last, prev, 2);
    } else {
        cells.set_null(last);
    }
    cells.set_null(end - 1);
    st_index
}

/// Fill a run of a single repeated byte with distance-one matches. `i` is a
/// position inside the run; returns the first position of the run.
pub(crate) fn handle_repeat<T: TableCells>(
    cells: &T,
    data: &[u8],
    start: usize,
    i: usize,
    depth: u32,
) -> usize {
    let last_2 = i + MAX_REPEAT / 2 - 1;

    let mut i = i + ((4 - (i & 3)) & 3);
    let u = load4(data, i);
    while i >= 4 && load4(data, i - 4) == u {
        i -= 4;
    }
    while i != 0 && data[i - 1] == u[0] {
        i -= 1;
    }
    let rpt_index = i;

    if last_2 >= start {
        let mut len = depth;
        let mut i = last_2;
        while i > rpt_index && len <= T::MAX_LENGTH {
            cells.set_link_and_length(i, (i - 1) as u32, len);
            len += 1;
            i -= 1;
        }
        while i > rpt_index {
            cells.set_link_and_length(i, (i - 1) as u32, T::MAX_LENGTH);
            i -= 1;
        }
    }
    rpt_index
}

/// Fill a run of a repeated byte pair with distance-two matches at the
/// parity of `i`. Returns the first position of the run at that parity.
pub(crate) fn handle_repeat2<T: TableCells>(
    cells: &T,
    data: &[u8],
    start: usize,
    i: usize,
    depth: u32,
) -> usize {
    let last_2 = i + MAX_REPEAT * 2 - 4;

    let realign = i & 1;
    let mut i = i + ((4 - (i & 3)) & 3);
    let u = load4(data, i);
    while i >= 4 && load4(data, i - 4) == u {
        i -= 4;
    }
    while i != 0 && data[i - 1] == byte_at(data, i + 1) {
        i -= 1;
    }
    i += (i & 1) ^ realign;
    let rpt_index = i;

    if last_2 >= start {
        let extra = byte_at(data, last_2 + depth as usize) == byte_at(data, last_2);
        let mut len = depth + extra as u32;
        let mut i = last_2;
        while i > rpt_index && len <= T::MAX_LENGTH {
            cells.set_link_and_length(i, (i - 2) as u32, len);
            len += 2;
            i -= 2;
        }
        while i > rpt_index {
            cells.set_link_and_length(i, (i - 2) as u32, T::MAX_LENGTH);
            i -= 2;
        }
    }
    rpt_index
}

/// Compare every member of a short list with all older members and store
/// the longest match of each.
pub(crate) fn brute_force<T: TableCells>(
    cells: &T,
    data: &[u8],
    block_start: usize,
    link: usize,
    list_count: usize,
    depth: u32,
    max_depth: u32,
) {
    let mut buffer = [0usize; MAX_BRUTE_FORCE_LIST_SIZE + 1];
    let limit = max_depth.saturating_sub(depth) as usize;
    let offset = depth as usize;

    buffer[0] = link;
    for i in 1..list_count {
        buffer[i] = cells.link(buffer[i - 1]) as usize;
    }

    let mut i = 0;
    loop {
        let mut longest = 0;
        let mut longest_index = i + 1;
        for j in i + 1..list_count {
            let len_test = count_common(data, buffer[i] + offset, buffer[j] + offset, 0, limit);
            if len_test > longest {
                longest_index = j;
                longest = len_test;
                if len_test >= limit {
                    break;
                }
            }
        }
        if longest > 0 {
            cells.set_link_and_length(buffer[i], buffer[longest_index] as u32, depth + longest as u32);
        }
        i += 1;
        if i >= list_count - 1 || buffer[i] < block_start {
            break;
        }
    }
}

impl RadixBuilder {
    /// Split a very long list on the next two bytes at once, then hand each
    /// sub-list to brute force or the buffered recursion.
    pub(crate) fn recurse_lists_16<T: TableCells>(
        &mut self,
        cells: &T,
        data: &[u8],
        block_start: usize,
        mut link: usize,
        count: u32,
        max_depth: u32,
    ) {
        let table_max_depth = max_depth.min(T::MAX_LENGTH);
        let radix_at = |pos: usize| {
            let radix_8 = byte_at(data, pos + 2) as usize;
            (radix_8, radix_8 | ((byte_at(data, pos + 3) as usize) << 8))
        };
        let (mut next_radix_8, mut next_radix_16) = radix_at(link);
        let mut reset_list = [0u8; 256];
        let mut reset_count = 0;
        let mut st_index = 0;

        for _ in 1..count {
            let next_link = cells.initial_link(link) as usize;
            let radix_8 = next_radix_8;
            let radix_16 = next_radix_16;
            cells.set_length(link, next_link as u32, 2);
            (next_radix_8, next_radix_16) = radix_at(next_link);

            let prev = self.tails_8[radix_8].prev_index;
            self.tails_8[radix_8].prev_index = link as u32;
            if prev != NULL_LINK {
                // Overwritten below if a four-byte match turns up.
                cells.set_link_and_length(prev as usize, link as u32, 3);
            } else {
                reset_list[reset_count] = radix_8 as u8;
                reset_count += 1;
            }

            let tail = &mut self.tails_16[radix_16];
            let prev = tail.prev_index;
            tail.prev_index = link as u32;
            if prev != NULL_LINK {
                tail.list_count += 1;
                cells.set_link_and_length(prev as usize, link as u32, 4);
            } else {
                tail.list_count = 1;
                self.stack[st_index].head = link as u32;
                self.stack[st_index].count = radix_16 as u32;
                st_index += 1;
            }
            link = next_link;
        }

        let prev = self.tails_8[next_radix_8].prev_index;
        if prev != NULL_LINK {
            cells.set_link_and_length(prev as usize, link as u32, 3);
        }
        let tail = &mut self.tails_16[next_radix_16];
        if tail.prev_index != NULL_LINK {
            tail.list_count += 1;
            cells.set_link_and_length(tail.prev_index as usize, link as u32, 4);
        }

        for &radix_8 in &reset_list[..reset_count] {
            self.tails_8[radix_8 as usize].prev_index = NULL_LINK;
        }
        for entry in &mut self.stack[..st_index] {
            let tail = &mut self.tails_16[entry.count as usize];
            tail.prev_index = NULL_LINK;
            entry.count = tail.list_count;
        }

        while st_index > 0 {
            st_index -= 1;
            let list_count = self.stack[st_index].count;
            if list_count < 2 {
                continue;
            }
            let link = self.stack[st_index].head as usize;
            if link < block_start {
                continue;
            }
            if st_index > STACK_SIZE - RADIX16_TABLE_SIZE
                && st_index + list_count as usize > STACK_SIZE
            {
                continue;
            }
            let depth = cells.length(link);
            if list_count as usize <= MAX_BRUTE_FORCE_LIST_SIZE {
                brute_force(
                    cells,
                    data,
                    block_start,
                    link,
                    list_count as usize,
                    depth,
                    table_max_depth,
                );
                continue;
            }
            self.recurse_lists_buffered(
                cells,
                data,
                block_start,
                link,
                depth,
                max_depth,
                list_count,
                st_index,
            );
        }
    }

    /// Process the part of a list that lies within `max_depth` bytes of the
    /// block end, checking every read against the end. The claimed list is
    /// shortened to what remains below the bound.
    pub(crate) fn recurse_lists_bound<T: TableCells>(
        &mut self,
        cells: &T,
        data: &[u8],
        block_size: usize,
        list_head: &mut ListHeadValue,
        max_depth: u32,
    ) {
        if list_head.count < 2 {
            return;
        }
        let mut link = list_head.head as usize;
        let bounded_size = max_depth as usize + MAX_READ_BEYOND_DEPTH;
        let bounded_start = block_size - block_size.min(bounded_size);
        let mut extra_count = (max_depth >> 4) as usize + 4;
        let list_count = (list_head.count as usize)
            .min(bounded_size)
            .min(self.match_buffer.len());

        let mut count = 0;
        while count < list_count && extra_count > 0 && link < block_size {
            let next_link = cells.link(link) as usize;
            if link >= bounded_start {
                list_head.count -= 1;
                if next_link < bounded_start {
                    list_head.head = next_link as u32;
                }
            } else {
                extra_count -= 1;
            }
            self.match_buffer[count] = BuildMatch {
                from: link as u32,
                src: [0; 4],
                next: (count as u32 + 1) | (2 << 24),
            };
            link = next_link;
            count += 1;
        }
        if count < 2 {
            return;
        }

        let mut st_index = 0;
        for pos in 0..count {
            let link = self.match_buffer[pos].from as usize;
            if link < block_size - 2 {
                self.push_tail8(data[link + 2] as usize, pos, 3, &mut st_index);
            }
        }
        self.settle_stack(0, st_index);

        while st_index > 0 {
            st_index -= 1;
            let list_count = self.stack[st_index].count as usize;
            if list_count < 2 {
                continue;
            }
            let mut pos = self.stack[st_index].head as usize;
            let depth = self.match_buffer[pos].next >> 24;
            if depth >= max_depth {
                continue;
            }
            if (self.match_buffer[pos].from as usize) < bounded_start {
                continue;
            }
            let offset = depth as usize;
            let limit = block_size - offset;
            let prev_st_index = st_index;
            for _ in 0..list_count {
                let link = self.match_buffer[pos].from as usize;
                if link < limit {
                    self.push_tail8(data[link + offset] as usize, pos, depth + 1, &mut st_index);
                }
                pos = (self.match_buffer[pos].next & BUFFER_LINK_MASK) as usize;
            }
            self.settle_stack(prev_st_index, st_index);
        }

        for pos in 0..count - 1 {
            let entry = self.match_buffer[pos];
            let from = entry.from as usize;
            if from < bounded_start {
                break;
            }
            let length = (entry.next >> 24)
                .min((block_size - from) as u32)
                .min(T::MAX_LENGTH);
            let next = (entry.next & BUFFER_LINK_MASK) as usize;
            cells.set_link_and_length(from, self.match_buffer[next].from, length);
        }
    }
}

/// Cap every match that would run past `pos`, so a slice ending at `pos`
/// never encodes data beyond its end.
pub(crate) fn limit_lengths<T: TableCells>(cells: &T, pos: usize) {
    if pos == 0 {
        return;
    }
    cells.set_null(pos - 1);
    let mut length = 2usize;
    while length < T::MAX_LENGTH as usize && length <= pos {
        if let Some((link, stored)) = cells.entry(pos - length) {
            if stored as usize > length {
                cells.set_link_and_length(pos - length, link, length as u32);
            }
        }
        length += 1;
    }
}

/// Verify every match in `start..end` against the data. Returns the number
/// of invalid entries.
pub(crate) fn integrity_check<T: TableCells>(
    cells: &T,
    data: &[u8],
    start: usize,
    end: usize,
    max_depth: u32,
) -> usize {
    let mut errors = 0;
    for pos in start.max(1)..end.min(cells.capacity()) {
        let Some((link, length)) = cells.entry(pos) else {
            continue;
        };
        let link = link as usize;
        if link >= pos {
            warn!(pos, link, "match table link does not point backwards");
            errors += 1;
            continue;
        }
        let limit = (end - pos).min(T::MAX_LENGTH as usize);
        let len_test = count_common(data, link, pos, 0, limit);
        if len_test < length as usize {
            warn!(pos, link, length, actual = len_test, "match table length too long");
            errors += 1;
        } else if length < max_depth && len_test > length as usize && length >= 2 {
            tracing::trace!(pos, length, actual = len_test, "match table length shortened");
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{BitpackCells, StructuredCells};

    fn heads() -> Vec<ListHead> {
        (0..RADIX16_TABLE_SIZE).map(|_| ListHead::new()).collect()
    }

    fn stack() -> Vec<AtomicU32> {
        (0..RADIX16_TABLE_SIZE).map(|_| AtomicU32::new(0)).collect()
    }

    #[test]
    fn test_init_lists_links_prefixes() {
        let data = b"abcabcab";
        let cells = BitpackCells::new(data.len()).unwrap();
        let heads = heads();
        let stack = stack();
        let lists = init_lists(&cells, &heads, &stack, data, data.len());
        // "ab", "bc", "ca"
        assert_eq!(lists, 3);
        assert!(cells.is_null(0));
        assert_eq!(cells.initial_link(3), 0);
        assert_eq!(cells.initial_link(4), 1);
        assert_eq!(cells.initial_link(5), 2);
        // Position end-2 gets a length-2 link, end-1 is null.
        assert_eq!(cells.entry(6), Some((3, 2)));
        assert!(cells.is_null(7));
        let ab = ((b'a' as usize) << 8) | b'b' as usize;
        assert_eq!(heads[ab].head.load(Ordering::Relaxed), 3);
        assert_eq!(heads[ab].count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_init_lists_tiny() {
        let cells = StructuredCells::new(4).unwrap();
        let lists = init_lists(&cells, &heads(), &stack(), b"ab", 2);
        assert_eq!(lists, 0);
        assert!(cells.is_null(0) && cells.is_null(1));
    }

    #[test]
    fn test_handle_repeat_fills_run() {
        let mut data = vec![b'x'; 10];
        data.extend(std::iter::repeat_n(b'a', 40));
        data.extend(b"yz");
        let cells = BitpackCells::new(data.len()).unwrap();
        let first = handle_repeat(&cells, &data, 0, 20, 2);
        assert_eq!(first, 10);
        for pos in 11..=31 {
            let (link, length) = cells.entry(pos).unwrap();
            assert_eq!(link as usize, pos - 1);
            assert!(pos + length as usize <= 50, "pos {pos} length {length}");
        }
    }

    #[test]
    fn test_handle_repeat2_keeps_parity() {
        let mut data = vec![b'q'; 5];
        for _ in 0..60 {
            data.extend(b"ab");
        }
        data.push(b'z');
        let cells = StructuredCells::new(data.len()).unwrap();
        let first = handle_repeat2(&cells, &data, 0, 21, 2);
        assert_eq!(first % 2, 1);
        assert!(first <= 7);
        for pos in (first + 2..=21 + 44).step_by(2) {
            let (link, length) = cells.entry(pos).unwrap();
            assert_eq!(link as usize, pos - 2);
            assert!(count_common(&data, pos - 2, pos, 0, 255) >= length as usize);
        }
        assert!(cells.is_null(first + 1));
    }

    #[test]
    fn test_brute_force_links_longest() {
        let data = b"abcdXabcdYabcZ";
        let cells = StructuredCells::new(data.len()).unwrap();
        cells.init_link(10, 5);
        cells.init_link(5, 0);
        brute_force(&cells, data, 0, 10, 3, 2, 32);
        // "abcZ" vs "abcdY"/"abcdX": 3 bytes.
        assert_eq!(cells.entry(10), Some((5, 3)));
        // "abcdY" vs "abcdX": 4 bytes.
        assert_eq!(cells.entry(5), Some((0, 4)));
    }

    #[test]
    fn test_limit_lengths_caps_at_position() {
        let cells = StructuredCells::new(64).unwrap();
        for pos in 10..30 {
            cells.set_link_and_length(pos, (pos - 5) as u32, 40);
        }
        limit_lengths(&cells, 25);
        assert!(cells.is_null(24));
        for pos in 10..24 {
            let (_, length) = cells.entry(pos).unwrap();
            assert!(pos + length as usize <= 25, "pos {pos} length {length}");
        }
        assert_eq!(cells.entry(26), Some((21, 40)));
    }

    #[test]
    fn test_integrity_check_flags_bad_entries() {
        let data = b"abcdefabcdefxxxx";
        let cells = BitpackCells::new(data.len()).unwrap();
        cells.set_link_and_length(6, 0, 6);
        assert_eq!(integrity_check(&cells, data, 0, data.len(), 42), 0);
        cells.set_link_and_length(7, 1, 9);
        assert_eq!(integrity_check(&cells, data, 0, data.len(), 42), 1);
        cells.set_link_and_length(8, 9, 2);
        assert_eq!(integrity_check(&cells, data, 0, data.len(), 42), 2);
    }
}
