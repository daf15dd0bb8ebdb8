//! Match queries against a built table.

use crate::MAX_MATCH_LENGTH;
use crate::block::DataBlock;
use crate::table::TableCells;

/// A longest-match result. `dist` is the zero-based distance: the source
/// starts `dist + 1` bytes before the queried position.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RadixMatch {
    /// Match length; 0 means no match.
    pub length: u32,
    /// Distance minus one.
    pub dist: u32,
}

impl RadixMatch {
    /// Whether this is a real match.
    #[inline]
    pub fn is_match(&self) -> bool {
        self.length > 0
    }
}

/// Longest match at `pos`. Stored lengths that hit `max_depth` or the layout
/// limit are extended by following the table and then comparing bytes, up to
/// the block end or the maximum match length.
#[inline]
pub fn get_match<T: TableCells>(cells: &T, block: &DataBlock<'_>, max_depth: u32, pos: usize) -> RadixMatch {
    let Some((link, length)) = cells.entry(pos) else {
        return RadixMatch::default();
    };
    let link = link as usize;
    if link >= pos || length == 0 {
        return RadixMatch::default();
    }
    let length = if length == max_depth || length == T::MAX_LENGTH {
        extend_match(cells, block, pos, link, length)
    } else {
        length
    };
    RadixMatch {
        length,
        dist: (pos - link - 1) as u32,
    }
}

/// Like [`get_match`], but returns no match when `pos - 1` holds the same
/// match one byte longer, since the caller has already seen it.
#[inline]
pub fn get_next_match<T: TableCells>(
    cells: &T,
    block: &DataBlock<'_>,
    max_depth: u32,
    pos: usize,
) -> RadixMatch {
    let previous = pos.checked_sub(1).and_then(|p| cells.entry(p));
    let continues = match (cells.entry(pos), previous) {
        (Some((link, _)), Some((prev_link, _))) => prev_link.wrapping_add(1) == link,
        _ => false,
    };
    if continues {
        return RadixMatch::default();
    }
    get_match(cells, block, max_depth, pos)
}

fn extend_match<T: TableCells>(cells: &T, block: &DataBlock<'_>, pos: usize, link: usize, length: u32) -> u32 {
    let dist = pos - link;
    let limit = block.end.min(pos + MAX_MATCH_LENGTH);
    let mut end_index = pos + length as usize;

    // Chain through entries that continue at the same distance.
    while end_index < limit {
        match cells.entry(end_index) {
            Some((next_link, next_length))
                if next_length > 0 && end_index - dist == next_link as usize =>
            {
                end_index += next_length as usize;
            }
            _ => break,
        }
    }
    if end_index >= limit {
        return (limit - pos) as u32;
    }

    let data = block.data;
    while end_index < limit && data[end_index - dist] == data[end_index] {
        end_index += 1;
    }
    (end_index - pos) as u32
}
