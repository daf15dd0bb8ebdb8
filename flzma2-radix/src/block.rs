//! Data block view and bounds-safe byte access.

/// An immutable view into a dictionary buffer.
///
/// `start` is the first position to be encoded; bytes before it form the
/// overlap carried from the previous block and are valid match sources only.
/// `end` is the exclusive upper bound of valid bytes.
#[derive(Debug, Clone, Copy)]
pub struct DataBlock<'a> {
    /// Backing bytes. At least `end` bytes long.
    pub data: &'a [u8],
    /// First position to encode.
    pub start: usize,
    /// One past the last valid position.
    pub end: usize,
}

impl<'a> DataBlock<'a> {
    /// Create a block over `data[..end]` encoding from `start`.
    pub fn new(data: &'a [u8], start: usize, end: usize) -> Self {
        let end = end.min(data.len());
        Self {
            data: &data[..end],
            start: start.min(end),
            end,
        }
    }

    /// A sub-range `[start, end)` of this block sharing the same history.
    pub fn slice(&self, start: usize, end: usize) -> Self {
        Self::new(self.data, start, end)
    }

    /// Number of positions to encode.
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    /// Whether nothing remains to be encoded.
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Read four bytes at `pos`, zero-filling past the end of `data`.
#[inline]
pub(crate) fn load4(data: &[u8], pos: usize) -> [u8; 4] {
    match data.get(pos..pos + 4) {
        Some(s) => [s[0], s[1], s[2], s[3]],
        None => {
            let mut out = [0u8; 4];
            for (i, b) in out.iter_mut().enumerate() {
                *b = data.get(pos + i).copied().unwrap_or(0);
            }
            out
        }
    }
}

/// Byte at `pos`, or 0 past the end.
#[inline]
pub(crate) fn byte_at(data: &[u8], pos: usize) -> u8 {
    data.get(pos).copied().unwrap_or(0)
}

/// Extend a common-prefix count of the strings at `a` and `b` from `len` up
/// to `limit`, never reading past the end of `data`.
#[inline]
pub(crate) fn count_common(data: &[u8], a: usize, b: usize, mut len: usize, limit: usize) -> usize {
    let limit = limit.min(data.len().saturating_sub(a.max(b)));
    while len < limit && data[a + len] == data[b + len] {
        len += 1;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load4_padding() {
        let data = [1u8, 2, 3, 4, 5];
        assert_eq!(load4(&data, 0), [1, 2, 3, 4]);
        assert_eq!(load4(&data, 3), [4, 5, 0, 0]);
        assert_eq!(load4(&data, 9), [0, 0, 0, 0]);
    }

    #[test]
    fn test_count_common_stops_at_end() {
        let data = b"abcabcab";
        assert_eq!(count_common(data, 3, 0, 0, 100), 5);
        assert_eq!(count_common(data, 3, 0, 0, 2), 2);
        assert_eq!(count_common(data, 0, 1, 0, 100), 0);
    }

    #[test]
    fn test_block_slice() {
        let data = vec![0u8; 100];
        let block = DataBlock::new(&data, 10, 80);
        assert_eq!(block.len(), 70);
        let s = block.slice(40, 80);
        assert_eq!(s.start, 40);
        assert_eq!(s.data.len(), 80);
        assert!(DataBlock::new(&data, 50, 50).is_empty());
    }
}
