//! Three-byte hash chain used by the hybrid parser.
//!
//! The radix table gives one match per position. When that match is short,
//! the hybrid parser also walks a small hash chain for nearer matches of
//! every length, which often price better.

use flzma2_radix::RadixMatch;

/// Bits in the head table index.
pub const HASH3_BITS: u32 = 14;

const HASH3_MULTIPLIER: u32 = 506_832_829;

/// Most matches one search can return.
pub const MATCHES_MAX: usize = 65;

#[inline]
fn hash3(data: &[u8], pos: usize) -> usize {
    let mut bytes = [0u8; 4];
    let available = data.len().saturating_sub(pos).min(3);
    bytes[..available].copy_from_slice(&data[pos..pos + available]);
    let value = u32::from_le_bytes(bytes) << 8;
    (value.wrapping_mul(HASH3_MULTIPLIER) >> (32 - HASH3_BITS)) as usize
}

/// Count equal bytes at `a` and `b`, stopping when `a` reaches `limit`.
#[inline]
pub(crate) fn common_length(data: &[u8], a: usize, b: usize, limit: usize) -> usize {
    if a >= limit {
        return 0;
    }
    data[a..limit].iter().zip(&data[b..]).take_while(|(x, y)| x == y).count()
}

/// Head table plus chain of previous positions.
#[derive(Debug)]
pub struct HashChain3 {
    table: Vec<i32>,
    chain: Vec<i32>,
    chain_mask: usize,
    prev_index: isize,
}

impl HashChain3 {
    /// Create a chain with `1 << chain_log` entries.
    pub fn new(chain_log: u32) -> Self {
        let size = 1usize << chain_log;
        Self {
            table: vec![-1; 1 << HASH3_BITS],
            chain: vec![-1; size],
            chain_mask: size - 1,
            prev_index: -1,
        }
    }

    /// Number of chain entries.
    pub fn chain_size(&self) -> usize {
        self.chain.len()
    }

    /// Bytes used by a chain of this size.
    pub fn memory_usage(chain_log: u32) -> usize {
        4 * (1 << HASH3_BITS) + (4usize << chain_log)
    }

    /// Forget all positions and resume hashing at `start`, with positions
    /// within the chain window before `start` added on demand.
    pub fn reset(&mut self, start: usize) {
        self.table.fill(-1);
        let window = self.chain.len();
        self.prev_index = if start >= window {
            (start - window) as isize
        } else {
            -1
        };
    }

    /// Collect matches at `pos` in order of increasing length, each closer
    /// than the radix match `rmatch`. The radix match is appended when it is
    /// longer than all of them. Returns the longest length.
    ///
    /// `data` must hold at least four bytes from `pos`.
    pub fn get_matches(
        &mut self,
        data: &[u8],
        pos: usize,
        length_limit: usize,
        match_cycles: u32,
        rmatch: RadixMatch,
        matches: &mut Vec<RadixMatch>,
    ) -> usize {
        let window = self.chain.len() as isize;
        let ipos = pos as isize;
        self.prev_index = self.prev_index.max(ipos - window);
        loop {
            self.prev_index += 1;
            if self.prev_index >= ipos {
                break;
            }
            let index = self.prev_index as usize;
            let hash = hash3(data, index);
            self.chain[index & self.chain_mask] = self.table[hash];
            self.table[hash] = index as i32;
        }

        let hash = hash3(data, pos);
        let first = self.table[hash];
        self.table[hash] = pos as i32;

        let mut max_len = 2usize;
        if first >= 0 {
            let mut cycles = match_cycles as i32;
            let end_index = ipos - window.min(rmatch.dist as isize);
            let mut candidate = first as isize;
            while candidate >= end_index && candidate < ipos {
                cycles -= 1;
                let src = candidate as usize;
                let len = common_length(data, pos, src, pos + length_limit);
                if len > max_len {
                    matches.push(RadixMatch {
                        length: len as u32,
                        dist: (pos - src - 1) as u32,
                    });
                    max_len = len;
                    if len >= length_limit || matches.len() >= MATCHES_MAX {
                        break;
                    }
                }
                if cycles <= 0 {
                    break;
                }
                candidate = self.chain[src & self.chain_mask] as isize;
            }
        }
        self.chain[pos & self.chain_mask] = first;

        if max_len < rmatch.length as usize {
            matches.push(rmatch);
            return rmatch.length as usize;
        }
        max_len
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_length() {
        let data = b"abcabcabd";
        assert_eq!(common_length(data, 3, 0, data.len()), 5);
        assert_eq!(common_length(data, 3, 0, 5), 2);
        assert_eq!(common_length(data, 6, 6, 4), 0);
    }

    #[test]
    fn test_finds_closer_matches() {
        // "wxyz" at 0, "wxy" at 10, query at 20 with "wxyz".
        let mut data = b"wxyz______wxy_______wxyz________".to_vec();
        data.extend([0u8; 8]);
        let mut chain = HashChain3::new(8);
        chain.reset(0);
        let mut matches = Vec::new();
        // The radix match found the 4-byte source at distance 20.
        let rmatch = RadixMatch { length: 4, dist: 19 };
        let best = chain.get_matches(&data, 20, 16, 8, rmatch, &mut matches);
        assert_eq!(best, 4);
        // Only the 3-byte match at distance 10 is closer than the radix match.
        assert_eq!(matches[0], RadixMatch { length: 3, dist: 9 });
        assert_eq!(*matches.last().unwrap(), rmatch);
        for pair in matches.windows(2) {
            assert!(pair[0].length < pair[1].length);
        }
    }

    #[test]
    fn test_radix_match_bounds_search() {
        let mut chain = HashChain3::new(6);
        chain.reset(0);
        let data = vec![0u8; 64];
        let mut matches = Vec::new();
        let n = chain.get_matches(&data, 32, 16, 4, RadixMatch { length: 16, dist: 0 }, &mut matches);
        assert_eq!(n, 16);
        assert_eq!(matches.last().unwrap().length, 16);
    }
}
