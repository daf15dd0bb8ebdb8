//! XXH32 checksum for the optional stream trailer.
//!
//! The encoder hashes every block as it is taken from the dictionary buffer
//! and appends the digest little-endian after the stream terminator. The
//! verification decoder recomputes it over the decoded bytes.

const PRIME32_1: u32 = 0x9E37_79B1;
const PRIME32_2: u32 = 0x85EB_CA77;
const PRIME32_3: u32 = 0xC2B2_AE3D;
const PRIME32_4: u32 = 0x27D4_EB2F;
const PRIME32_5: u32 = 0x1656_67B1;

/// Size of the trailer digest in bytes.
pub const DIGEST_SIZE: usize = 4;

/// Compute the XXH32 of `data` with seed 0.
#[inline]
pub fn xxhash32(data: &[u8]) -> u32 {
    xxhash32_with_seed(data, 0)
}

/// Compute the XXH32 of `data` with a custom seed.
pub fn xxhash32_with_seed(data: &[u8], seed: u32) -> u32 {
    let mut lanes = Lanes::new(seed);
    let stripes = data.chunks_exact(16);
    let tail = stripes.remainder();
    let mut large = false;
    for stripe in stripes {
        lanes.consume(stripe);
        large = true;
    }
    finalize(&lanes, seed, large, data.len() as u64, tail)
}

#[derive(Clone, Copy)]
struct Lanes([u32; 4]);

impl Lanes {
    fn new(seed: u32) -> Self {
        Self([
            seed.wrapping_add(PRIME32_1).wrapping_add(PRIME32_2),
            seed.wrapping_add(PRIME32_2),
            seed,
            seed.wrapping_sub(PRIME32_1),
        ])
    }

    #[inline]
    fn consume(&mut self, stripe: &[u8]) {
        for (lane, word) in self.0.iter_mut().zip(stripe.chunks_exact(4)) {
            *lane = round32(*lane, read_u32_le(word));
        }
    }

    fn converge(&self) -> u32 {
        self.0[0]
            .rotate_left(1)
            .wrapping_add(self.0[1].rotate_left(7))
            .wrapping_add(self.0[2].rotate_left(12))
            .wrapping_add(self.0[3].rotate_left(18))
    }
}

fn finalize(lanes: &Lanes, seed: u32, large: bool, total_len: u64, tail: &[u8]) -> u32 {
    let mut h32 = if large {
        lanes.converge()
    } else {
        seed.wrapping_add(PRIME32_5)
    };
    h32 = h32.wrapping_add(total_len as u32);

    let words = tail.chunks_exact(4);
    let bytes = words.remainder();
    for word in words {
        h32 = h32.wrapping_add(read_u32_le(word).wrapping_mul(PRIME32_3));
        h32 = h32.rotate_left(17).wrapping_mul(PRIME32_4);
    }
    for &byte in bytes {
        h32 = h32.wrapping_add((byte as u32).wrapping_mul(PRIME32_5));
        h32 = h32.rotate_left(11).wrapping_mul(PRIME32_1);
    }

    h32 ^= h32 >> 15;
    h32 = h32.wrapping_mul(PRIME32_2);
    h32 ^= h32 >> 13;
    h32 = h32.wrapping_mul(PRIME32_3);
    h32 ^= h32 >> 16;
    h32
}

#[inline]
fn round32(acc: u32, input: u32) -> u32 {
    acc.wrapping_add(input.wrapping_mul(PRIME32_2))
        .rotate_left(13)
        .wrapping_mul(PRIME32_1)
}

#[inline]
fn read_u32_le(data: &[u8]) -> u32 {
    u32::from_le_bytes([data[0], data[1], data[2], data[3]])
}

/// Incremental XXH32 hasher fed block by block.
#[derive(Clone)]
pub struct XxHash32 {
    seed: u32,
    lanes: Lanes,
    pending: [u8; 16],
    pending_len: usize,
    total_len: u64,
    large: bool,
}

impl XxHash32 {
    /// Create a new hasher with seed 0.
    pub fn new() -> Self {
        Self::with_seed(0)
    }

    /// Create a new hasher with a custom seed.
    pub fn with_seed(seed: u32) -> Self {
        Self {
            seed,
            lanes: Lanes::new(seed),
            pending: [0; 16],
            pending_len: 0,
            total_len: 0,
            large: false,
        }
    }

    /// Feed more data into the hasher.
    pub fn update(&mut self, mut data: &[u8]) {
        self.total_len += data.len() as u64;

        if self.pending_len > 0 {
            let take = (16 - self.pending_len).min(data.len());
            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];
            if self.pending_len < 16 {
                return;
            }
            let stripe = self.pending;
            self.lanes.consume(&stripe);
            self.large = true;
            self.pending_len = 0;
        }

        let stripes = data.chunks_exact(16);
        let rest = stripes.remainder();
        for stripe in stripes {
            self.lanes.consume(stripe);
            self.large = true;
        }
        self.pending[..rest.len()].copy_from_slice(rest);
        self.pending_len = rest.len();
    }

    /// Digest of everything fed so far. The hasher stays usable.
    pub fn finish(&self) -> u32 {
        finalize(
            &self.lanes,
            self.seed,
            self.large,
            self.total_len,
            &self.pending[..self.pending_len],
        )
    }

    /// Number of bytes hashed since the last reset.
    pub fn total_len(&self) -> u64 {
        self.total_len
    }

    /// Reset the hasher to its initial state.
    pub fn reset(&mut self) {
        *self = Self::with_seed(self.seed);
    }
}

impl Default for XxHash32 {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for XxHash32 {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XxHash32")
            .field("seed", &self.seed)
            .field("total_len", &self.total_len)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xxhash32_known_values() {
        assert_eq!(xxhash32(&[]), 0x02CC_5D05);
        assert_eq!(xxhash32(b"abc"), 0x32D1_53FF);
    }

    #[test]
    fn test_incremental_matches_one_shot() {
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 + i / 13) as u8).collect();
        let one_shot = xxhash32(&data);

        for split in [1usize, 5, 16, 17, 64, 333] {
            let mut hasher = XxHash32::new();
            for chunk in data.chunks(split) {
                hasher.update(chunk);
            }
            assert_eq!(hasher.finish(), one_shot, "split {split}");
        }
    }

    #[test]
    fn test_reset() {
        let mut hasher = XxHash32::new();
        hasher.update(b"some bytes that will be discarded");
        hasher.reset();
        hasher.update(b"abc");
        assert_eq!(hasher.finish(), 0x32D1_53FF);
        assert_eq!(hasher.total_len(), 3);
    }

    #[test]
    fn test_with_seed() {
        let data = b"test data";
        assert_ne!(xxhash32_with_seed(data, 0), xxhash32_with_seed(data, 12345));
    }
}
