//! Staging buffers for streamed input.
//!
//! Input is copied (or written in place) into a dictionary-sized buffer.
//! When the buffer fills, everything between `start` and `end` is handed out
//! as one block and the cursors meet. Before more input can be accepted the
//! buffer shifts: the last `overlap` bytes move to the front to serve as
//! history for the next block, unless a dictionary reset is due, in which
//! case the history is dropped.
//!
//! With two buffers the shift copies the overlap into the other buffer, so
//! the caller can keep writing while the previous block is still being
//! compressed out of the first one.

use crate::stream::InBuffer;
use flzma2_core::{Flzma2Error, Result, XxHash32};
use std::sync::Arc;
use tracing::debug;

/// Shifts move data by a multiple of this, keeping buffer offsets congruent
/// to stream positions for the encoder's position contexts.
pub const ALIGNMENT_SIZE: usize = 16;

/// Reset interval used when none is configured.
const UNLIMITED_RESET_INTERVAL: usize = 1 << 31;

/// Which of the two buffers is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Front,
    Back,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Side::Front => 0,
            Side::Back => 1,
        }
    }
}

/// A block claimed for compression: `data[start..end]` is new input, the
/// bytes before `start` are history.
#[derive(Debug, Clone)]
pub struct BlockData {
    /// The buffer holding the block.
    pub data: Arc<Vec<u8>>,
    /// First byte to compress.
    pub start: usize,
    /// One past the last byte to compress.
    pub end: usize,
}

/// One or two dictionary buffers with processed/filled cursors.
#[derive(Debug)]
pub struct DictBuffer {
    buffers: [Arc<Vec<u8>>; 2],
    active: Side,
    dual: bool,
    size: usize,
    overlap: usize,
    start: usize,
    end: usize,
    total: usize,
    reset_interval: usize,
    hasher: Option<XxHash32>,
}

impl DictBuffer {
    /// An unallocated buffer; `dual` selects double buffering.
    pub fn new(dual: bool) -> Self {
        Self {
            buffers: [Arc::new(Vec::new()), Arc::new(Vec::new())],
            active: Side::Front,
            dual,
            size: 0,
            overlap: 0,
            start: 0,
            end: 0,
            total: 0,
            reset_interval: UNLIMITED_RESET_INTERVAL,
            hasher: None,
        }
    }

    /// Prepare for a new frame. Buffers are reallocated only when too small.
    /// `reset_multiplier` is the number of dictionaries between resets, 0
    /// for the largest interval.
    pub fn init(
        &mut self,
        dict_size: usize,
        overlap: usize,
        reset_multiplier: u32,
        checksum: bool,
    ) -> Result<()> {
        let count = if self.dual { 2 } else { 1 };
        for buffer in &mut self.buffers[..count] {
            if buffer.len() < dict_size {
                // Release the old buffer before allocating the larger one.
                *buffer = Arc::new(Vec::new());
                *buffer = allocate(dict_size)?;
            }
        }
        self.active = Side::Front;
        self.size = dict_size;
        self.overlap = overlap;
        self.start = 0;
        self.end = 0;
        self.total = 0;
        self.reset_interval = match reset_multiplier {
            0 => UNLIMITED_RESET_INTERVAL,
            n => dict_size.saturating_mul(n as usize),
        };
        self.hasher = checksum.then(XxHash32::new);
        debug!(
            dict_size,
            overlap,
            reset_interval = self.reset_interval,
            dual = self.dual,
            "dictionary buffer ready"
        );
        Ok(())
    }

    /// Release the buffers.
    pub fn free(&mut self) {
        self.buffers = [Arc::new(Vec::new()), Arc::new(Vec::new())];
        self.size = 0;
        self.start = 0;
        self.end = 0;
        self.hasher = None;
    }

    /// Dictionary size in bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether two buffers are used.
    pub fn is_dual(&self) -> bool {
        self.dual
    }

    /// Bytes allocated for the buffers.
    pub fn memory_usage(&self) -> usize {
        (1 + self.dual as usize) * self.size
    }

    /// Space left after `end` in the active buffer.
    pub fn avail_space(&self) -> usize {
        self.size - self.end
    }

    /// Whether input is waiting to be claimed by [`take_block`](Self::take_block).
    pub fn has_unprocessed(&self) -> bool {
        self.start < self.end
    }

    /// Shift if possible, then return the writable tail of the active
    /// buffer. Report what was written with [`update`](Self::update).
    pub fn writable(&mut self) -> &mut [u8] {
        self.shift();
        let (end, size) = (self.end, self.size);
        let buffer = Arc::make_mut(&mut self.buffers[self.active.index()]);
        &mut buffer[end..size]
    }

    /// Account for `added` bytes written into [`writable`](Self::writable).
    /// Returns whether the buffer is now full.
    pub fn update(&mut self, added: usize) -> Result<bool> {
        if added > self.avail_space() {
            return Err(Flzma2Error::destination_too_small(added, self.avail_space()));
        }
        self.end += added;
        Ok(self.avail_space() == 0)
    }

    /// Copy as much of `input` as fits.
    pub fn put(&mut self, input: &mut InBuffer<'_>) {
        let to_read = self.avail_space().min(input.remaining());
        if to_read == 0 {
            return;
        }
        let (end, active) = (self.end, self.active.index());
        let buffer = Arc::make_mut(&mut self.buffers[active]);
        buffer[end..end + to_read].copy_from_slice(&input.src[input.pos..input.pos + to_read]);
        input.pos += to_read;
        self.end += to_read;
    }

    /// Claim everything between the cursors for compression.
    pub fn take_block(&mut self) -> BlockData {
        let data = Arc::clone(&self.buffers[self.active.index()]);
        if let Some(hasher) = &mut self.hasher {
            hasher.update(&data[self.start..self.end]);
        }
        let block = BlockData {
            data,
            start: self.start,
            end: self.end,
        };
        self.total += self.end - self.start;
        self.start = self.end;
        block
    }

    fn reset_due(&self) -> bool {
        self.total + self.size - self.overlap > self.reset_interval
    }

    /// Whether all input has been claimed and the buffer can recycle space.
    pub fn needs_shift(&self) -> bool {
        if self.start < self.end {
            return false;
        }
        let overlap = if self.reset_due() { 0 } else { self.overlap };
        overlap == 0 || self.end >= overlap + ALIGNMENT_SIZE
    }

    /// Move the overlap to the front of the (other, when dual) buffer, or
    /// start over empty when a dictionary reset is due.
    pub fn shift(&mut self) {
        if self.start < self.end {
            return;
        }
        let other = if self.dual {
            match self.active {
                Side::Front => Side::Back,
                Side::Back => Side::Front,
            }
        } else {
            self.active
        };

        let overlap = if self.reset_due() {
            debug!(total = self.total, "dictionary reset");
            0
        } else {
            self.overlap
        };

        if overlap == 0 {
            self.start = 0;
            self.end = 0;
            self.total = 0;
            self.active = other;
        } else if self.end >= overlap + ALIGNMENT_SIZE {
            let from = (self.end - overlap) & !(ALIGNMENT_SIZE - 1);
            let kept = self.end - from;
            if other == self.active {
                let buffer = Arc::make_mut(&mut self.buffers[other.index()]);
                buffer.copy_within(from..from + kept, 0);
            } else {
                let source = Arc::clone(&self.buffers[self.active.index()]);
                let target = Arc::make_mut(&mut self.buffers[other.index()]);
                target[..kept].copy_from_slice(&source[from..from + kept]);
            }
            debug!(kept, from, "dictionary overlap shifted");
            self.start = kept;
            self.end = kept;
            self.active = other;
        }
    }

    /// XXH32 of every block taken since [`init`](Self::init), if enabled.
    pub fn digest(&self) -> Option<u32> {
        self.hasher.as_ref().map(XxHash32::finish)
    }

    /// Total bytes taken since the last dictionary reset.
    pub fn total(&self) -> usize {
        self.total
    }
}

fn allocate(size: usize) -> Result<Arc<Vec<u8>>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(size)
        .map_err(|_| Flzma2Error::out_of_memory(size))?;
    buffer.resize(size, 0);
    Ok(Arc::new(buffer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flzma2_core::xxhash32;

    fn fill(buf: &mut DictBuffer, byte: u8) -> bool {
        let space = buf.writable();
        let n = space.len();
        space.fill(byte);
        buf.update(n).unwrap()
    }

    #[test]
    fn test_put_and_take() {
        let mut buf = DictBuffer::new(false);
        buf.init(1024, 256, 4, true).unwrap();
        let data: Vec<u8> = (0..600u32).map(|i| i as u8).collect();
        let mut input = InBuffer::new(&data);
        buf.put(&mut input);
        assert_eq!(input.pos, 600);
        assert!(buf.has_unprocessed());
        assert_eq!(buf.avail_space(), 424);

        let block = buf.take_block();
        assert_eq!((block.start, block.end), (0, 600));
        assert_eq!(&block.data[..600], &data[..]);
        assert!(!buf.has_unprocessed());
        assert_eq!(buf.digest(), Some(xxhash32(&data)));
    }

    #[test]
    fn test_shift_keeps_aligned_overlap() {
        let mut buf = DictBuffer::new(false);
        buf.init(1024, 256, 0, false).unwrap();
        let data: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        let mut input = InBuffer::new(&data);
        buf.put(&mut input);
        drop(buf.take_block());
        assert!(buf.needs_shift());
        buf.shift();

        let from = (1000 - 256) & !15;
        let kept = 1000 - from;
        assert_eq!(kept % 16, 1000 % 16);
        let block = {
            let mut more = InBuffer::new(&[7u8; 10]);
            buf.put(&mut more);
            buf.take_block()
        };
        assert_eq!(block.start, kept);
        assert_eq!(&block.data[..kept], &data[from..]);
        assert_eq!(&block.data[kept..kept + 10], &[7u8; 10]);
    }

    #[test]
    fn test_no_shift_before_overlap_filled() {
        let mut buf = DictBuffer::new(false);
        buf.init(1024, 256, 0, false).unwrap();
        let mut input = InBuffer::new(&[1u8; 100]);
        buf.put(&mut input);
        drop(buf.take_block());
        assert!(!buf.needs_shift());
        buf.shift();
        assert_eq!(buf.avail_space(), 924);
    }

    #[test]
    fn test_reset_interval_drops_history() {
        let mut buf = DictBuffer::new(false);
        buf.init(1024, 512, 1, false).unwrap();
        assert!(fill(&mut buf, 1));
        drop(buf.take_block());
        // 1024 + 1024 - 512 > 1024: the next block starts a fresh dictionary.
        buf.shift();
        assert_eq!(buf.avail_space(), 1024);
        assert_eq!(buf.total(), 0);
    }

    #[test]
    fn test_dual_buffer_alternates() {
        let mut buf = DictBuffer::new(true);
        buf.init(256, 64, 0, false).unwrap();
        assert_eq!(buf.memory_usage(), 512);
        assert!(fill(&mut buf, 0xAA));
        let first = buf.take_block();

        // The held block keeps its contents while the other buffer is written.
        assert!(fill(&mut buf, 0xBB));
        let second = buf.take_block();
        assert!(first.data[..256].iter().all(|&b| b == 0xAA));
        assert_eq!(second.start, 64);
        assert!(second.data[..64].iter().all(|&b| b == 0xAA));
        assert!(second.data[64..256].iter().all(|&b| b == 0xBB));
        assert!(!Arc::ptr_eq(&first.data, &second.data));
    }

    #[test]
    fn test_update_overflow() {
        let mut buf = DictBuffer::new(false);
        buf.init(64, 0, 0, false).unwrap();
        assert!(buf.update(65).is_err());
        assert!(buf.update(64).unwrap());
    }
}
