//! The shared match table and its build protocol.
//!
//! A block is processed in two steps. [`MatchTable::init_table`] runs on one
//! thread and threads every position onto the list of its two-byte prefix.
//! [`MatchTable::build_table`] then runs once per job, each job claiming
//! whole lists from a shared counter until none remain. Every position
//! belongs to exactly one list, so jobs never write the same cell.

use crate::block::DataBlock;
use crate::builder::RadixBuilder;
use crate::engine::{self, ListHead};
use crate::matches::{self, RadixMatch};
use crate::table::{BITPACK_MAX_DICTIONARY, STRUCTURED_MAX_LENGTH, TableStorage};
use crate::{MAX_READ_BEYOND_DEPTH, RADIX16_TABLE_SIZE, with_cells};
use flzma2_core::{Flzma2Error, Result};
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Smallest table the finder allocates.
pub const DICTIONARY_SIZE_MIN: usize = 1 << 12;
/// Largest dictionary the finder supports.
pub const DICTIONARY_SIZE_MAX: usize = 1 << 30;
/// Shallowest search depth.
pub const DEPTH_MIN: u32 = 6;
/// Deepest search depth.
pub const DEPTH_MAX: u32 = 254;
/// Largest match buffer resize setting.
pub const BUFFER_RESIZE_MAX: u32 = 4;
/// Default match buffer resize setting.
pub const BUFFER_RESIZE_DEFAULT: u32 = 2;
/// Largest overlap fraction, in sixteenths of the dictionary.
pub const OVERLAP_FRACTION_MAX: u32 = 14;

const MATCH_BUFFER_SHIFT: u32 = 8;
const MATCH_BUFFER_ELBOW_BITS: u32 = 17;
const MATCH_BUFFER_ELBOW: usize = 1 << MATCH_BUFFER_ELBOW_BITS;
const MIN_MATCH_BUFFER_SIZE: usize = 256;
const MAX_MATCH_BUFFER_SIZE: usize = 1 << 24;

/// Added to the claim counter to stop all build jobs.
const CANCEL_INDEX: usize = RADIX16_TABLE_SIZE + 256;

/// Match finder configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadixParams {
    /// Dictionary size in bytes.
    pub dictionary_size: usize,
    /// Match buffer size adjustment, 0..=4. 2 is neutral.
    pub match_buffer_resize: u32,
    /// Overlap kept between blocks, in sixteenths of the dictionary.
    pub overlap_fraction: u32,
    /// Split very long lists through the match buffer instead of a 16-bit
    /// radix pass. Faster, slightly weaker.
    pub divide_and_conquer: bool,
    /// Maximum prefix length resolved during the build.
    pub depth: u32,
}

impl Default for RadixParams {
    fn default() -> Self {
        Self {
            dictionary_size: 1 << 24,
            match_buffer_resize: BUFFER_RESIZE_DEFAULT,
            overlap_fraction: 2,
            divide_and_conquer: true,
            depth: 42,
        }
    }
}

impl RadixParams {
    /// Check every field against its bounds.
    pub fn validate(&self) -> Result<()> {
        check(
            "dictionary_size",
            self.dictionary_size,
            DICTIONARY_SIZE_MIN,
            DICTIONARY_SIZE_MAX,
        )?;
        check(
            "match_buffer_resize",
            self.match_buffer_resize as usize,
            0,
            BUFFER_RESIZE_MAX as usize,
        )?;
        check(
            "overlap_fraction",
            self.overlap_fraction as usize,
            0,
            OVERLAP_FRACTION_MAX as usize,
        )?;
        check("depth", self.depth as usize, DEPTH_MIN as usize, DEPTH_MAX as usize)
    }

    /// Dictionary size actually needed for `dict_reduce` bytes of input.
    /// Zero means the input size is unknown.
    pub fn reduced_dictionary_size(&self, dict_reduce: usize) -> usize {
        if dict_reduce == 0 {
            return self.dictionary_size;
        }
        self.dictionary_size.min(dict_reduce.max(DICTIONARY_SIZE_MIN))
    }

    /// Bytes kept from the end of one block as history for the next.
    pub fn overlap_size(&self) -> usize {
        (self.dictionary_size >> 4) * self.overlap_fraction as usize
    }
}

fn check(name: &'static str, value: usize, min: usize, max: usize) -> Result<()> {
    if (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(Flzma2Error::invalid_parameter(
            name,
            value as i64,
            min as i64,
            max as i64,
        ))
    }
}

/// Whether a dictionary of this size needs the structured layout.
#[inline]
pub fn is_structured(dictionary_size: usize) -> bool {
    dictionary_size > BITPACK_MAX_DICTIONARY
}

/// Match buffer entries per build thread.
pub fn match_buffer_size(dictionary_size: usize, buffer_resize: u32) -> usize {
    let mut size = dictionary_size >> MATCH_BUFFER_SHIFT;
    if size > MATCH_BUFFER_ELBOW {
        // Grow logarithmically above the elbow.
        let mut extra = 0;
        let mut n = MATCH_BUFFER_ELBOW_BITS - 1;
        while (4usize << n) <= size {
            extra += MATCH_BUFFER_ELBOW >> 4;
            n += 1;
        }
        if (3usize << n) <= size {
            extra += MATCH_BUFFER_ELBOW >> 5;
        }
        size = MATCH_BUFFER_ELBOW + extra;
    }
    if buffer_resize > 2 {
        size += size >> (4 - buffer_resize);
    } else if buffer_resize < 2 {
        size -= size >> (buffer_resize + 1);
    }
    size.clamp(MIN_MATCH_BUFFER_SIZE, MAX_MATCH_BUFFER_SIZE)
}

/// The match table for one dictionary, shared by all build and encode jobs.
pub struct MatchTable {
    storage: TableStorage,
    params: Mutex<RadixParams>,
    list_heads: Box<[ListHead]>,
    stack: Box<[AtomicU32]>,
    end_index: AtomicUsize,
    st_index: AtomicUsize,
    progress: AtomicU64,
    builders: Box<[Mutex<RadixBuilder>]>,
}

impl MatchTable {
    /// Allocate a table for `params`, sized for `dict_reduce` bytes of input
    /// (0 for unknown), with one builder per thread.
    pub fn new(params: &RadixParams, dict_reduce: usize, thread_count: usize) -> Result<Self> {
        params.validate()?;
        let dictionary_size = params.reduced_dictionary_size(dict_reduce);
        Self::allocate(params, dictionary_size, is_structured(dictionary_size), thread_count)
    }

    fn allocate(
        params: &RadixParams,
        dictionary_size: usize,
        structured: bool,
        thread_count: usize,
    ) -> Result<Self> {
        let storage = TableStorage::new(dictionary_size, structured)?;

        let buffer_size = match_buffer_size(params.dictionary_size, params.match_buffer_resize);
        let builders = (0..thread_count.max(1))
            .map(|_| RadixBuilder::new(buffer_size).map(Mutex::new))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            dictionary_size,
            structured,
            buffer_size,
            threads = builders.len(),
            "allocated match table"
        );

        Ok(Self {
            storage,
            params: Mutex::new(*params),
            list_heads: (0..RADIX16_TABLE_SIZE).map(|_| ListHead::new()).collect(),
            stack: (0..RADIX16_TABLE_SIZE).map(|_| AtomicU32::new(0)).collect(),
            end_index: AtomicUsize::new(0),
            st_index: AtomicUsize::new(0),
            progress: AtomicU64::new(0),
            builders: builders.into_boxed_slice(),
        })
    }

    /// Estimated bytes needed for a table and its builders.
    pub fn memory_usage(dictionary_size: usize, buffer_resize: u32, thread_count: usize) -> usize {
        let cell_size = 4 + is_structured(dictionary_size) as usize;
        let buffer_size = match_buffer_size(dictionary_size, buffer_resize);
        cell_size * dictionary_size + RadixBuilder::memory_usage(buffer_size) * thread_count.max(1)
    }

    /// Whether this table can serve `params` without reallocation.
    pub fn compatible(&self, params: &RadixParams, dict_reduce: usize) -> bool {
        let dictionary_size = params.reduced_dictionary_size(dict_reduce);
        self.storage.capacity() >= dictionary_size
            && self.storage.is_structured() == is_structured(dictionary_size)
    }

    /// Adopt new depth, buffer and strategy settings for a compatible table.
    pub fn apply_parameters(&self, params: &RadixParams) -> Result<()> {
        params.validate()?;
        let buffer_size = match_buffer_size(params.dictionary_size, params.match_buffer_resize);
        for builder in self.builders.iter() {
            lock(builder).resize(buffer_size)?;
        }
        *lock(&self.params) = *params;
        Ok(())
    }

    /// Current parameters.
    pub fn params(&self) -> RadixParams {
        *lock(&self.params)
    }

    /// Whether the structured layout is in use.
    pub fn is_structured(&self) -> bool {
        self.storage.is_structured()
    }

    /// Number of positions the table holds.
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Number of build jobs the table was created for.
    pub fn thread_count(&self) -> usize {
        self.builders.len()
    }

    /// The cell storage, for direct queries by the encoder.
    pub fn storage(&self) -> &TableStorage {
        &self.storage
    }

    /// The prefix length at which the build stops; stored lengths equal to
    /// this are extended at query time.
    pub fn max_depth(&self) -> u32 {
        self.params().depth.min(STRUCTURED_MAX_LENGTH) & !1
    }

    /// Run the seed pass over `data[..end]`. Returns the number of lists.
    pub fn init_table(&self, data: &[u8], end: usize) -> Result<usize> {
        if end > self.capacity() || end > data.len() {
            return Err(Flzma2Error::internal(format!(
                "block end {end} exceeds match table capacity {}",
                self.capacity()
            )));
        }
        let lists = with_cells!(&self.storage, cells => engine::init_lists(
            cells,
            &self.list_heads,
            &self.stack,
            data,
            end,
        ));
        self.end_index.store(lists, Ordering::Relaxed);
        self.st_index.store(0, Ordering::Relaxed);
        self.progress.store(0, Ordering::Relaxed);
        debug!(end, lists, "match table seeded");
        Ok(lists)
    }

    /// Refine the lists built by [`init_table`](Self::init_table). Call once
    /// per job, concurrently when `multi_thread` is set. Job 0 tracks
    /// progress and reports cancellation.
    pub fn build_table(&self, job: usize, multi_thread: bool, block: &DataBlock<'_>) -> Result<()> {
        if block.end == 0 {
            return Ok(());
        }
        let params = self.params();
        let best = !params.divide_and_conquer;
        let max_depth = self.max_depth();
        let bounded_start = block.end - block.end.min(max_depth as usize + MAX_READ_BEYOND_DEPTH);
        let end_index = self.end_index.load(Ordering::Relaxed);
        let data = block.data;
        let mut next_progress = if job == 0 { 0 } else { RADIX16_TABLE_SIZE };

        let Some(builder) = self.builders.get(job) else {
            return Err(Flzma2Error::internal(format!("no match table builder for job {job}")));
        };
        let mut builder = lock(builder);

        with_cells!(&self.storage, cells => {
            while let Some(pos) = self.claim_list(end_index, multi_thread) {
                while next_progress < pos {
                    let radix = self.stack[next_progress].load(Ordering::Relaxed) as usize;
                    let count = self.list_heads[radix].count.load(Ordering::Relaxed);
                    self.progress.fetch_add(count as u64, Ordering::Relaxed);
                    next_progress += 1;
                }
                let radix = self.stack[pos].load(Ordering::Relaxed) as usize;
                let mut list_head = self.list_heads[radix].take();
                if list_head.count < 2 || (list_head.head as usize) < block.start {
                    continue;
                }
                if list_head.head as usize >= bounded_start {
                    builder.recurse_lists_bound(cells, data, block.end, &mut list_head, max_depth);
                    if list_head.count < 2 || (list_head.head as usize) < block.start {
                        continue;
                    }
                }
                if best && list_head.count as usize > builder.match_buffer_limit {
                    builder.recurse_lists_16(
                        cells,
                        data,
                        block.start,
                        list_head.head as usize,
                        list_head.count,
                        max_depth,
                    );
                } else {
                    builder.recurse_lists_buffered(
                        cells,
                        data,
                        block.start,
                        list_head.head as usize,
                        2,
                        max_depth,
                        list_head.count,
                        0,
                    );
                }
            }
        });

        if job == 0 && self.st_index.load(Ordering::Relaxed) >= CANCEL_INDEX {
            self.reset_incomplete_build();
            warn!("match table build canceled");
            return Err(Flzma2Error::Canceled);
        }
        Ok(())
    }

    fn claim_list(&self, end_index: usize, multi_thread: bool) -> Option<usize> {
        if self.st_index.load(Ordering::Relaxed) >= end_index {
            return None;
        }
        let pos = if multi_thread {
            self.st_index.fetch_add(1, Ordering::Relaxed)
        } else {
            let pos = self.st_index.load(Ordering::Relaxed);
            self.st_index.store(pos + 1, Ordering::Relaxed);
            pos
        };
        (pos < end_index).then_some(pos)
    }

    /// Stop all build jobs at their next list claim.
    pub fn cancel_build(&self) {
        self.st_index.fetch_add(CANCEL_INDEX, Ordering::Relaxed);
    }

    /// Clear every list head so the next [`init_table`](Self::init_table)
    /// starts clean after an interrupted build.
    pub fn reset_incomplete_build(&self) {
        for head in self.list_heads.iter() {
            head.reset();
        }
    }

    /// Positions whose lists have been claimed by the build so far.
    pub fn progress(&self) -> u64 {
        self.progress.load(Ordering::Relaxed)
    }

    /// Cap matches so none extends past `pos`.
    pub fn limit_lengths(&self, pos: usize) {
        with_cells!(&self.storage, cells => engine::limit_lengths(cells, pos));
    }

    /// Verify every entry in `block` against the data. Returns the number of
    /// invalid entries.
    pub fn integrity_check(&self, block: &DataBlock<'_>) -> usize {
        let max_depth = self.max_depth();
        with_cells!(&self.storage, cells => engine::integrity_check(
            cells,
            block.data,
            block.start,
            block.end,
            max_depth,
        ))
    }

    /// Longest match at `pos`.
    pub fn get_match(&self, block: &DataBlock<'_>, pos: usize) -> RadixMatch {
        let max_depth = self.max_depth();
        with_cells!(&self.storage, cells => matches::get_match(cells, block, max_depth, pos))
    }

    /// Longest match at `pos` unless it continues the match at `pos - 1`.
    pub fn get_next_match(&self, block: &DataBlock<'_>, pos: usize) -> RadixMatch {
        let max_depth = self.max_depth();
        with_cells!(&self.storage, cells => matches::get_next_match(cells, block, max_depth, pos))
    }
}

impl std::fmt::Debug for MatchTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchTable")
            .field("capacity", &self.capacity())
            .field("structured", &self.is_structured())
            .field("threads", &self.thread_count())
            .field("params", &self.params())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(len: usize, seed: u32) -> Vec<u8> {
        // Text-like data with plenty of medium-length repeats.
        let words: [&[u8]; 8] = [b"radix ", b"match ", b"table ", b"finder ", b"list ", b"depth ", b"buffer ", b"\n"];
        let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(1);
        let mut out = Vec::with_capacity(len);
        while out.len() < len {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            if state % 7 == 0 {
                out.push((state >> 8) as u8);
            } else {
                out.extend_from_slice(words[(state >> 16) as usize % words.len()]);
            }
        }
        out.truncate(len);
        out
    }

    fn build(table: &MatchTable, block: &DataBlock<'_>) {
        table.init_table(block.data, block.end).unwrap();
        table.build_table(0, false, block).unwrap();
    }

    fn assert_matches_valid(table: &MatchTable, block: &DataBlock<'_>) {
        let mut found = 0;
        for pos in block.start..block.end {
            let m = table.get_match(block, pos);
            if !m.is_match() {
                continue;
            }
            found += 1;
            let length = m.length as usize;
            let dist = m.dist as usize;
            assert!(dist < pos, "pos {pos} dist {dist}");
            assert!(pos + length <= block.end, "pos {pos} length {length}");
            let src = pos - dist - 1;
            assert_eq!(
                &block.data[pos..pos + length],
                &block.data[src..src + length],
                "pos {pos} length {length} dist {dist}"
            );
        }
        assert!(found > 0);
    }

    #[test]
    fn test_params_validate() {
        assert!(RadixParams::default().validate().is_ok());
        let bad = RadixParams {
            depth: 5,
            ..Default::default()
        };
        assert!(matches!(
            bad.validate(),
            Err(Flzma2Error::InvalidParameter { name: "depth", .. })
        ));
        let bad = RadixParams {
            overlap_fraction: 15,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_reduced_dictionary_size() {
        let params = RadixParams::default();
        assert_eq!(params.reduced_dictionary_size(0), 1 << 24);
        assert_eq!(params.reduced_dictionary_size(100), DICTIONARY_SIZE_MIN);
        assert_eq!(params.reduced_dictionary_size(1 << 20), 1 << 20);
        assert_eq!(params.reduced_dictionary_size(1 << 30), 1 << 24);
    }

    #[test]
    fn test_match_buffer_size() {
        assert_eq!(match_buffer_size(1 << 20, 2), 4096);
        assert_eq!(match_buffer_size(1 << 12, 2), MIN_MATCH_BUFFER_SIZE);
        assert_eq!(match_buffer_size(1 << 20, 4), 8192);
        assert_eq!(match_buffer_size(1 << 20, 0), 2048);
        // Above the elbow growth slows down.
        let big = match_buffer_size(1 << 30, 2);
        assert!(big > MATCH_BUFFER_ELBOW && big < (1 << 22));
    }

    #[test]
    fn test_layout_selection() {
        assert!(!is_structured(1 << 26));
        assert!(is_structured((1 << 26) + 1));
        let usage_small = MatchTable::memory_usage(1 << 24, 2, 1);
        let usage_threads = MatchTable::memory_usage(1 << 24, 2, 4);
        assert!(usage_small >= 4 << 24);
        assert!(usage_threads > usage_small);
    }

    #[test]
    fn test_build_matches_valid_text() {
        let data = sample(300_000, 1);
        let params = RadixParams {
            dictionary_size: 1 << 20,
            ..Default::default()
        };
        let table = MatchTable::new(&params, data.len(), 1).unwrap();
        let block = DataBlock::new(&data, 0, data.len());
        build(&table, &block);
        assert_eq!(table.integrity_check(&block), 0);
        assert_matches_valid(&table, &block);
    }

    #[test]
    fn test_build_matches_valid_repetitive() {
        let mut data = vec![b'A'; 70_000];
        data.extend(b"ABABABABAB".repeat(5000));
        data.extend(sample(20_000, 9));
        data.extend(std::iter::repeat_n(0u8, 30_000));
        let params = RadixParams {
            dictionary_size: 1 << 20,
            depth: 254,
            divide_and_conquer: false,
            ..Default::default()
        };
        let table = MatchTable::new(&params, data.len(), 1).unwrap();
        let block = DataBlock::new(&data, 0, data.len());
        build(&table, &block);
        assert_eq!(table.integrity_check(&block), 0);
        assert_matches_valid(&table, &block);
        // Inside the long run the match reaches the maximum length.
        assert_eq!(table.get_match(&block, 1000).length as usize, crate::MAX_MATCH_LENGTH);
    }

    #[test]
    fn test_build_structured_layout() {
        let data = sample(100_000, 3);
        let params = RadixParams {
            dictionary_size: 1 << 20,
            depth: 90,
            ..Default::default()
        };
        // Force the wide layout on a small table.
        let table = MatchTable::allocate(&params, data.len(), true, 1).unwrap();
        assert!(table.is_structured());
        let block = DataBlock::new(&data, 0, data.len());
        build(&table, &block);
        assert_eq!(table.integrity_check(&block), 0);
        assert_matches_valid(&table, &block);
    }

    #[test]
    fn test_build_with_overlap_start() {
        let data = sample(200_000, 4);
        let params = RadixParams {
            dictionary_size: 1 << 20,
            ..Default::default()
        };
        let table = MatchTable::new(&params, 0, 1).unwrap();
        let block = DataBlock::new(&data, 50_000, data.len());
        build(&table, &block);
        assert_eq!(table.integrity_check(&block), 0);
        assert_matches_valid(&table, &block);
    }

    #[test]
    fn test_single_thread_build_is_deterministic() {
        let data = sample(150_000, 5);
        let params = RadixParams {
            dictionary_size: 1 << 20,
            ..Default::default()
        };
        let block = DataBlock::new(&data, 0, data.len());
        let collect = || {
            let table = MatchTable::new(&params, 0, 1).unwrap();
            build(&table, &block);
            (0..data.len())
                .map(|pos| table.get_match(&block, pos))
                .collect::<Vec<_>>()
        };
        assert_eq!(collect(), collect());
    }

    #[test]
    fn test_multi_thread_build_matches_lengths() {
        let data = sample(400_000, 6);
        let params = RadixParams {
            dictionary_size: 1 << 20,
            ..Default::default()
        };
        let block = DataBlock::new(&data, 0, data.len());

        let single = MatchTable::new(&params, 0, 1).unwrap();
        build(&single, &block);

        let shared = MatchTable::new(&params, 0, 4).unwrap();
        shared.init_table(&data, data.len()).unwrap();
        std::thread::scope(|scope| {
            for job in 1..4 {
                let table = &shared;
                let block = &block;
                scope.spawn(move || table.build_table(job, true, block).unwrap());
            }
            shared.build_table(0, true, &block).unwrap();
        });

        assert_eq!(shared.integrity_check(&block), 0);
        for pos in 0..data.len() {
            assert_eq!(
                single.get_match(&block, pos).length,
                shared.get_match(&block, pos).length,
                "pos {pos}"
            );
        }
    }

    #[test]
    fn test_limit_lengths_respects_slice_end() {
        let data = vec![b'x'; 10_000];
        let params = RadixParams {
            dictionary_size: 1 << 16,
            ..Default::default()
        };
        let table = MatchTable::new(&params, 0, 1).unwrap();
        let block = DataBlock::new(&data, 0, data.len());
        build(&table, &block);
        table.limit_lengths(5000);
        let slice = block.slice(0, 5000);
        for pos in 4700..5000 {
            let m = table.get_match(&slice, pos);
            assert!(pos + m.length as usize <= 5000, "pos {pos}");
        }
    }

    #[test]
    fn test_cancel_then_reuse() {
        let data = sample(100_000, 7);
        let params = RadixParams {
            dictionary_size: 1 << 20,
            ..Default::default()
        };
        let table = MatchTable::new(&params, 0, 1).unwrap();
        let block = DataBlock::new(&data, 0, data.len());
        table.init_table(&data, data.len()).unwrap();
        table.cancel_build();
        assert!(matches!(
            table.build_table(0, false, &block),
            Err(Flzma2Error::Canceled)
        ));
        build(&table, &block);
        assert_eq!(table.integrity_check(&block), 0);
        assert_matches_valid(&table, &block);
    }

    #[test]
    fn test_compatible_and_apply() {
        let params = RadixParams {
            dictionary_size: 1 << 20,
            ..Default::default()
        };
        let table = MatchTable::new(&params, 0, 2).unwrap();
        assert!(table.compatible(&params, 0));
        let smaller = RadixParams {
            dictionary_size: 1 << 19,
            depth: 90,
            ..params
        };
        assert!(table.compatible(&smaller, 0));
        table.apply_parameters(&smaller).unwrap();
        assert_eq!(table.max_depth(), 90);
        let larger = RadixParams {
            dictionary_size: 1 << 21,
            ..params
        };
        assert!(!table.compatible(&larger, 0));
        assert!(table.compatible(&larger, 1 << 20));
    }

    #[test]
    fn test_init_rejects_oversized_block() {
        let params = RadixParams {
            dictionary_size: 1 << 12,
            ..Default::default()
        };
        let table = MatchTable::new(&params, 0, 1).unwrap();
        let data = vec![0u8; 5000];
        assert!(table.init_table(&data, data.len()).is_err());
    }
}
