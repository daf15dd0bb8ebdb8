//! The compression context: parameters, encoders and the job scheduler.
//!
//! A block is compressed in two phases that share one thread pool. First the
//! radix match table is built for the whole block, the calling thread taking
//! build job 0 and the pool the rest. Then the block is cut into equal
//! slices, one per encoder, and every slice is encoded independently into
//! its job's output buffer. Output is collected in slice order.
//!
//! ```text
//! block ─► init_table ─► build_table × mf_threads ─► encode slice × threads
//!                                                        │
//!                       out[0] ─► out[1] ─► ... ◄────────┘
//! ```

use crate::dict_buffer::{ALIGNMENT_SIZE, BlockData};
use crate::lock;
use crate::params::{
    CompressionParams, DEFAULT_LEVEL, MAX_THREADS, Parameter, level_params,
};
use crate::pool::ThreadPool;
use crate::stream::OutBuffer;
use flzma2_core::{Flzma2Error, Result, xxhash32};
use flzma2_lzma2::decoder::CHECKSUM_FLAG;
use flzma2_lzma2::{JobProgress, Lzma2Encoder, Lzma2Params, Strategy, dict_size_prop};
use flzma2_radix::{DataBlock, MatchTable};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Fewest block bytes per match table build job.
const MATCH_FINDER_MIN_BYTES_PER_THREAD: usize = 1024;
/// Fewest slice bytes per encoder job.
const ENCODER_MIN_BYTES_PER_THREAD: usize = 0x1C000;
/// Chunk stream terminator.
const END_MARKER: u8 = 0;

/// Worst-case output size for `src_len` input bytes, including the property
/// byte, terminator and checksum.
pub fn compress_bound(src_len: usize) -> usize {
    flzma2_lzma2::compress_bound(src_len)
}

/// Input consumed and output produced so far in the current frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Progress {
    /// Estimated input bytes processed, weighting match finding against
    /// encoding.
    pub input: u64,
    /// Compressed bytes produced.
    pub output: u64,
}

struct EncodeJob {
    encoder: Lzma2Encoder,
    start: usize,
    end: usize,
    out: Vec<u8>,
    error: Option<Flzma2Error>,
}

#[derive(Debug, Default)]
struct BlockStats {
    stream_total: u64,
    stream_csize: u64,
    block_start: usize,
    block_end: usize,
    match_weight: u64,
    encode_weight: u64,
}

/// State reachable from worker threads.
struct Shared {
    jobs: Box<[Mutex<EncodeJob>]>,
    progress: JobProgress,
    table: Mutex<Option<Arc<MatchTable>>>,
    thread_count: AtomicUsize,
    async_error: Mutex<Option<Flzma2Error>>,
    stats: Mutex<BlockStats>,
}

impl Shared {
    fn table(&self) -> Option<Arc<MatchTable>> {
        lock(&self.table).clone()
    }

    fn cancel(&self) {
        self.progress.cancel();
        if let Some(table) = self.table() {
            table.cancel_build();
        }
    }

    fn progress(&self) -> Progress {
        let stats = lock(&self.stats);
        let encode_size = (stats.block_end - stats.block_start) as u64;
        let bytes_in = self.progress.bytes_in();
        let input = if bytes_in == 0 && stats.block_end != 0 {
            let built = self.table().map_or(0, |table| table.progress());
            stats.stream_total
                + ((built * encode_size / stats.block_end as u64 * stats.match_weight) >> 4)
        } else {
            stats.stream_total
                + ((stats.match_weight * encode_size) >> 4)
                + ((bytes_in * stats.encode_weight) >> 4)
        };
        Progress {
            input,
            output: stats.stream_csize + self.progress.bytes_out(),
        }
    }
}

/// Everything a block's jobs need, shared with the pool.
struct BlockTask {
    table: Arc<MatchTable>,
    data: Arc<Vec<u8>>,
    start: usize,
    end: usize,
    params: Lzma2Params,
    stream_prop: Option<u8>,
    integrity_check: bool,
}

impl BlockTask {
    fn block(&self) -> DataBlock<'_> {
        DataBlock::new(self.data.as_slice(), self.start, self.end)
    }
}

fn build_job(shared: &Shared, task: &BlockTask, n: usize) {
    if let Err(err) = task.table.build_table(n, true, &task.block()) {
        lock(&shared.jobs[n]).error = Some(err);
    }
}

fn encode_job(shared: &Shared, task: &BlockTask, n: usize) {
    let mut guard = lock(&shared.jobs[n]);
    let job = &mut *guard;
    let block = DataBlock::new(task.data.as_slice(), job.start, job.end);
    let prop = if n == 0 { task.stream_prop } else { None };
    let encoded = job.encoder.encode(
        &task.table,
        &block,
        &task.params,
        prop,
        &shared.progress,
        &mut job.out,
    );
    match encoded {
        Ok(size) => trace!(job = n, start = job.start, end = job.end, size, "slice encoded"),
        Err(err) => job.error = Some(err),
    }
}

/// Wait for the pool's range. A panicked job left its slot unfinished, so
/// the block fails.
fn wait_for_workers(pool: &ThreadPool) -> Result<()> {
    pool.wait_all(None);
    match pool.take_panicked() {
        0 => Ok(()),
        panicked => Err(Flzma2Error::internal(format!(
            "{panicked} compression job(s) panicked"
        ))),
    }
}

fn take_job_error(shared: &Shared, count: usize) -> Result<()> {
    let mut first = None;
    for job in &shared.jobs[..count] {
        if let Some(err) = lock(job).error.take() {
            first.get_or_insert(err);
        }
    }
    first.map_or(Ok(()), Err)
}

/// Build the table for the task's block, then encode its slices.
fn compress_block(shared: &Arc<Shared>, pool: Option<&ThreadPool>, task: &Arc<BlockTask>) -> Result<()> {
    let encode_size = task.end - task.start;
    let threads = (encode_size / ENCODER_MIN_BYTES_PER_THREAD).clamp(1, shared.jobs.len());
    let slice_size = encode_size / threads;

    for (index, job) in shared.jobs.iter().enumerate() {
        let mut job = lock(job);
        job.error = None;
        if index < threads {
            job.start = task.start + index * slice_size;
            job.end = if index + 1 == threads {
                task.end
            } else {
                job.start + slice_size
            };
            job.out.clear();
        }
    }

    task.table.init_table(task.data.as_slice(), task.end)?;
    if shared.progress.is_canceled() {
        task.table.reset_incomplete_build();
        return Err(Flzma2Error::Canceled);
    }

    let mf_threads =
        (task.end / MATCH_FINDER_MIN_BYTES_PER_THREAD).clamp(1, task.table.thread_count());
    debug!(
        start = task.start,
        end = task.end,
        mf_threads,
        threads,
        "compressing block"
    );

    let build_pool = pool.filter(|_| mf_threads > 1);
    if let Some(pool) = build_pool {
        let (shared, task) = (Arc::clone(shared), Arc::clone(task));
        pool.run_range(Arc::new(move |n| build_job(&shared, &task, n)), 1, mf_threads);
    }
    let built = task.table.build_table(0, mf_threads > 1, &task.block());
    let workers = build_pool.map_or(Ok(()), wait_for_workers);
    built?;
    workers?;
    take_job_error(shared, mf_threads)?;

    if task.integrity_check {
        let errors = task.table.integrity_check(&task.block());
        if errors != 0 {
            warn!(errors, "match table integrity check failed");
            return Err(Flzma2Error::internal(format!(
                "match table has {errors} invalid entries"
            )));
        }
    }

    let encode_pool = pool.filter(|_| threads > 1);
    if let Some(pool) = encode_pool {
        let (shared, task) = (Arc::clone(shared), Arc::clone(task));
        pool.run_range(Arc::new(move |n| encode_job(&shared, &task, n)), 1, threads);
    }
    encode_job(shared, task, 0);
    encode_pool.map_or(Ok(()), wait_for_workers)?;
    take_job_error(shared, threads)?;

    shared.thread_count.store(threads, Ordering::Release);
    Ok(())
}

fn highbit(value: usize) -> u32 {
    usize::BITS - 1 - value.max(1).leading_zeros()
}

fn resolve_threads(threads: usize) -> Result<usize> {
    if threads > MAX_THREADS {
        return Err(Flzma2Error::invalid_parameter(
            "nb_threads",
            threads as i64,
            0,
            MAX_THREADS as i64,
        ));
    }
    if threads == 0 {
        let available = std::thread::available_parallelism().map_or(1, |n| n.get());
        return Ok(available.min(MAX_THREADS));
    }
    Ok(threads)
}

/// A clonable handle for watching or canceling a context from another
/// thread.
#[derive(Clone)]
pub struct ContextHandle {
    shared: Arc<Shared>,
}

impl ContextHandle {
    /// Progress of the running frame.
    pub fn progress(&self) -> Progress {
        self.shared.progress()
    }

    /// Ask the running compression to stop. It returns
    /// [`Flzma2Error::Canceled`] after its current unit of work.
    pub fn cancel(&self) {
        warn!("compression cancel requested");
        self.shared.cancel();
    }
}

impl std::fmt::Debug for ContextHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextHandle")
            .field("progress", &self.progress())
            .finish()
    }
}

/// A multithreaded LZMA2 compression context.
///
/// # Example
///
/// ```rust
/// use flzma2::{Context, Parameter};
///
/// let mut ctx = Context::with_level(3, 2).unwrap();
/// ctx.set_parameter(Parameter::UseChecksum, 1).unwrap();
/// let data = b"hello hello hello hello".repeat(100);
/// let packed = ctx.compress(&data).unwrap();
/// assert_eq!(flzma2::decompress(&packed).unwrap(), data);
/// ```
pub struct Context {
    params: CompressionParams,
    level: u32,
    high: bool,
    checksum: bool,
    omit_prop: bool,
    integrity_check: bool,
    locked: bool,
    threads: usize,
    shared: Arc<Shared>,
    pool: Option<Arc<ThreadPool>>,
    compress_thread: Option<ThreadPool>,
    timeout: Option<Duration>,
    dict_max: usize,
    out_job: usize,
    out_pos: usize,
    window: Arc<Vec<u8>>,
}

impl Context {
    /// A context with `threads` encoders (0 for one per available core) at
    /// the default level.
    pub fn new(threads: usize) -> Result<Self> {
        let threads = resolve_threads(threads)?;
        let jobs = (0..threads)
            .map(|_| {
                Mutex::new(EncodeJob {
                    encoder: Lzma2Encoder::new(),
                    start: 0,
                    end: 0,
                    out: Vec::new(),
                    error: None,
                })
            })
            .collect();
        let pool = if threads > 1 {
            Some(Arc::new(ThreadPool::new(threads - 1)?))
        } else {
            None
        };
        debug!(threads, "compression context created");
        Ok(Self {
            params: CompressionParams::default(),
            level: DEFAULT_LEVEL,
            high: false,
            checksum: true,
            omit_prop: false,
            integrity_check: false,
            locked: false,
            threads,
            shared: Arc::new(Shared {
                jobs,
                progress: JobProgress::new(),
                table: Mutex::new(None),
                thread_count: AtomicUsize::new(0),
                async_error: Mutex::new(None),
                stats: Mutex::new(BlockStats::default()),
            }),
            pool,
            compress_thread: None,
            timeout: None,
            dict_max: 0,
            out_job: 0,
            out_pos: 0,
            window: Arc::new(Vec::new()),
        })
    }

    /// A context at `level` of the normal table.
    pub fn with_level(level: u32, threads: usize) -> Result<Self> {
        let mut ctx = Self::new(threads)?;
        ctx.apply_level(level, false)?;
        Ok(ctx)
    }

    /// Number of encoder jobs.
    pub fn thread_count(&self) -> usize {
        self.threads
    }

    /// Current level.
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Current parameters.
    pub fn params(&self) -> &CompressionParams {
        &self.params
    }

    /// Replace all parameters at once.
    pub fn set_params(&mut self, params: CompressionParams) -> Result<()> {
        if self.locked {
            return Err(Flzma2Error::parameter_locked("params"));
        }
        params.validate()?;
        self.params = params;
        Ok(())
    }

    /// Load a preset from the normal or high table.
    pub fn apply_level(&mut self, level: u32, high: bool) -> Result<()> {
        if self.locked {
            return Err(Flzma2Error::parameter_locked(Parameter::CompressionLevel.name()));
        }
        let row = level_params(level, high)?;
        self.params.apply_level(&row);
        self.level = level;
        self.high = high;
        Ok(())
    }

    /// Set one parameter. Out-of-range values are rejected without changing
    /// anything, except lc/lp overflow which is stored and reported.
    /// [`Parameter::NbThreads`] is fixed at construction.
    pub fn set_parameter(&mut self, param: Parameter, value: usize) -> Result<()> {
        if self.locked && !param.is_frame_safe() {
            return Err(Flzma2Error::parameter_locked(param.name()));
        }
        match param {
            Parameter::CompressionLevel => {
                let level = u32::try_from(value).unwrap_or(u32::MAX);
                self.apply_level(level, self.high)
            }
            Parameter::HighCompression => self.apply_level(self.level, value != 0),
            Parameter::UseChecksum => {
                self.checksum = value != 0;
                Ok(())
            }
            Parameter::OmitProperties => {
                self.omit_prop = value != 0;
                Ok(())
            }
            Parameter::IntegrityCheck => {
                self.integrity_check = value != 0;
                Ok(())
            }
            Parameter::NbThreads => Err(Flzma2Error::parameter_locked(param.name())),
            _ => self.params.set(param, value),
        }
    }

    /// Read one parameter.
    pub fn get_parameter(&self, param: Parameter) -> usize {
        match param {
            Parameter::CompressionLevel => self.level as usize,
            Parameter::HighCompression => self.high as usize,
            Parameter::UseChecksum => self.checksum as usize,
            Parameter::OmitProperties => self.omit_prop as usize,
            Parameter::IntegrityCheck => self.integrity_check as usize,
            Parameter::NbThreads => self.threads,
            _ => self.params.get(param).unwrap_or(0),
        }
    }

    /// Compress `src` into a new buffer: property byte, chunks, terminator
    /// and checksum as configured.
    pub fn compress(&mut self, src: &[u8]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(compress_bound(src.len()));
        self.compress_with(src, |bytes| {
            out.extend_from_slice(bytes);
            Ok(())
        })?;
        Ok(out)
    }

    /// Compress `src` into `dst`, returning the bytes written. Fails with
    /// [`Flzma2Error::DestinationTooSmall`] when `dst` cannot hold it; the
    /// call can be repeated with a larger buffer.
    pub fn compress_into(&mut self, src: &[u8], dst: &mut [u8]) -> Result<usize> {
        let mut written = 0;
        let capacity = dst.len();
        self.compress_with(src, |bytes| {
            let end = written + bytes.len();
            if end > capacity {
                return Err(Flzma2Error::destination_too_small(end, capacity));
            }
            dst[written..end].copy_from_slice(bytes);
            written = end;
            Ok(())
        })?;
        Ok(written)
    }

    fn compress_with(&mut self, src: &[u8], mut sink: impl FnMut(&[u8]) -> Result<()>) -> Result<()> {
        self.pre_begin_frame(src.len());
        self.begin_frame(src.len())?;
        let result = self.compress_buffer(src, &mut sink).and_then(|written| {
            let mut tail = Vec::with_capacity(6);
            if written == 0 && !self.omit_prop {
                tail.push(self.prop_byte(0));
            }
            tail.push(END_MARKER);
            if self.checksum && !self.omit_prop {
                tail.extend_from_slice(&xxhash32(src).to_le_bytes());
            }
            sink(&tail)
        });
        self.end_frame();
        result
    }

    /// Compress `src`, which may be larger than the dictionary, block by
    /// block. Returns the bytes passed to `sink`.
    fn compress_buffer(
        &mut self,
        src: &[u8],
        sink: &mut impl FnMut(&[u8]) -> Result<()>,
    ) -> Result<usize> {
        if src.is_empty() {
            return Ok(0);
        }
        let dict = self.params.dictionary_size;
        let overlap = self.params.radix_params().overlap_size();
        let reset_limit = dict.saturating_mul(self.params.reset_interval as usize);
        let mut stream_prop = (!self.omit_prop).then(|| self.prop_byte(src.len().min(dict)));

        let mut base = 0;
        let mut start = 0;
        let mut remaining = src.len();
        let mut block_total = 0;
        let mut written = 0;
        loop {
            let end = start + remaining.min(dict - start);
            block_total += end - start;

            let window = Arc::make_mut(&mut self.window);
            window.clear();
            window
                .try_reserve(end)
                .map_err(|_| Flzma2Error::out_of_memory(end))?;
            window.extend_from_slice(&src[base..base + end]);
            let block = BlockData {
                data: Arc::clone(&self.window),
                start,
                end,
            };
            self.compress_cur_block(block, stream_prop.take(), false)?;
            written += self.drain_jobs(sink)?;

            remaining -= end - start;
            if remaining == 0 {
                return Ok(written);
            }
            let reset = self.params.reset_interval != 0
                && block_total + (dict - overlap).min(remaining) > reset_limit;
            let next_start = if reset || overlap == 0 {
                debug!(block_total, "dictionary reset");
                block_total = 0;
                0
            } else {
                end - ((end - overlap) & !(ALIGNMENT_SIZE - 1))
            };
            base += end - next_start;
            start = next_start;
        }
    }

    fn drain_jobs(&mut self, sink: &mut impl FnMut(&[u8]) -> Result<()>) -> Result<usize> {
        let count = self.shared.thread_count.load(Ordering::Acquire);
        let mut written = 0;
        for job in &self.shared.jobs[..count] {
            let job = lock(job);
            sink(&job.out)?;
            written += job.out.len();
        }
        self.out_job = count;
        Ok(written)
    }

    /// Property byte for a stream whose dictionary needs `dictionary_size`.
    pub(crate) fn prop_byte(&self, dictionary_size: usize) -> u8 {
        dict_size_prop(dictionary_size) | if self.checksum { CHECKSUM_FLAG } else { 0 }
    }

    /// Dictionary size class of the frame so far, or of the configured
    /// dictionary before any block.
    pub fn dict_prop(&self) -> u8 {
        dict_size_prop(if self.dict_max != 0 {
            self.dict_max
        } else {
            self.params.dictionary_size
        })
    }

    /// Largest block end seen in the current frame.
    pub(crate) fn dict_max(&self) -> usize {
        self.dict_max
    }

    /// Estimated memory for compressing with `params` on `threads` threads.
    pub fn estimate_memory_usage(params: &CompressionParams, threads: usize) -> usize {
        let threads = resolve_threads(threads).unwrap_or(MAX_THREADS);
        MatchTable::memory_usage(params.dictionary_size, params.buffer_resize, threads)
            + flzma2_lzma2::memory_usage(params.chain_log, params.strategy, threads)
    }

    /// Estimated memory for this context's parameters.
    pub fn memory_usage(&self) -> usize {
        Self::estimate_memory_usage(&self.params, self.threads)
    }

    /// Progress of the running frame.
    pub fn progress(&self) -> Progress {
        self.shared.progress()
    }

    /// A handle for progress and cancellation from other threads.
    pub fn handle(&self) -> ContextHandle {
        ContextHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Stop a running asynchronous block and end the frame.
    pub fn cancel(&mut self) {
        if let Some(thread) = &self.compress_thread {
            if !thread.is_idle() {
                warn!("canceling block compression");
                self.shared.cancel();
                thread.wait_all(None);
            }
            thread.take_panicked();
            self.shared.progress.reset();
            lock(&self.shared.async_error).take();
        }
        self.end_frame();
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.locked
    }

    pub(crate) fn checksum(&self) -> bool {
        self.checksum
    }

    pub(crate) fn omit_prop(&self) -> bool {
        self.omit_prop
    }

    /// Run block compression on a dedicated thread from now on.
    pub(crate) fn enable_async(&mut self) -> Result<()> {
        if self.compress_thread.is_none() {
            self.compress_thread = Some(ThreadPool::new(1)?);
        }
        Ok(())
    }

    pub(crate) fn disable_async(&mut self) {
        if let Some(thread) = self.compress_thread.take() {
            thread.wait_all(None);
        }
    }

    pub(crate) fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Drop a match table that cannot serve the current parameters.
    pub(crate) fn pre_begin_frame(&mut self, dict_reduce: usize) {
        let radix = self.params.radix_params();
        let mut table = lock(&self.shared.table);
        if table
            .as_ref()
            .is_some_and(|t| !t.compatible(&radix, dict_reduce))
        {
            debug!("match table incompatible with new parameters");
            *table = None;
        }
    }

    /// Allocate or adapt the match table and reset all frame state.
    pub(crate) fn begin_frame(&mut self, dict_reduce: usize) -> Result<()> {
        self.params.validate()?;
        let radix = self.params.radix_params();
        let table = match self.shared.table() {
            Some(table) => {
                table.apply_parameters(&radix)?;
                table
            }
            None => Arc::new(MatchTable::new(&radix, dict_reduce, self.threads)?),
        };
        *lock(&self.shared.table) = Some(table);

        *lock(&self.shared.stats) = BlockStats::default();
        self.shared.progress.reset();
        lock(&self.shared.async_error).take();
        self.shared.thread_count.store(0, Ordering::Release);
        self.dict_max = 0;
        self.out_job = 0;
        self.out_pos = 0;
        self.locked = true;
        Ok(())
    }

    pub(crate) fn end_frame(&mut self) {
        self.dict_max = 0;
        lock(&self.shared.async_error).take();
        self.locked = false;
    }

    fn init_progress(&self) {
        let mut stats = lock(&self.shared.stats);
        stats.stream_csize += self.shared.progress.bytes_out();
        let canceled = self.shared.progress.is_canceled();
        self.shared.progress.reset();
        if canceled {
            self.shared.progress.cancel();
        }
    }

    fn progress_weights(&self, block_end: usize) -> (u64, u64) {
        let mut match_weight = highbit(block_end);
        if match_weight < 20 {
            return (8, 8);
        }
        let depth = self.params.depth;
        let depth_weight = 2 + (depth >= 12) as u32 + (depth >= 28) as u32;
        match_weight = depth_weight * (match_weight - 10) + (match_weight - 19) * 12;
        let encode_weight = match self.params.strategy {
            Strategy::Fast => 20,
            Strategy::Optimal => 50,
            Strategy::Ultra => 60 + self.params.chain_log + highbit(self.params.fast_length) * 3,
        };
        let match_weight = (match_weight << 4) / (match_weight + encode_weight);
        (match_weight as u64, 16 - match_weight as u64)
    }

    /// Start compressing `block`. Runs on the compression thread when one
    /// exists and `allow_async` is set, otherwise completes before returning.
    pub(crate) fn compress_cur_block(
        &mut self,
        block: BlockData,
        stream_prop: Option<u8>,
        allow_async: bool,
    ) -> Result<()> {
        self.init_progress();
        if block.start == block.end {
            return Ok(());
        }
        self.dict_max = self.dict_max.max(block.end);
        self.out_job = 0;
        self.out_pos = 0;
        self.shared.thread_count.store(0, Ordering::Release);

        let table = self
            .shared
            .table()
            .ok_or_else(|| Flzma2Error::internal("no match table; frame not started"))?;
        let (match_weight, encode_weight) = self.progress_weights(block.end);
        {
            let mut stats = lock(&self.shared.stats);
            stats.stream_total += (stats.block_end - stats.block_start) as u64;
            stats.block_start = block.start;
            stats.block_end = block.end;
            stats.match_weight = match_weight;
            stats.encode_weight = encode_weight;
        }

        let task = Arc::new(BlockTask {
            table,
            data: block.data,
            start: block.start,
            end: block.end,
            params: self.params.lzma2_params(),
            stream_prop,
            integrity_check: self.integrity_check,
        });

        match &self.compress_thread {
            Some(thread) if allow_async => {
                let shared = Arc::clone(&self.shared);
                let pool = self.pool.clone();
                thread.run(
                    Arc::new(move |_| {
                        if let Err(err) = compress_block(&shared, pool.as_deref(), &task) {
                            *lock(&shared.async_error) = Some(err);
                        }
                    }),
                    0,
                );
                Ok(())
            }
            _ => compress_block(&self.shared, self.pool.as_deref(), &task),
        }
    }

    /// Wait for the asynchronous block, if any. Returns whether output is
    /// pending, [`Flzma2Error::TimedOut`] if the timeout passed first.
    pub(crate) fn wait(&mut self) -> Result<bool> {
        if let Some(thread) = &self.compress_thread {
            if thread.wait_all(self.timeout) {
                return Err(Flzma2Error::TimedOut);
            }
            if thread.take_panicked() != 0 {
                let mut failed = lock(&self.shared.async_error);
                failed.get_or_insert_with(|| Flzma2Error::internal("block compression panicked"));
            }
        }
        let failed = lock(&self.shared.async_error).take();
        if let Some(err) = failed {
            if matches!(err, Flzma2Error::Canceled) {
                warn!("block compression canceled");
            }
            self.end_frame();
            return Err(err);
        }
        Ok(self.has_pending_output())
    }

    /// Whether the compression thread is working on a block.
    pub(crate) fn is_compressing(&self) -> bool {
        self.compress_thread
            .as_ref()
            .is_some_and(|thread| !thread.is_idle())
    }

    pub(crate) fn has_pending_output(&self) -> bool {
        self.out_job < self.shared.thread_count.load(Ordering::Acquire)
    }

    /// Bytes of compressed output not yet delivered.
    pub(crate) fn remaining_output_size(&self) -> usize {
        let count = self.shared.thread_count.load(Ordering::Acquire);
        self.shared.jobs[self.out_job.min(count)..count]
            .iter()
            .map(|job| lock(job).out.len())
            .sum::<usize>()
            .saturating_sub(self.out_pos)
    }

    /// Copy pending output in slice order. Returns whether some remains.
    pub(crate) fn copy_output(&mut self, output: &mut OutBuffer<'_>) -> bool {
        let count = self.shared.thread_count.load(Ordering::Acquire);
        while self.out_job < count {
            let job = lock(&self.shared.jobs[self.out_job]);
            let pending = &job.out[self.out_pos..];
            let n = pending.len().min(output.remaining());
            output.dst[output.pos..output.pos + n].copy_from_slice(&pending[..n]);
            output.pos += n;
            self.out_pos += n;
            if self.out_pos < job.out.len() {
                return true;
            }
            drop(job);
            self.out_pos = 0;
            self.out_job += 1;
        }
        false
    }

    /// Take the next job's pending output whole.
    pub(crate) fn next_output(&mut self) -> Option<Vec<u8>> {
        let count = self.shared.thread_count.load(Ordering::Acquire);
        if self.out_job >= count {
            return None;
        }
        let mut job = lock(&self.shared.jobs[self.out_job]);
        let out = if self.out_pos == 0 {
            std::mem::take(&mut job.out)
        } else {
            job.out[self.out_pos..].to_vec()
        };
        drop(job);
        self.out_job += 1;
        self.out_pos = 0;
        Some(out)
    }

    /// Append frame trailer bytes after the last pending output.
    pub(crate) fn append_trailer(&mut self, bytes: &[u8]) {
        let count = self.shared.thread_count.load(Ordering::Acquire);
        let index = if self.out_job >= count {
            self.out_job = 0;
            self.out_pos = 0;
            self.shared.thread_count.store(1, Ordering::Release);
            lock(&self.shared.jobs[0]).out.clear();
            0
        } else {
            count - 1
        };
        lock(&self.shared.jobs[index]).out.extend_from_slice(bytes);
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if self.is_compressing() {
            self.shared.cancel();
        }
        self.disable_async();
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("threads", &self.threads)
            .field("level", &self.level)
            .field("high", &self.high)
            .field("params", &self.params)
            .field("checksum", &self.checksum)
            .field("omit_prop", &self.omit_prop)
            .field("locked", &self.locked)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flzma2_lzma2::decoder;

    fn sample(len: usize) -> Vec<u8> {
        let mut seed = 7u32;
        (0..len)
            .map(|i| {
                seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
                if (seed >> 16) % 4 == 0 {
                    (seed >> 24) as u8
                } else {
                    b"abcdefgh"[i % 8]
                }
            })
            .collect()
    }

    #[test]
    fn test_empty_input_layout() {
        let mut ctx = Context::new(1).unwrap();
        let out = ctx.compress(&[]).unwrap();
        assert_eq!(out[..2], [CHECKSUM_FLAG, END_MARKER]);
        assert_eq!(out[2..], xxhash32(&[]).to_le_bytes());

        ctx.set_parameter(Parameter::UseChecksum, 0).unwrap();
        assert_eq!(ctx.compress(&[]).unwrap(), [0x00, 0x00]);

        ctx.set_parameter(Parameter::OmitProperties, 1).unwrap();
        assert_eq!(ctx.compress(&[]).unwrap(), [END_MARKER]);
    }

    #[test]
    fn test_round_trip_with_checksum() {
        let data = sample(300_000);
        let mut ctx = Context::with_level(5, 2).unwrap();
        let out = ctx.compress(&data).unwrap();
        assert_eq!(out[0] & CHECKSUM_FLAG, CHECKSUM_FLAG);
        assert_eq!(decoder::decompress(&out).unwrap(), data);
    }

    #[test]
    fn test_omitted_properties() {
        let data = sample(10_000);
        let mut ctx = Context::with_level(2, 1).unwrap();
        ctx.set_parameter(Parameter::OmitProperties, 1).unwrap();
        let out = ctx.compress(&data).unwrap();
        assert_eq!(decoder::decompress_raw(&out, false).unwrap(), data);
    }

    #[test]
    fn test_compress_into_too_small() {
        let data = sample(50_000);
        let mut ctx = Context::with_level(1, 1).unwrap();
        let mut small = vec![0u8; 16];
        let err = ctx.compress_into(&data, &mut small).unwrap_err();
        assert!(matches!(err, Flzma2Error::DestinationTooSmall { .. }));

        let mut big = vec![0u8; compress_bound(data.len())];
        let n = ctx.compress_into(&data, &mut big).unwrap();
        assert_eq!(decoder::decompress(&big[..n]).unwrap(), data);
    }

    #[test]
    fn test_blocks_larger_than_dictionary() {
        let data = sample(3 << 20);
        let mut ctx = Context::with_level(1, 2).unwrap();
        ctx.set_parameter(Parameter::ResetInterval, 2).unwrap();
        let out = ctx.compress(&data).unwrap();
        assert_eq!(decoder::decompress(&out).unwrap(), data);
        let info = decoder::stream_info(&out).unwrap();
        assert!(info.dictionary_resets >= 2);
    }

    #[test]
    fn test_parameter_rejection_keeps_state() {
        let mut ctx = Context::new(1).unwrap();
        let before = *ctx.params();
        assert!(ctx.set_parameter(Parameter::FastLength, 5).is_err());
        assert!(ctx.set_parameter(Parameter::CompressionLevel, 11).is_err());
        assert_eq!(*ctx.params(), before);
        assert_eq!(ctx.get_parameter(Parameter::CompressionLevel), 6);
        assert!(matches!(
            ctx.set_parameter(Parameter::NbThreads, 4),
            Err(Flzma2Error::ParameterLocked { .. })
        ));
        assert_eq!(ctx.get_parameter(Parameter::NbThreads), 1);
    }

    #[test]
    fn test_high_compression_table() {
        let mut ctx = Context::new(1).unwrap();
        ctx.set_parameter(Parameter::CompressionLevel, 2).unwrap();
        ctx.set_parameter(Parameter::HighCompression, 1).unwrap();
        assert_eq!(ctx.get_parameter(Parameter::SearchDepth), 254);
        assert_eq!(ctx.get_parameter(Parameter::DictionarySize), 2 << 20);
        assert_eq!(ctx.get_parameter(Parameter::ChainLog), 10);
    }

    #[test]
    fn test_thread_limits() {
        assert!(Context::new(MAX_THREADS + 1).is_err());
        assert!(Context::new(0).unwrap().thread_count() >= 1);
    }

    #[test]
    fn test_progress_reaches_input_size() {
        let data = sample(200_000);
        let mut ctx = Context::with_level(4, 1).unwrap();
        let out = ctx.compress(&data).unwrap();
        let progress = ctx.progress();
        // The terminator and checksum are written outside the encoders.
        assert_eq!(progress.output as usize + 1 + 4, out.len());
        assert!(progress.input > 0);
    }

    #[test]
    fn test_memory_estimate_grows_with_level() {
        let small = Context::estimate_memory_usage(&CompressionParams::from_level(1, false).unwrap(), 1);
        let large = Context::estimate_memory_usage(&CompressionParams::from_level(9, false).unwrap(), 1);
        assert!(large > small);
        assert!(small > 1 << 20);
    }

    #[test]
    fn test_weights() {
        let ctx = Context::new(1).unwrap();
        assert_eq!(ctx.progress_weights(1000), (8, 8));
        let (m, e) = ctx.progress_weights(16 << 20);
        assert_eq!(m + e, 16);
    }

    #[test]
    fn test_integrity_check_passes() {
        let data = sample(100_000);
        let mut ctx = Context::with_level(3, 2).unwrap();
        ctx.set_parameter(Parameter::IntegrityCheck, 1).unwrap();
        let out = ctx.compress(&data).unwrap();
        assert_eq!(decoder::decompress(&out).unwrap(), data);
    }

    #[test]
    fn test_worker_panic_fails_the_block() {
        let pool = ThreadPool::new(2).unwrap();
        pool.run_range(
            Arc::new(|n: usize| {
                if n == 2 {
                    panic!("slice failed");
                }
            }),
            1,
            3,
        );
        assert!(matches!(
            wait_for_workers(&pool),
            Err(Flzma2Error::Internal { .. })
        ));

        pool.run_range(Arc::new(|_: usize| {}), 1, 3);
        assert!(wait_for_workers(&pool).is_ok());
    }

    #[test]
    fn test_short_distances_every_level() {
        let mut data = b"abcde".repeat(13);
        data.extend_from_slice(b"Zqabcdq");
        let mut long = Vec::new();
        for i in 0..150_000u32 {
            long.extend_from_slice(if i % 3 == 0 { b"abcde" } else { b"uvwxyz" });
            long.push(b'a' + (i % 23) as u8);
        }
        for level in 1..=10 {
            for (input, threads) in [(&data, 1), (&long, 4)] {
                let mut ctx = Context::with_level(level, threads).unwrap();
                let out = ctx.compress(input).unwrap();
                assert_eq!(&decoder::decompress(&out).unwrap(), input, "level {level}");
            }
        }
    }
}
