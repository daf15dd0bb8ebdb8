//! Streaming compression.
//!
//! [`CompressStream`] accepts input in pieces, buffering it until a whole
//! dictionary is available, and hands back compressed output either by
//! copying into caller buffers ([`OutBuffer`]) or one job buffer at a time
//! ([`CompressStream::next_compressed_buffer`]).
//!
//! With a dual buffer, blocks are compressed on a background thread while
//! the caller keeps filling the other buffer.

use crate::context::{Context, ContextHandle, Progress};
use crate::dict_buffer::DictBuffer;
use crate::params::{CompressionParams, Parameter};
use flzma2_core::{CompressStatus, Compressor, Flzma2Error, FlushMode, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// Calls without progress tolerated before the stream gives up.
const MAX_IDLE_LOOPS: u32 = 10;
const END_MARKER: u8 = 0;

/// Input with a read cursor.
#[derive(Debug)]
pub struct InBuffer<'a> {
    /// The input bytes.
    pub src: &'a [u8],
    /// Bytes consumed so far.
    pub pos: usize,
}

impl<'a> InBuffer<'a> {
    /// Wrap `src` with the cursor at the start.
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.src.len() - self.pos
    }
}

/// Output space with a write cursor.
#[derive(Debug)]
pub struct OutBuffer<'a> {
    /// The output space.
    pub dst: &'a mut [u8],
    /// Bytes written so far.
    pub pos: usize,
}

impl<'a> OutBuffer<'a> {
    /// Wrap `dst` with the cursor at the start.
    pub fn new(dst: &'a mut [u8]) -> Self {
        Self { dst, pos: 0 }
    }

    /// Space left after the cursor.
    pub fn remaining(&self) -> usize {
        self.dst.len() - self.pos
    }
}

/// A streaming LZMA2 compressor.
///
/// # Example
///
/// ```rust
/// use flzma2::{CompressStream, InBuffer};
///
/// let mut stream = CompressStream::new(1, false).unwrap();
/// stream.init(3).unwrap();
/// let data = b"streamed data, streamed data, streamed data".repeat(50);
/// let mut packed = Vec::new();
/// for piece in data.chunks(100) {
///     stream.compress(&mut InBuffer::new(piece), None).unwrap();
///     while let Some(out) = stream.next_compressed_buffer().unwrap() {
///         packed.extend_from_slice(&out);
///     }
/// }
/// while stream.end(None).unwrap() != 0 {
///     while let Some(out) = stream.next_compressed_buffer().unwrap() {
///         packed.extend_from_slice(&out);
///     }
/// }
/// assert_eq!(flzma2::decompress(&packed).unwrap(), data);
/// ```
#[derive(Debug)]
pub struct CompressStream {
    ctx: Context,
    dict: DictBuffer,
    wrote_prop: bool,
    end_marked: bool,
    finished: bool,
    needs_init: bool,
    loop_count: u32,
}

impl CompressStream {
    /// A stream with `threads` encoders (0 for one per core). `dual` adds a
    /// second dictionary buffer and a background compression thread.
    pub fn new(threads: usize, dual: bool) -> Result<Self> {
        let mut ctx = Context::new(threads)?;
        if dual {
            ctx.enable_async()?;
        }
        Ok(Self {
            ctx,
            dict: DictBuffer::new(dual),
            wrote_prop: false,
            end_marked: false,
            finished: false,
            needs_init: true,
            loop_count: 0,
        })
    }

    /// Start a new frame, at `level` unless it is 0. Any frame in progress
    /// is abandoned.
    pub fn init(&mut self, level: u32) -> Result<()> {
        if self.ctx.is_compressing() {
            self.ctx.cancel();
        }
        self.ctx.end_frame();
        if level != 0 {
            self.ctx.set_parameter(Parameter::CompressionLevel, level as usize)?;
        }
        self.ctx.pre_begin_frame(0);
        let params = *self.ctx.params();
        params.validate()?;
        self.dict.init(
            params.dictionary_size,
            params.radix_params().overlap_size(),
            params.reset_interval,
            self.ctx.checksum() && !self.ctx.omit_prop(),
        )?;
        self.ctx.begin_frame(0)?;
        self.wrote_prop = false;
        self.end_marked = false;
        self.finished = false;
        self.needs_init = false;
        self.loop_count = 0;
        debug!(
            level = self.ctx.level(),
            dictionary_size = params.dictionary_size,
            dual = self.dict.is_dual(),
            "stream initialized"
        );
        Ok(())
    }

    fn ensure_init(&mut self) -> Result<()> {
        if self.needs_init {
            self.init(0)?;
        }
        Ok(())
    }

    /// Set a parameter for the next frame. Only lc, lp and pb may change
    /// while a frame is open.
    pub fn set_parameter(&mut self, param: Parameter, value: usize) -> Result<()> {
        self.ctx.set_parameter(param, value)
    }

    /// Read a parameter.
    pub fn get_parameter(&self, param: Parameter) -> usize {
        self.ctx.get_parameter(param)
    }

    /// Replace all parameters for the next frame.
    pub fn set_params(&mut self, params: CompressionParams) -> Result<()> {
        self.ctx.set_params(params)
    }

    /// Current parameters.
    pub fn params(&self) -> &CompressionParams {
        self.ctx.params()
    }

    /// Limit how long a call waits for the background thread, in
    /// milliseconds. 0 waits indefinitely. A timed out call returns
    /// [`Flzma2Error::TimedOut`] and can simply be repeated.
    pub fn set_timeout(&mut self, millis: u32) {
        self.ctx
            .set_timeout((millis != 0).then(|| Duration::from_millis(u64::from(millis))));
    }

    /// Number of encoder jobs.
    pub fn thread_count(&self) -> usize {
        self.ctx.thread_count()
    }

    /// Estimated memory for the current parameters, buffers included.
    pub fn memory_usage(&self) -> usize {
        let dict = self.ctx.params().dictionary_size;
        self.ctx.memory_usage() + dict * (1 + self.dict.is_dual() as usize)
    }

    /// Dictionary size class of the frame so far.
    pub fn dict_prop(&self) -> u8 {
        self.ctx.dict_prop()
    }

    fn loop_check(&mut self, progressed: bool) -> Result<()> {
        if progressed {
            self.loop_count = 0;
            return Ok(());
        }
        self.loop_count += 1;
        if self.loop_count > MAX_IDLE_LOOPS {
            warn!(calls = self.loop_count, "stream made no progress");
            self.cancel();
            return Err(Flzma2Error::internal("buffer error: no progress possible"));
        }
        Ok(())
    }

    /// Compress the buffered block if the stream allows it now: no output
    /// may be pending, and unless flushing the buffer must be full.
    fn compress_pending(&mut self, flush: FlushMode) -> Result<()> {
        self.ctx.wait()?;
        if self.ctx.has_pending_output() || !self.dict.has_unprocessed() {
            return Ok(());
        }
        if flush == FlushMode::None && self.dict.avail_space() != 0 {
            return Ok(());
        }
        let block = self.dict.take_block();
        let prop = if self.wrote_prop || self.ctx.omit_prop() {
            None
        } else {
            let size = if flush == FlushMode::Finish {
                block.end
            } else {
                self.dict.size()
            };
            Some(self.ctx.prop_byte(size))
        };
        self.wrote_prop = true;
        self.ctx.compress_cur_block(block, prop, true)
    }

    fn copy_pending(&mut self, output: Option<&mut OutBuffer<'_>>) {
        if let Some(output) = output {
            if self.ctx.has_pending_output() {
                self.ctx.copy_output(output);
            }
        }
    }

    /// Feed input. Output is copied into `output` when given; otherwise
    /// collect it with [`next_compressed_buffer`](Self::next_compressed_buffer).
    /// Returns the compressed bytes still waiting to be delivered.
    pub fn compress(&mut self, input: &mut InBuffer<'_>, mut output: Option<&mut OutBuffer<'_>>) -> Result<usize> {
        self.ensure_init()?;
        let prev_in = input.pos;
        let prev_out = output.as_ref().map_or(0, |o| o.pos);
        self.copy_pending(output.as_deref_mut());

        while input.remaining() > 0 {
            if self.dict.needs_shift() {
                if !self.dict.is_dual() {
                    self.ctx.wait()?;
                }
                self.dict.shift();
            }
            self.dict.put(input);
            if self.dict.avail_space() == 0 {
                if self.ctx.has_pending_output() {
                    break;
                }
                self.compress_pending(FlushMode::None)?;
            }
            if self.ctx.has_pending_output() && output.is_none() {
                break;
            }
            self.copy_pending(output.as_deref_mut());
        }

        let out_now = output.as_ref().map_or(0, |o| o.pos);
        self.loop_check(prev_in != input.pos || prev_out != out_now)?;
        Ok(self.ctx.remaining_output_size())
    }

    /// Writable space in the dictionary buffer, for filling in place.
    /// Report what was written with [`update_dictionary`](Self::update_dictionary).
    pub fn dictionary_buffer(&mut self) -> Result<&mut [u8]> {
        self.ensure_init()?;
        if self.dict.needs_shift() && !self.dict.is_dual() {
            self.ctx.wait()?;
        }
        Ok(self.dict.writable())
    }

    /// Account for `added` bytes written into
    /// [`dictionary_buffer`](Self::dictionary_buffer). A full buffer starts
    /// compressing. Returns the compressed bytes waiting to be delivered.
    pub fn update_dictionary(&mut self, added: usize) -> Result<usize> {
        if self.dict.update(added)? {
            self.compress_pending(FlushMode::None)?;
        }
        Ok(self.ctx.remaining_output_size())
    }

    /// Whether compressed output is waiting.
    pub fn has_output(&self) -> bool {
        self.ctx.has_pending_output()
    }

    /// Bytes of compressed output waiting to be delivered.
    pub fn remaining_output_size(&self) -> usize {
        self.ctx.remaining_output_size()
    }

    /// Take the next job's compressed output whole, waiting for the
    /// background thread if needed.
    pub fn next_compressed_buffer(&mut self) -> Result<Option<Vec<u8>>> {
        if self.needs_init {
            return Ok(None);
        }
        self.ctx.wait()?;
        Ok(self.ctx.next_output())
    }

    /// Copy pending output into `output`. Returns whether more remains.
    pub fn copy_output(&mut self, output: &mut OutBuffer<'_>) -> Result<bool> {
        if self.needs_init {
            return Ok(false);
        }
        self.ctx.wait()?;
        Ok(self.ctx.copy_output(output))
    }

    /// Compress everything buffered so far, even a partial block, and wait
    /// for it. Returns the compressed bytes still waiting.
    pub fn flush(&mut self, mut output: Option<&mut OutBuffer<'_>>) -> Result<usize> {
        self.ensure_init()?;
        let prev_out = output.as_ref().map_or(0, |o| o.pos);
        self.copy_pending(output.as_deref_mut());
        self.compress_pending(FlushMode::Sync)?;
        self.ctx.wait()?;
        self.copy_pending(output.as_deref_mut());

        let remaining = self.ctx.remaining_output_size() + self.dict.has_unprocessed() as usize;
        let out_now = output.as_ref().map_or(0, |o| o.pos);
        self.loop_check(remaining == 0 || prev_out != out_now)?;
        Ok(remaining)
    }

    /// Compress the rest of the input and write the terminator and checksum.
    /// Call until it returns 0; the frame is then complete.
    pub fn end(&mut self, mut output: Option<&mut OutBuffer<'_>>) -> Result<usize> {
        if self.needs_init && !self.end_marked {
            self.init(0)?;
        }
        let prev_out = output.as_ref().map_or(0, |o| o.pos);
        self.copy_pending(output.as_deref_mut());
        self.compress_pending(FlushMode::Finish)?;
        self.ctx.wait()?;
        if !self.end_marked && !self.dict.has_unprocessed() {
            self.write_end();
        }
        self.copy_pending(output.as_deref_mut());

        let remaining = self.ctx.remaining_output_size() + self.dict.has_unprocessed() as usize;
        if remaining == 0 && self.end_marked {
            if !self.finished {
                debug!(total = self.dict.total(), "frame complete");
            }
            self.finished = true;
            self.needs_init = true;
            self.ctx.end_frame();
            self.loop_count = 0;
            return Ok(0);
        }
        let out_now = output.as_ref().map_or(0, |o| o.pos);
        self.loop_check(prev_out != out_now)?;
        Ok(remaining.max(1))
    }

    fn write_end(&mut self) {
        let mut tail = Vec::with_capacity(6);
        if !self.wrote_prop && !self.ctx.omit_prop() {
            tail.push(self.ctx.prop_byte(self.ctx.dict_max()));
            self.wrote_prop = true;
        }
        tail.push(END_MARKER);
        if let Some(digest) = self.dict.digest() {
            tail.extend_from_slice(&digest.to_le_bytes());
        }
        self.ctx.append_trailer(&tail);
        self.end_marked = true;
    }

    /// Wait for the background thread. Returns the compressed bytes waiting.
    pub fn wait(&mut self) -> Result<usize> {
        self.ctx.wait()?;
        Ok(self.ctx.remaining_output_size())
    }

    /// Abandon the current frame. The stream must be initialized again;
    /// the next call does so with the current parameters.
    pub fn cancel(&mut self) {
        self.ctx.cancel();
        self.needs_init = true;
        self.end_marked = false;
        self.loop_count = 0;
    }

    /// Progress of the current frame.
    pub fn progress(&self) -> Progress {
        self.ctx.progress()
    }

    /// A handle for progress and cancellation from other threads.
    pub fn handle(&self) -> ContextHandle {
        self.ctx.handle()
    }

    /// Release the dictionary buffers until the next frame.
    pub fn free_buffers(&mut self) {
        if !self.ctx.is_locked() {
            self.dict.free();
        }
    }
}

impl Compressor for CompressStream {
    fn compress(&mut self, input: &[u8], output: &mut [u8], flush: FlushMode) -> Result<(usize, usize, CompressStatus)> {
        if self.finished {
            return Ok((0, 0, CompressStatus::Done));
        }
        let mut input = InBuffer::new(input);
        let mut output = OutBuffer::new(output);
        let pending = CompressStream::compress(self, &mut input, Some(&mut output))?;

        let status = match flush {
            FlushMode::None if pending == 0 && input.remaining() == 0 => CompressStatus::NeedsInput,
            FlushMode::None => CompressStatus::NeedsOutput,
            _ if input.remaining() > 0 => CompressStatus::NeedsOutput,
            FlushMode::Sync => {
                if self.flush(Some(&mut output))? == 0 {
                    CompressStatus::NeedsInput
                } else {
                    CompressStatus::NeedsOutput
                }
            }
            FlushMode::Finish => {
                if self.end(Some(&mut output))? == 0 {
                    CompressStatus::Done
                } else {
                    CompressStatus::NeedsOutput
                }
            }
        };
        Ok((input.pos, output.pos, status))
    }

    fn reset(&mut self) {
        if self.ctx.is_compressing() {
            self.ctx.cancel();
        }
        self.needs_init = true;
        self.end_marked = false;
        self.finished = false;
        self.loop_count = 0;
    }

    fn is_finished(&self) -> bool {
        self.finished
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flzma2_lzma2::decoder;

    fn text(len: usize) -> Vec<u8> {
        let words: [&[u8]; 6] = [b"radix ", b"match ", b"finder ", b"chunk ", b"range ", b"coder\n"];
        let mut seed = 3u32;
        let mut data = Vec::with_capacity(len);
        while data.len() < len {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            data.extend_from_slice(words[(seed >> 16) as usize % words.len()]);
        }
        data.truncate(len);
        data
    }

    fn drain(stream: &mut CompressStream, out: &mut Vec<u8>) {
        while let Some(buf) = stream.next_compressed_buffer().unwrap() {
            out.extend_from_slice(&buf);
        }
    }

    fn stream_all(stream: &mut CompressStream, data: &[u8], piece: usize) -> Vec<u8> {
        let mut out = Vec::new();
        for part in data.chunks(piece) {
            let mut input = InBuffer::new(part);
            while input.remaining() > 0 {
                stream.compress(&mut input, None).unwrap();
                drain(stream, &mut out);
            }
        }
        while stream.end(None).unwrap() != 0 {
            drain(stream, &mut out);
        }
        drain(stream, &mut out);
        out
    }

    #[test]
    fn test_stream_matches_data() {
        let data = text(200_000);
        let mut stream = CompressStream::new(2, false).unwrap();
        stream.init(4).unwrap();
        let out = stream_all(&mut stream, &data, 4096);
        assert_eq!(decoder::decompress(&out).unwrap(), data);
        assert!(Compressor::is_finished(&stream));
    }

    #[test]
    fn test_stream_across_dictionaries() {
        let data = text(3 << 20);
        for dual in [false, true] {
            let mut stream = CompressStream::new(2, dual).unwrap();
            stream.init(1).unwrap();
            let out = stream_all(&mut stream, &data, 1 << 16);
            assert_eq!(decoder::decompress(&out).unwrap(), data, "dual {dual}");
        }
    }

    #[test]
    fn test_empty_stream() {
        let mut stream = CompressStream::new(1, false).unwrap();
        stream.set_parameter(Parameter::UseChecksum, 0).unwrap();
        let out = stream_all(&mut stream, &[], 1);
        assert_eq!(out, [0x00, 0x00]);
    }

    #[test]
    fn test_flush_emits_decodable_prefix() {
        let data = text(50_000);
        let mut stream = CompressStream::new(1, false).unwrap();
        stream.init(3).unwrap();
        stream.compress(&mut InBuffer::new(&data), None).unwrap();
        let mut out = Vec::new();
        while stream.flush(None).unwrap() != 0 {
            drain(&mut stream, &mut out);
        }
        drain(&mut stream, &mut out);
        assert!(!out.is_empty());
        assert_eq!(out[0] & decoder::CHECKSUM_FLAG, decoder::CHECKSUM_FLAG);

        let more = text(10_000);
        stream.compress(&mut InBuffer::new(&more), None).unwrap();
        while stream.end(None).unwrap() != 0 {
            drain(&mut stream, &mut out);
        }
        let mut expected = data.clone();
        expected.extend_from_slice(&more);
        assert_eq!(decoder::decompress(&out).unwrap(), expected);
    }

    #[test]
    fn test_copy_into_small_output() {
        let data = text(100_000);
        let mut stream = CompressStream::new(1, false).unwrap();
        stream.init(2).unwrap();
        let mut out = Vec::new();
        let mut scratch = [0u8; 777];
        let mut input = InBuffer::new(&data);
        while input.remaining() > 0 {
            let mut output = OutBuffer::new(&mut scratch);
            stream.compress(&mut input, Some(&mut output)).unwrap();
            let n = output.pos;
            out.extend_from_slice(&scratch[..n]);
        }
        loop {
            let mut output = OutBuffer::new(&mut scratch);
            let left = stream.end(Some(&mut output)).unwrap();
            let n = output.pos;
            out.extend_from_slice(&scratch[..n]);
            if left == 0 {
                break;
            }
        }
        assert_eq!(decoder::decompress(&out).unwrap(), data);
    }

    #[test]
    fn test_dictionary_buffer_in_place() {
        let data = text(300_000);
        let mut stream = CompressStream::new(1, false).unwrap();
        stream.init(2).unwrap();
        let mut out = Vec::new();
        let mut fed = 0;
        while fed < data.len() {
            let space = stream.dictionary_buffer().unwrap();
            let n = space.len().min(data.len() - fed).min(50_000);
            space[..n].copy_from_slice(&data[fed..fed + n]);
            fed += n;
            stream.update_dictionary(n).unwrap();
            drain(&mut stream, &mut out);
        }
        while stream.end(None).unwrap() != 0 {
            drain(&mut stream, &mut out);
        }
        assert_eq!(decoder::decompress(&out).unwrap(), data);
    }

    #[test]
    fn test_stall_is_reported() {
        let data = vec![9u8; 3 << 20];
        let mut stream = CompressStream::new(1, false).unwrap();
        stream.init(1).unwrap();
        let mut input = InBuffer::new(&data);
        // Output is never collected, so the buffer fills up and stays full.
        let mut failure = None;
        for _ in 0..3 * MAX_IDLE_LOOPS {
            if let Err(err) = stream.compress(&mut input, None) {
                failure = Some(err);
                break;
            }
        }
        assert!(matches!(failure, Some(Flzma2Error::Internal { .. })));
        assert!(input.remaining() > 0);
    }

    #[test]
    fn test_parameters_locked_during_frame() {
        let mut stream = CompressStream::new(1, false).unwrap();
        stream.init(3).unwrap();
        assert!(matches!(
            stream.set_parameter(Parameter::DictionaryLog, 22),
            Err(Flzma2Error::ParameterLocked { .. })
        ));
        stream.set_parameter(Parameter::LiteralCtxBits, 2).unwrap();
        assert_eq!(stream.get_parameter(Parameter::LiteralCtxBits), 2);
    }

    #[test]
    fn test_compressor_trait() {
        let data = text(120_000);
        let mut stream = CompressStream::new(2, false).unwrap();
        let out = stream.compress_all(&data).unwrap();
        assert_eq!(decoder::decompress(&out).unwrap(), data);
        Compressor::reset(&mut stream);
        assert!(!Compressor::is_finished(&stream));
        let again = stream.compress_all(&data).unwrap();
        assert_eq!(again, out);
    }
}
