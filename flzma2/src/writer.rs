//! [`std::io::Write`] adapter over [`CompressStream`].

use crate::context::Progress;
use crate::stream::{CompressStream, InBuffer};
use flzma2_core::Result;
use std::io::{self, Write};

/// Compresses everything written to it into an inner writer.
///
/// The frame is completed by [`finish`](Self::finish). Dropping the writer
/// finishes it too, ignoring errors.
///
/// # Example
///
/// ```rust
/// use flzma2::Flzma2Writer;
/// use std::io::Write;
///
/// let mut writer = Flzma2Writer::with_level(Vec::new(), 2, 1).unwrap();
/// writer.write_all(b"some text, some text, some text").unwrap();
/// let packed = writer.finish().unwrap();
/// assert_eq!(flzma2::decompress(&packed).unwrap(), b"some text, some text, some text");
/// ```
#[derive(Debug)]
pub struct Flzma2Writer<W: Write> {
    stream: CompressStream,
    inner: Option<W>,
}

impl<W: Write> Flzma2Writer<W> {
    /// Wrap `inner` with an initialized `stream`.
    pub fn new(inner: W, stream: CompressStream) -> Self {
        Self {
            stream,
            inner: Some(inner),
        }
    }

    /// Wrap `inner` with a new single-buffer stream at `level`.
    pub fn with_level(inner: W, level: u32, threads: usize) -> Result<Self> {
        let mut stream = CompressStream::new(threads, false)?;
        stream.init(level)?;
        Ok(Self::new(inner, stream))
    }

    /// The inner writer.
    pub fn get_ref(&self) -> Option<&W> {
        self.inner.as_ref()
    }

    /// The compression stream.
    pub fn stream(&self) -> &CompressStream {
        &self.stream
    }

    /// Progress of the frame.
    pub fn progress(&self) -> Progress {
        self.stream.progress()
    }

    fn drain(&mut self) -> io::Result<()> {
        let Some(inner) = self.inner.as_mut() else {
            return Err(io::Error::other("writer already finished"));
        };
        while let Some(buf) = self.stream.next_compressed_buffer()? {
            inner.write_all(&buf)?;
        }
        Ok(())
    }

    fn finish_frame(&mut self) -> io::Result<()> {
        loop {
            let remaining = self.stream.end(None)?;
            self.drain()?;
            if remaining == 0 {
                break;
            }
        }
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }

    /// Write the rest of the frame and return the inner writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.finish_frame()?;
        self.inner
            .take()
            .ok_or_else(|| io::Error::other("writer already finished"))
    }
}

impl<W: Write> Write for Flzma2Writer<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut input = InBuffer::new(buf);
        while input.remaining() > 0 {
            self.stream.compress(&mut input, None)?;
            self.drain()?;
        }
        Ok(buf.len())
    }

    /// Compresses the partial block buffered so far. Frequent flushes cost
    /// compression ratio.
    fn flush(&mut self) -> io::Result<()> {
        loop {
            let remaining = self.stream.flush(None)?;
            self.drain()?;
            if remaining == 0 {
                break;
            }
        }
        match self.inner.as_mut() {
            Some(inner) => inner.flush(),
            None => Ok(()),
        }
    }
}

impl<W: Write> Drop for Flzma2Writer<W> {
    fn drop(&mut self) {
        if self.inner.is_some() {
            let _ = self.finish_frame();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flzma2_lzma2::decoder;

    #[test]
    fn test_writer_round_trip() {
        let data: Vec<u8> = (0..400_000u32).map(|i| (i % 97) as u8 ^ (i / 4096) as u8).collect();
        let mut writer = Flzma2Writer::with_level(Vec::new(), 3, 2).unwrap();
        for piece in data.chunks(10_000) {
            writer.write_all(piece).unwrap();
        }
        let packed = writer.finish().unwrap();
        assert_eq!(decoder::decompress(&packed).unwrap(), data);
    }

    #[test]
    fn test_writer_flush_then_more() {
        let mut writer = Flzma2Writer::with_level(Vec::new(), 1, 1).unwrap();
        writer.write_all(b"first part ").unwrap();
        writer.flush().unwrap();
        assert!(!writer.get_ref().unwrap().is_empty());
        writer.write_all(b"second part").unwrap();
        let packed = writer.finish().unwrap();
        assert_eq!(decoder::decompress(&packed).unwrap(), b"first part second part");
    }

    #[test]
    fn test_empty_writer() {
        let writer = Flzma2Writer::with_level(Vec::new(), 1, 1).unwrap();
        let packed = writer.finish().unwrap();
        assert!(decoder::decompress(&packed).unwrap().is_empty());
    }
}
