//! Compress command implementation.

use crate::utils::{
    CliResult, compressed_name, confirm_overwrite, copy_mtime, create_progress_bar, is_stdin,
    ratio, read_input,
};
use clap::ValueEnum;
use flzma2::{CompressStream, CompressionParams, Context, Flzma2Writer, Parameter, Strategy};
use indicatif::{HumanBytes, ProgressBar};
use rayon::prelude::*;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pieces handed to the stream writer at a time.
const STREAM_PIECE: usize = 1 << 20;

/// Interval between progress polls.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Encoder strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StrategyArg {
    /// Greedy/lazy parse, fastest
    Fast,
    /// Optimal parse
    Optimal,
    /// Optimal parse with a hybrid hash chain, strongest
    Ultra,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Fast => Strategy::Fast,
            StrategyArg::Optimal => Strategy::Optimal,
            StrategyArg::Ultra => Strategy::Ultra,
        }
    }
}

/// Everything that shapes the compressed output.
#[derive(Debug, Clone)]
pub struct CompressOptions {
    pub level: u32,
    pub high: bool,
    pub threads: usize,
    pub dictionary_size: Option<usize>,
    pub strategy: Option<StrategyArg>,
    pub checksum: bool,
    pub omit_prop: bool,
    pub params_file: Option<PathBuf>,
    pub stream: bool,
    pub progress: bool,
}

impl CompressOptions {
    /// Resolve the level, the parameter file and the overrides into one set.
    pub fn params(&self) -> CliResult<CompressionParams> {
        let mut params = match &self.params_file {
            Some(path) => serde_json::from_str(&fs::read_to_string(path)?)?,
            None => CompressionParams::from_level(self.level, self.high)?,
        };
        if let Some(size) = self.dictionary_size {
            params.set(Parameter::DictionarySize, size)?;
        }
        if let Some(strategy) = self.strategy {
            params.set(Parameter::Strategy, Strategy::from(strategy).index())?;
        }
        params.validate()?;
        Ok(params)
    }
}

/// Where the compressed bytes go.
enum Target<'a> {
    File(&'a Path),
    Stdout,
}

/// The two configurable front ends.
trait Configure {
    fn apply(&mut self, params: CompressionParams, options: &CompressOptions) -> CliResult;
}

impl Configure for Context {
    fn apply(&mut self, params: CompressionParams, options: &CompressOptions) -> CliResult {
        self.set_params(params)?;
        self.set_parameter(Parameter::UseChecksum, options.checksum as usize)?;
        self.set_parameter(Parameter::OmitProperties, options.omit_prop as usize)?;
        Ok(())
    }
}

impl Configure for CompressStream {
    fn apply(&mut self, params: CompressionParams, options: &CompressOptions) -> CliResult {
        self.set_params(params)?;
        self.set_parameter(Parameter::UseChecksum, options.checksum as usize)?;
        self.set_parameter(Parameter::OmitProperties, options.omit_prop as usize)?;
        Ok(())
    }
}

pub fn cmd_compress(
    files: &[PathBuf],
    output: Option<&Path>,
    stdout: bool,
    keep: bool,
    force: bool,
    options: &CompressOptions,
) -> CliResult {
    let params = options.params()?;
    debug!(
        ?params,
        memory = Context::estimate_memory_usage(&params, options.threads),
        "resolved parameters"
    );

    if is_stdin(files) {
        let data = read_input(None)?;
        let target = match output {
            Some(path) => {
                confirm_overwrite(path, force)?;
                Target::File(path)
            }
            None => Target::Stdout,
        };
        let bar = create_progress_bar(data.len() as u64, options.progress && output.is_some());
        let written = compress_to(&data, target, params, options, options.threads, Some(&bar))?;
        bar.finish_and_clear();
        info!(input = data.len(), output = written, "compressed standard input");
        return Ok(());
    }

    if files.len() > 1 && (output.is_some() || stdout) {
        return Err("--output and --stdout take a single input file".into());
    }

    // Settle every overwrite question before any work starts.
    let mut jobs = Vec::with_capacity(files.len());
    for file in files {
        let target = if stdout {
            None
        } else {
            let path = output.map_or_else(|| compressed_name(file), Path::to_path_buf);
            confirm_overwrite(&path, force)?;
            Some(path)
        };
        jobs.push((file.clone(), target));
    }

    if let [(file, target)] = jobs.as_slice() {
        let size = fs::metadata(file)?.len();
        let bar = create_progress_bar(size, options.progress && !stdout);
        bar.set_message(file.display().to_string());
        let (read, written) = compress_file(
            file,
            target.as_deref(),
            keep,
            params,
            options,
            options.threads,
            Some(&bar),
        )?;
        bar.finish_and_clear();
        if target.is_some() {
            eprintln!(
                "{}: {} -> {} ({:.1}%)",
                file.display(),
                HumanBytes(read),
                HumanBytes(written),
                ratio(written, read)
            );
        }
        return Ok(());
    }

    // Files run side by side, so each context gets a share of the threads.
    let total_threads = if options.threads == 0 {
        thread::available_parallelism().map_or(1, usize::from)
    } else {
        options.threads
    };
    let per_file = (total_threads / jobs.len().min(rayon::current_num_threads())).max(1);
    let total: u64 = files
        .iter()
        .filter_map(|f| fs::metadata(f).ok())
        .map(|m| m.len())
        .sum();
    let bar = create_progress_bar(total, options.progress);

    let results: Vec<_> = jobs
        .par_iter()
        .map(|(file, target)| {
            let result =
                compress_file(file, target.as_deref(), keep, params, options, per_file, None);
            if let Ok((read, _)) = &result {
                bar.inc(*read);
            }
            (file, result)
        })
        .collect();
    bar.finish_and_clear();

    let mut failed = 0usize;
    for (file, result) in results {
        match result {
            Ok((read, written)) => println!(
                "  OK: {} {} -> {} ({:.1}%)",
                file.display(),
                HumanBytes(read),
                HumanBytes(written),
                ratio(written, read)
            ),
            Err(e) => {
                failed += 1;
                println!("  FAILED: {} - {}", file.display(), e);
            }
        }
    }
    if failed > 0 {
        return Err(format!("{failed} of {} files failed", files.len()).into());
    }
    Ok(())
}

/// Compress one file. Returns the input and output sizes.
fn compress_file(
    file: &Path,
    target: Option<&Path>,
    keep: bool,
    params: CompressionParams,
    options: &CompressOptions,
    threads: usize,
    bar: Option<&ProgressBar>,
) -> CliResult<(u64, u64)> {
    let data = read_input(Some(file))?;
    let read = data.len() as u64;
    let written = match target {
        Some(path) => compress_to(&data, Target::File(path), params, options, threads, bar)?,
        None => compress_to(&data, Target::Stdout, params, options, threads, bar)?,
    };
    drop(data);
    if let Some(path) = target {
        if let Err(e) = copy_mtime(file, path) {
            warn!(file = %path.display(), error = %e, "could not copy modification time");
        }
        if !keep {
            fs::remove_file(file)?;
        }
    }
    debug!(file = %file.display(), read, written, "compressed");
    Ok((read, written))
}

/// Compress `data` into `target`. Returns the bytes written.
fn compress_to(
    data: &[u8],
    target: Target<'_>,
    params: CompressionParams,
    options: &CompressOptions,
    threads: usize,
    bar: Option<&ProgressBar>,
) -> CliResult<u64> {
    let sink: Box<dyn Write> = match target {
        Target::File(path) => Box::new(BufWriter::new(File::create(path)?)),
        Target::Stdout => Box::new(io::stdout().lock()),
    };

    if options.stream {
        let mut stream = CompressStream::new(threads, true)?;
        stream.apply(params, options)?;
        stream.init(0)?;
        let mut writer = Flzma2Writer::new(CountingWriter::new(sink), stream);
        for piece in data.chunks(STREAM_PIECE) {
            writer.write_all(piece)?;
            if let Some(bar) = bar {
                bar.inc(piece.len() as u64);
            }
        }
        let sink = writer.finish()?;
        return Ok(sink.count);
    }

    let mut ctx = Context::new(threads)?;
    ctx.apply(params, options)?;
    debug!(threads = ctx.thread_count(), memory = ctx.memory_usage(), "context ready");

    let packed = match bar {
        Some(bar) => {
            let handle = ctx.handle();
            let done = AtomicBool::new(false);
            let len = data.len() as u64;
            thread::scope(|scope| {
                scope.spawn(|| {
                    while !done.load(Ordering::Acquire) {
                        bar.set_position(handle.progress().input.min(len));
                        thread::sleep(POLL_INTERVAL);
                    }
                    bar.set_position(len);
                });
                let result = ctx.compress(data);
                done.store(true, Ordering::Release);
                result
            })?
        }
        None => ctx.compress(data)?,
    };

    let mut sink = sink;
    sink.write_all(&packed)?;
    sink.flush()?;
    Ok(packed.len() as u64)
}

/// Counts the bytes passed to the inner writer.
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W> CountingWriter<W> {
    fn new(inner: W) -> Self {
        Self { inner, count: 0 }
    }
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> CompressOptions {
        CompressOptions {
            level: 3,
            high: false,
            threads: 1,
            dictionary_size: None,
            strategy: None,
            checksum: true,
            omit_prop: false,
            params_file: None,
            stream: false,
            progress: false,
        }
    }

    #[test]
    fn test_overrides_apply() {
        let mut opts = options();
        opts.dictionary_size = Some(1 << 20);
        opts.strategy = Some(StrategyArg::Fast);
        let params = opts.params().unwrap();
        assert_eq!(params.dictionary_size, 1 << 20);
        assert_eq!(params.strategy, Strategy::Fast);
    }

    #[test]
    fn test_bad_level_rejected() {
        let mut opts = options();
        opts.level = 11;
        assert!(opts.params().is_err());
    }

    #[test]
    fn test_counting_writer() {
        let mut writer = CountingWriter::new(Vec::new());
        writer.write_all(b"twelve bytes").unwrap();
        assert_eq!(writer.count, 12);
        assert_eq!(writer.inner, b"twelve bytes");
    }
}
