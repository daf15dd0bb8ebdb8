//! flzma2 CLI - multithreaded LZMA2 compression
//!
//! Compresses files into raw LZMA2 streams with a property byte and an
//! optional XXH32 checksum, and decompresses, verifies and inspects them.

mod commands;
mod utils;

use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use commands::{
    CompressOptions, StrategyArg, cmd_compress, cmd_decompress, cmd_info, cmd_levels, cmd_test,
};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "flzma2")]
#[command(
    author,
    version,
    about = "Multithreaded LZMA2 compressor built on a radix match finder"
)]
#[command(long_about = "
flzma2 compresses data into LZMA2 streams using every core: the match table
of each dictionary block is built in parallel and the block is encoded in
parallel slices.

Examples:
  flzma2 compress big.tar
  flzma2 compress -l 9 --high -T 8 big.tar
  flzma2 compress -k -D 64M a.bin b.bin c.bin
  cat data | flzma2 compress -c > data.fl2
  flzma2 decompress big.tar.fl2
  flzma2 test big.tar.fl2
  flzma2 info --chunks big.tar.fl2
  flzma2 levels --level 6 > params.json
  flzma2 compress --params-file params.json big.tar
")]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Log level (error, warn, info, debug, trace); overrides -v
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress files (standard input when none are given)
    #[command(alias = "c")]
    Compress {
        /// Files to compress; "-" reads standard input
        files: Vec<PathBuf>,

        /// Compression level (1-10, 1-4 with --high)
        #[arg(short, long, default_value_t = 6, value_parser = clap::value_parser!(u32).range(1..=10))]
        level: u32,

        /// Use the high-compression level table
        #[arg(long)]
        high: bool,

        /// Compression threads (0 = all cores)
        #[arg(short = 'T', long, default_value_t = 0)]
        threads: usize,

        /// Dictionary size, with an optional K, M or G suffix
        #[arg(short = 'D', long, value_parser = utils::parse_size)]
        dictionary: Option<usize>,

        /// Encoder strategy
        #[arg(short, long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Do not append an XXH32 checksum
        #[arg(long)]
        no_checksum: bool,

        /// Leave out the property byte (the output can only be decoded raw)
        #[arg(long)]
        omit_prop: bool,

        /// Read every parameter from a JSON file (see `levels --level`)
        #[arg(long, conflicts_with_all = ["level", "high"])]
        params_file: Option<PathBuf>,

        /// Output file (single input only)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep input files
        #[arg(short, long)]
        keep: bool,

        /// Overwrite existing output files
        #[arg(short, long)]
        force: bool,

        /// Write to standard output
        #[arg(short = 'c', long)]
        stdout: bool,

        /// Compress through the streaming interface with two buffers
        #[arg(long)]
        stream: bool,

        /// Hide the progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// Decompress files (standard input when none are given)
    #[command(alias = "d")]
    Decompress {
        /// Files to decompress; "-" reads standard input
        files: Vec<PathBuf>,

        /// Output file (single input only)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Keep input files
        #[arg(short, long)]
        keep: bool,

        /// Overwrite existing output files
        #[arg(short, long)]
        force: bool,

        /// Write to standard output
        #[arg(short = 'c', long)]
        stdout: bool,
    },

    /// Verify that files decompress and their checksums match
    #[command(alias = "t")]
    Test {
        /// Files to test
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show stream headers without decompressing
    #[command(alias = "i")]
    Info {
        /// Files to inspect
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// List every chunk
        #[arg(long)]
        chunks: bool,

        /// Output as JSON (machine-readable)
        #[arg(short, long)]
        json: bool,
    },

    /// Show the preset level tables with memory estimates
    Levels {
        /// Threads to estimate memory for (0 = all cores)
        #[arg(short = 'T', long, default_value_t = 1)]
        threads: usize,

        /// Print one level as a JSON parameter file
        #[arg(short, long)]
        level: Option<u32>,

        /// With --level, use the high-compression table
        #[arg(long, requires = "level")]
        high: bool,

        /// Output as JSON (machine-readable)
        #[arg(short, long)]
        json: bool,
    },

    /// Generate shell completions
    Completions {
        /// Target shell
        shell: clap_complete::Shell,
    },
}

/// Resolve the log level from `--log-level` or the `-v` count.
fn log_level(verbose: u8, name: Option<&str>) -> Result<Level, String> {
    if let Some(name) = name {
        return name
            .parse()
            .map_err(|_| format!("invalid log level '{name}'"));
    }
    Ok(match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    })
}

fn init_logging(level: Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Warning: logging unavailable: {}", e);
    }
}

fn main() {
    let cli = Cli::parse();

    match log_level(cli.verbose, cli.log_level.as_deref()) {
        Ok(level) => init_logging(level),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    }

    let result = match cli.command {
        Commands::Compress {
            files,
            level,
            high,
            threads,
            dictionary,
            strategy,
            no_checksum,
            omit_prop,
            params_file,
            output,
            keep,
            force,
            stdout,
            stream,
            no_progress,
        } => {
            let options = CompressOptions {
                level,
                high,
                threads,
                dictionary_size: dictionary,
                strategy,
                checksum: !no_checksum,
                omit_prop,
                params_file,
                stream,
                progress: !no_progress,
            };
            cmd_compress(&files, output.as_deref(), stdout, keep, force, &options)
        }
        Commands::Decompress {
            files,
            output,
            keep,
            force,
            stdout,
        } => cmd_decompress(&files, output.as_deref(), stdout, keep, force),
        Commands::Test { files } => cmd_test(&files, cli.verbose > 0),
        Commands::Info {
            files,
            chunks,
            json,
        } => cmd_info(&files, chunks, json),
        Commands::Levels {
            threads,
            level,
            high,
            json,
        } => cmd_levels(threads, level, high, json),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "flzma2", &mut std::io::stdout());
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_log_level() {
        assert_eq!(log_level(0, None), Ok(Level::WARN));
        assert_eq!(log_level(2, None), Ok(Level::DEBUG));
        assert_eq!(log_level(0, Some("trace")), Ok(Level::TRACE));
        assert!(log_level(0, Some("loud")).is_err());
    }

    #[test]
    fn test_parse_compress() {
        let cli = Cli::try_parse_from([
            "flzma2", "compress", "-l", "9", "-T", "4", "-D", "64M", "-s", "fast", "a.bin",
        ])
        .unwrap();
        match cli.command {
            Commands::Compress {
                level,
                threads,
                dictionary,
                strategy,
                files,
                ..
            } => {
                assert_eq!(level, 9);
                assert_eq!(threads, 4);
                assert_eq!(dictionary, Some(64 << 20));
                assert_eq!(strategy, Some(StrategyArg::Fast));
                assert_eq!(files, vec![PathBuf::from("a.bin")]);
            }
            _ => panic!("expected compress"),
        }
        assert!(Cli::try_parse_from(["flzma2", "compress", "-l", "11"]).is_err());
    }
}
