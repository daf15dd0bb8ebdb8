//! Utility functions for the CLI.

use dialoguer::Confirm;
use filetime::FileTime;
use indicatif::{ProgressBar, ProgressStyle};
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::{self, IsTerminal, Read};
use std::ops::Deref;
use std::path::{Path, PathBuf};

/// Error type shared by every command. `Send` so results can cross rayon workers.
pub type CliError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a command.
pub type CliResult<T = ()> = Result<T, CliError>;

/// Extension of compressed files.
pub const EXTENSION: &str = "fl2";

/// Bytes of one input, mapped when they come from a regular file.
pub enum Input {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Deref for Input {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Input::Mapped(map) => map,
            Input::Owned(data) => data,
        }
    }
}

/// Read `path`, or standard input when it is `None`.
pub fn read_input(path: Option<&Path>) -> CliResult<Input> {
    let Some(path) = path else {
        let mut data = Vec::new();
        io::stdin().lock().read_to_end(&mut data)?;
        return Ok(Input::Owned(data));
    };

    let file = File::open(path)?;
    if file.metadata()?.len() == 0 {
        // Zero-length mappings fail on some platforms.
        return Ok(Input::Owned(Vec::new()));
    }
    // SAFETY: the mapping is read-only and lives no longer than this command.
    // Truncating the file while it is processed is undefined, as with any mmap.
    let map = unsafe { Mmap::map(&file)? };
    Ok(Input::Mapped(map))
}

/// True when `files` names standard input.
pub fn is_stdin(files: &[PathBuf]) -> bool {
    files.is_empty() || (files.len() == 1 && files[0].as_os_str() == "-")
}

/// Create a byte-counting progress bar with standard styling.
pub fn create_progress_bar(len: u64, enable: bool) -> ProgressBar {
    if !enable {
        return ProgressBar::hidden();
    }

    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(
                "[{elapsed_precise}] [{bar:40.cyan/blue}] {binary_bytes}/{binary_total_bytes} \
                 ({binary_bytes_per_sec}) {msg}",
            )
            .expect("progress bar template is valid")
            .progress_chars("█▓▒░ "),
    );
    pb
}

/// `file` with the compressed extension appended.
pub fn compressed_name(file: &Path) -> PathBuf {
    let mut name = file.as_os_str().to_owned();
    name.push(".");
    name.push(EXTENSION);
    PathBuf::from(name)
}

/// `file` without its compressed extension.
pub fn decompressed_name(file: &Path) -> CliResult<PathBuf> {
    match file.extension() {
        Some(ext) if ext == EXTENSION => Ok(file.with_extension("")),
        _ => Err(format!("{}: unknown suffix, expected .{EXTENSION}", file.display()).into()),
    }
}

/// Make sure `path` may be written. Asks on a terminal unless `force` is set.
pub fn confirm_overwrite(path: &Path, force: bool) -> CliResult {
    if force || !path.exists() {
        return Ok(());
    }
    if !io::stdin().is_terminal() {
        return Err(format!("{} already exists; use --force to overwrite", path.display()).into());
    }
    let overwrite = Confirm::new()
        .with_prompt(format!("{} already exists. Overwrite?", path.display()))
        .default(false)
        .interact()?;
    if overwrite {
        Ok(())
    } else {
        Err(format!("{}: not overwritten", path.display()).into())
    }
}

/// Give `to` the modification time of `from`.
pub fn copy_mtime(from: &Path, to: &Path) -> CliResult {
    let metadata = fs::metadata(from)?;
    filetime::set_file_mtime(to, FileTime::from_last_modification_time(&metadata))?;
    Ok(())
}

/// Output size as a percentage of input size.
pub fn ratio(packed: u64, unpacked: u64) -> f64 {
    if unpacked == 0 {
        0.0
    } else {
        packed as f64 * 100.0 / unpacked as f64
    }
}

/// Parse a size with an optional K, M or G suffix (binary units).
pub fn parse_size(text: &str) -> Result<usize, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(text.len());
    let (digits, suffix) = text.split_at(split);
    let value: usize = digits
        .parse()
        .map_err(|_| format!("invalid size '{text}'"))?;
    let shift = match suffix.to_ascii_lowercase().as_str() {
        "" | "b" => 0,
        "k" | "kb" | "kib" => 10,
        "m" | "mb" | "mib" => 20,
        "g" | "gb" | "gib" => 30,
        _ => return Err(format!("invalid size suffix '{suffix}'")),
    };
    value
        .checked_mul(1usize << shift)
        .ok_or_else(|| format!("size '{text}' is too large"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("4096"), Ok(4096));
        assert_eq!(parse_size("64K"), Ok(64 << 10));
        assert_eq!(parse_size("16m"), Ok(16 << 20));
        assert_eq!(parse_size("1GiB"), Ok(1 << 30));
        assert!(parse_size("12q").is_err());
        assert!(parse_size("M").is_err());
    }

    #[test]
    fn test_names() {
        let packed = compressed_name(Path::new("dir/data.tar"));
        assert_eq!(packed, PathBuf::from("dir/data.tar.fl2"));
        assert_eq!(decompressed_name(&packed).unwrap(), PathBuf::from("dir/data.tar"));
        assert!(decompressed_name(Path::new("data.xz")).is_err());
    }

    #[test]
    fn test_ratio() {
        assert_eq!(ratio(50, 200), 25.0);
        assert_eq!(ratio(1, 0), 0.0);
    }

    #[test]
    fn test_is_stdin() {
        assert!(is_stdin(&[]));
        assert!(is_stdin(&[PathBuf::from("-")]));
        assert!(!is_stdin(&[PathBuf::from("a")]));
    }
}
