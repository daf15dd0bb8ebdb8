//! Decompress command implementation.

use crate::utils::{
    CliResult, confirm_overwrite, copy_mtime, decompressed_name, is_stdin, read_input,
};
use rayon::prelude::*;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub fn cmd_decompress(
    files: &[PathBuf],
    output: Option<&Path>,
    stdout: bool,
    keep: bool,
    force: bool,
) -> CliResult {
    if is_stdin(files) {
        let data = read_input(None)?;
        let decoded = flzma2::decompress(&data)?;
        match output {
            Some(path) => {
                confirm_overwrite(path, force)?;
                fs::write(path, &decoded)?;
            }
            None => io::stdout().lock().write_all(&decoded)?,
        }
        return Ok(());
    }

    if files.len() > 1 && (output.is_some() || stdout) {
        return Err("--output and --stdout take a single input file".into());
    }

    let mut jobs = Vec::with_capacity(files.len());
    for file in files {
        let target = if stdout {
            None
        } else {
            let path = match output {
                Some(path) => path.to_path_buf(),
                None => decompressed_name(file)?,
            };
            confirm_overwrite(&path, force)?;
            Some(path)
        };
        jobs.push((file.clone(), target));
    }

    let failures: Vec<_> = jobs
        .par_iter()
        .filter_map(|(file, target)| {
            decompress_file(file, target.as_deref(), keep)
                .err()
                .map(|e| (file, e))
        })
        .collect();

    for (file, e) in &failures {
        eprintln!("  FAILED: {} - {}", file.display(), e);
    }
    if !failures.is_empty() {
        return Err(format!("{} of {} files failed", failures.len(), files.len()).into());
    }
    Ok(())
}

fn decompress_file(file: &Path, target: Option<&Path>, keep: bool) -> CliResult {
    let data = read_input(Some(file))?;
    let decoded = flzma2::decompress(&data)?;
    drop(data);
    debug!(file = %file.display(), size = decoded.len(), "decompressed");

    let Some(path) = target else {
        io::stdout().lock().write_all(&decoded)?;
        return Ok(());
    };
    fs::write(path, &decoded)?;
    if let Err(e) = copy_mtime(file, path) {
        warn!(file = %path.display(), error = %e, "could not copy modification time");
    }
    if !keep {
        fs::remove_file(file)?;
    }
    Ok(())
}
