//! Test command implementation.

use crate::utils::{CliResult, read_input};
use flzma2::stream_info;
use indicatif::HumanBytes;
use std::path::PathBuf;

pub fn cmd_test(files: &[PathBuf], verbose: bool) -> CliResult {
    let mut ok_count = 0usize;
    let mut errors: Vec<(String, String)> = Vec::new();

    for file in files {
        let result = read_input(Some(file.as_path())).and_then(|data| {
            let decoded = flzma2::decompress(&data)?;
            let info = stream_info(&data)?;
            Ok((info, decoded.len()))
        });
        match result {
            Ok((info, unpacked)) => {
                ok_count += 1;
                if verbose {
                    println!(
                        "  OK: {} ({} -> {}, dictionary {}, checksum {})",
                        file.display(),
                        HumanBytes(info.packed_size),
                        HumanBytes(unpacked as u64),
                        HumanBytes(info.dictionary_size as u64),
                        if info.has_checksum { "verified" } else { "absent" }
                    );
                }
            }
            Err(e) => {
                if verbose {
                    println!("  FAILED: {} - {}", file.display(), e);
                }
                errors.push((file.display().to_string(), e.to_string()));
            }
        }
    }

    println!();
    println!(
        "Tested {} files: {} OK, {} failed",
        files.len(),
        ok_count,
        errors.len()
    );

    if !errors.is_empty() {
        if !verbose {
            println!();
            println!("Errors:");
            for (name, error) in &errors {
                println!("  {}: {}", name, error);
            }
        }
        return Err(format!("{} files failed verification", errors.len()).into());
    }

    Ok(())
}
