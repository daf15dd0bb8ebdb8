//! Levels command implementation.

use crate::utils::CliResult;
use flzma2::{CompressionParams, Context};
use indicatif::HumanBytes;
use serde::Serialize;

/// Highest preset level in either table.
const MAX_LEVEL: u32 = 10;

#[derive(Serialize)]
struct LevelRow {
    level: u32,
    high: bool,
    params: CompressionParams,
    memory: usize,
}

pub fn cmd_levels(threads: usize, level: Option<u32>, high: bool, json: bool) -> CliResult {
    // A single level prints as a parameter file for `compress --params-file`.
    if let Some(level) = level {
        let params = CompressionParams::from_level(level, high)?;
        println!("{}", serde_json::to_string_pretty(&params)?);
        return Ok(());
    }

    let mut rows = Vec::new();
    for high in [false, true] {
        for level in 1..=MAX_LEVEL {
            // The high table is shorter than the normal one.
            let Ok(params) = CompressionParams::from_level(level, high) else {
                continue;
            };
            rows.push(LevelRow {
                level,
                high,
                params,
                memory: Context::estimate_memory_usage(&params, threads),
            });
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    for high in [false, true] {
        println!();
        println!("{}", if high { "High compression levels" } else { "Levels" });
        println!(
            "{:>5}  {:>10}  {:>8}  {:>5}  {:>6}  {:>5}  {:>4}  {:>3}  {:<8}  {:>10}",
            "Level", "Dictionary", "Overlap", "Chain", "Cycles", "Depth", "Fast", "D&C", "Strategy",
            "Memory"
        );
        for row in rows.iter().filter(|r| r.high == high) {
            let p = &row.params;
            println!(
                "{:>5}  {:>10}  {:>5}/16  {:>5}  {:>6}  {:>5}  {:>4}  {:>3}  {:<8}  {:>10}",
                row.level,
                HumanBytes(p.dictionary_size as u64).to_string(),
                p.overlap_fraction,
                p.chain_log,
                p.match_cycles,
                p.depth,
                p.fast_length,
                if p.divide_and_conquer { "yes" } else { "no" },
                p.strategy.name(),
                HumanBytes(row.memory as u64).to_string()
            );
        }
    }
    println!();
    if threads == 0 {
        println!("Memory is estimated for every available thread.");
    } else {
        println!("Memory is estimated for {threads} thread(s).");
    }
    Ok(())
}
