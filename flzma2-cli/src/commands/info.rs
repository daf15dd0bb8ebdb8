//! Info command implementation.

use crate::utils::{CliResult, ratio, read_input};
use flzma2::{ChunkInfo, ChunkKind, StreamInfo, chunk_infos, stream_info};
use indicatif::HumanBytes;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Serialize)]
struct FileInfo {
    file: String,
    #[serde(flatten)]
    stream: StreamInfo,
    ratio: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    chunks: Option<Vec<ChunkInfo>>,
}

pub fn cmd_info(files: &[PathBuf], chunks: bool, json: bool) -> CliResult {
    let mut infos = Vec::with_capacity(files.len());
    for file in files {
        let data = read_input(Some(file.as_path()))?;
        let stream = stream_info(&data)?;
        // The chunk sequence starts after the property byte.
        let chunks = if chunks {
            Some(chunk_infos(data.get(1..).unwrap_or_default())?)
        } else {
            None
        };
        infos.push(FileInfo {
            file: file.display().to_string(),
            ratio: ratio(stream.packed_size, stream.unpacked_size),
            stream,
            chunks,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&infos)?);
        return Ok(());
    }

    for (i, info) in infos.iter().enumerate() {
        if i > 0 {
            println!();
        }
        print_info(info);
    }
    Ok(())
}

fn print_info(info: &FileInfo) {
    let stream = &info.stream;
    println!("Stream Information");
    println!("==================");
    println!("File: {}", info.file);
    println!(
        "Dictionary: {} (class {})",
        HumanBytes(stream.dictionary_size as u64),
        stream.dict_prop
    );
    println!(
        "Checksum: {}",
        if stream.has_checksum { "XXH32" } else { "none" }
    );
    println!("Compressed size: {} bytes", stream.packed_size);
    println!("Uncompressed size: {} bytes", stream.unpacked_size);
    println!("Ratio: {:.1}%", info.ratio);
    println!(
        "Chunks: {} compressed, {} stored, {} dictionary resets",
        stream.compressed_chunks, stream.stored_chunks, stream.dictionary_resets
    );

    let Some(chunks) = &info.chunks else {
        return;
    };
    println!();
    println!("{:>10}  {:<10}  {:<16}  {:>8}  {:>8}", "Offset", "Kind", "Reset", "Unpacked", "Packed");
    for chunk in chunks {
        let kind = match chunk.kind {
            ChunkKind::Stored => "stored",
            ChunkKind::Compressed => "compressed",
        };
        println!(
            "{:>10}  {:<10}  {:<16}  {:>8}  {:>8}",
            chunk.offset + 1,
            kind,
            format!("{:?}", chunk.reset),
            chunk.unpacked_size,
            chunk.packed_size
        );
    }
}
