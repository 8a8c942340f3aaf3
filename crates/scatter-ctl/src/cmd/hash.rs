//! Hash-list inspection.

use std::path::Path;

use anyhow::Result;

use scatter_core::crypto;
use scatter_services::chunker;

pub fn cmd_hash(file: &str, block_size: u32) -> Result<()> {
    let hashes = chunker::hash_file(Path::new(file), block_size)?;

    println!("═══════════════════════════════════════");
    println!("  {}", file);
    println!("═══════════════════════════════════════");
    println!("  Block size  : {} bytes", block_size);
    println!("  Chunks      : {}", hashes.len());
    println!("  Content key : {}", hex::encode(crypto::global_hash(&hashes)));

    if !hashes.is_empty() {
        println!();
        for (seq, hash) in hashes.iter().enumerate() {
            println!("  {:>6}  {}", seq, hex::encode(hash));
        }
    }

    Ok(())
}
