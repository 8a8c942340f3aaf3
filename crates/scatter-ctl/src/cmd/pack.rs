//! Packing files into framed session batches and unpacking them again.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use scatter_core::packet::DEFAULT_MIME;
use scatter_core::{BlockHeaderPacket, ScatterConfig};
use scatter_services::{
    chunker, write_session, Assembled, Assembler, BlockDataStream, FileStore, MemoryDatastore,
    MessageBody, SessionReader, StoragePolicy, StoredMessage,
};

pub fn cmd_pack(
    config: &ScatterConfig,
    file: &str,
    out: &str,
    app: Option<&str>,
    mime: Option<&str>,
    block_size: Option<u32>,
) -> Result<()> {
    let path = Path::new(file);
    let block_size = block_size.unwrap_or(config.transfer.block_size);
    let hashes = chunker::hash_file(path, block_size)?;

    let mut builder = BlockHeaderPacket::builder()
        .application(app.unwrap_or("scatter-ctl"))
        .block_size(block_size)
        .mime(mime.unwrap_or(DEFAULT_MIME))
        .hash_list(hashes);
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        builder = builder.extension(ext);
    }
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        builder = builder.user_filename(name);
    }
    let header = builder.build().context("invalid header")?;
    let message = StoredMessage::from_header(&header, MessageBody::File(path.to_path_buf()));

    let policy = StoragePolicy::from(&config.transfer);
    let stream = BlockDataStream::from_file(&message, path, &policy, true)?;
    let to_disk = stream.to_disk();

    let output = File::create(out).with_context(|| format!("failed to create {}", out))?;
    let mut writer = BufWriter::new(output);
    let chunks = write_session(stream, &mut writer)?;

    println!(
        "Packed {} ({} chunks, stored {}) → {}",
        file,
        chunks,
        if to_disk { "on disk" } else { "inline" },
        out
    );
    println!("  content key : {}", hex::encode(header.content_key()));
    Ok(())
}

pub fn cmd_unpack(config: &ScatterConfig, input: &str, dir: &str) -> Result<()> {
    let dir = Path::new(dir);
    let files = FileStore::new(dir.join("cache"), dir.join("files"))?;
    let assembler = Assembler::new(
        Arc::new(MemoryDatastore::new()),
        files.clone(),
        StoragePolicy::from(&config.transfer),
    );

    let file = File::open(input).with_context(|| format!("failed to open {}", input))?;
    let mut reader = SessionReader::new(BufReader::new(file));
    let mut count = 0usize;

    while let Some(stream) = reader.next_session()? {
        let name = stream.header().filename();
        match assembler.assemble(stream)? {
            Assembled::File(path) => println!("  file      {}", path.display()),
            Assembled::Inline(bytes) => {
                let file_name = Path::new(&name)
                    .file_name()
                    .with_context(|| format!("unusable file name: {:?}", name))?;
                let dest = files.user_dir().join(file_name);
                let mut out = OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(&dest)
                    .with_context(|| format!("failed to create {}", dest.display()))?;
                out.write_all(&bytes)
                    .with_context(|| format!("failed to write {}", dest.display()))?;
                println!("  inline    {} ({} bytes)", dest.display(), bytes.len());
            }
            Assembled::Duplicate => println!("  duplicate {}", name),
            Assembled::EndOfStream => break,
        }
        count += 1;
    }

    println!("Unpacked {} session(s) into {}", count, dir.display());
    Ok(())
}
