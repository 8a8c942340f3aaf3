//! Chunking: byte source → ordered, position-hashed chunks.
//!
//! Everything here pulls from a `Read` on demand. A chunk is read only when
//! the consumer asks for it, and hashing reuses one fixed buffer, so a large
//! file never sits in memory whole.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use anyhow::Context;
use bytes::Bytes;

use scatter_core::crypto::{self, ChunkHash};
use scatter_core::{BlockSequencePacket, PolicyError, MAX_BLOCK_SIZE};

use crate::error::TransferError;

/// One slice of a source. Every chunk but the last is exactly the chunk
/// size; the last may be short.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub sequence_number: u32,
    pub data: Bytes,
}

impl Chunk {
    pub fn hash(&self) -> ChunkHash {
        crypto::hash_chunk(self.sequence_number, &self.data)
    }

    pub fn into_packet(self) -> BlockSequencePacket {
        BlockSequencePacket::new(self.sequence_number, self.data)
    }
}

/// Chunk sizes must be non-zero and small enough for one sequence frame.
fn check_chunk_size(chunk_size: u32) -> Result<(), PolicyError> {
    if chunk_size == 0 {
        return Err(PolicyError::ZeroChunkSize);
    }
    if chunk_size > MAX_BLOCK_SIZE {
        return Err(PolicyError::BlockSizeTooLarge(chunk_size));
    }
    Ok(())
}

/// Lazy chunk iterator over a reader. Consumes the reader, so it cannot be
/// restarted. Stops for good after the source is exhausted or a read fails.
pub struct Chunker<R> {
    source: R,
    chunk_size: u32,
    /// `None` once sequence number `u32::MAX` has been handed out.
    next_sequence: Option<u32>,
    done: bool,
}

impl<R: Read> Chunker<R> {
    pub fn new(source: R, chunk_size: u32) -> Result<Self, PolicyError> {
        check_chunk_size(chunk_size)?;
        Ok(Self {
            source,
            chunk_size,
            next_sequence: Some(0),
            done: false,
        })
    }

    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Turn the chunk iterator into a packet iterator.
    pub fn packets(self) -> impl Iterator<Item = Result<BlockSequencePacket, TransferError>> {
        self.map(|chunk| chunk.map(Chunk::into_packet))
    }
}

impl<R: Read> Iterator for Chunker<R> {
    type Item = Result<Chunk, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let mut buf = Vec::with_capacity(self.chunk_size as usize);
        match fill(&mut self.source, &mut buf, self.chunk_size) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                let Some(sequence_number) = self.next_sequence else {
                    self.done = true;
                    return Some(Err(PolicyError::TooManyChunks.into()));
                };
                self.next_sequence = sequence_number.checked_add(1);
                tracing::trace!(sequence_number, len = buf.len(), "chunk read");
                Some(Ok(Chunk {
                    sequence_number,
                    data: Bytes::from(buf),
                }))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e.into()))
            }
        }
    }
}

/// Read up to `limit` bytes into `buf`, stopping early only at end of input.
fn fill<R: Read>(source: &mut R, buf: &mut Vec<u8>, limit: u32) -> io::Result<usize> {
    buf.clear();
    source.take(u64::from(limit)).read_to_end(buf)
}

// ── Entry points ──────────────────────────────────────────────────────────────

/// Chunk a byte source.
pub fn chunk<R: Read>(source: R, chunk_size: u32) -> Result<Chunker<R>, PolicyError> {
    Chunker::new(source, chunk_size)
}

/// Chunk a byte source straight into sequence packets.
pub fn sequence_packets<R: Read>(
    source: R,
    chunk_size: u32,
) -> Result<impl Iterator<Item = Result<BlockSequencePacket, TransferError>>, PolicyError> {
    Ok(Chunker::new(source, chunk_size)?.packets())
}

/// Compute a header hash list without keeping any chunk bytes.
pub fn hash_source<R: Read>(mut source: R, chunk_size: u32) -> Result<Vec<ChunkHash>, TransferError> {
    check_chunk_size(chunk_size)?;
    let mut buf = Vec::with_capacity(chunk_size as usize);
    let mut hashes = Vec::new();
    loop {
        let n = fill(&mut source, &mut buf, chunk_size)?;
        if n == 0 {
            break;
        }
        let sequence_number =
            u32::try_from(hashes.len()).map_err(|_| PolicyError::TooManyChunks)?;
        hashes.push(crypto::hash_chunk(sequence_number, &buf));
    }
    Ok(hashes)
}

/// Hash list of a file on disk.
pub fn hash_file(path: &Path, chunk_size: u32) -> anyhow::Result<Vec<ChunkHash>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let hashes = hash_source(file, chunk_size)
        .with_context(|| format!("failed to hash {}", path.display()))?;
    tracing::debug!(path = %path.display(), chunks = hashes.len(), "file hashed");
    Ok(hashes)
}

/// Open a file for lazy chunking.
pub fn read_file(path: &Path, chunk_size: u32) -> anyhow::Result<Chunker<File>> {
    let file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    Ok(Chunker::new(file, chunk_size)?)
}

/// Chunk an in-memory body without copying it.
pub fn read_body(body: Bytes, chunk_size: u32) -> Result<BodyChunks, PolicyError> {
    check_chunk_size(chunk_size)?;
    let chunks = (body.len() as u64).div_ceil(u64::from(chunk_size));
    if chunks > u64::from(u32::MAX) + 1 {
        return Err(PolicyError::TooManyChunks);
    }
    Ok(BodyChunks {
        body,
        chunk_size: chunk_size as usize,
        offset: 0,
        next_sequence: 0,
    })
}

/// Zero-copy chunk iterator over `Bytes`.
pub struct BodyChunks {
    body: Bytes,
    chunk_size: usize,
    offset: usize,
    next_sequence: u32,
}

impl Iterator for BodyChunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.offset >= self.body.len() {
            return None;
        }
        let end = self.body.len().min(self.offset + self.chunk_size);
        let chunk = Chunk {
            sequence_number: self.next_sequence,
            data: self.body.slice(self.offset..end),
        };
        self.offset = end;
        self.next_sequence = self.next_sequence.wrapping_add(1);
        Some(chunk)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
