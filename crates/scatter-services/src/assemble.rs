//! Assembly: verified chunk stream → stored message.
//!
//! Chunks are checked in order against the header's hash list and the first
//! bad chunk aborts the transfer. Nothing is committed until every chunk has
//! verified. On-disk payloads go through a part file that is linked into
//! place at the end; inline payloads are buffered up to the configured
//! threshold and spill into a part file once they outgrow it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use scatter_core::{BlockHeaderPacket, BlockSequencePacket, ChunkHash};

use crate::datastore::{Datastore, MessageBody, StoredMessage};
use crate::error::TransferError;
use crate::file_store::{Commit, FileStore};
use crate::session::{BlockDataStream, SessionPackets, StoragePolicy, Verified};

// ── Engine ────────────────────────────────────────────────────────────────────

/// Verify `packets` against `header` and write their bytes to `writer`.
/// Stops at the first failure; nothing after a bad chunk is written.
/// Returns the number of bytes written.
pub fn assemble_into<I, W>(
    header: &BlockHeaderPacket,
    packets: I,
    writer: &mut W,
) -> Result<u64, TransferError>
where
    I: IntoIterator<Item = Result<BlockSequencePacket, TransferError>>,
    W: Write,
{
    let written = write_packets(Verified::new(header, packets.into_iter()), writer)?;
    writer.flush()?;
    Ok(written)
}

/// Verify `packets` and throw the bytes away. Returns the chunk count.
pub fn discard<I>(header: &BlockHeaderPacket, packets: I) -> Result<usize, TransferError>
where
    I: IntoIterator<Item = Result<BlockSequencePacket, TransferError>>,
{
    drain(Verified::new(header, packets.into_iter()))
}

fn write_packets<I, W>(packets: I, writer: &mut W) -> Result<u64, TransferError>
where
    I: Iterator<Item = Result<BlockSequencePacket, TransferError>>,
    W: Write,
{
    let mut written = 0u64;
    for packet in packets {
        let packet = packet?;
        writer.write_all(packet.bytes())?;
        written += packet.bytes().len() as u64;
    }
    Ok(written)
}

fn drain<I>(packets: I) -> Result<usize, TransferError>
where
    I: Iterator<Item = Result<BlockSequencePacket, TransferError>>,
{
    let mut count = 0;
    for packet in packets {
        packet?;
        count += 1;
    }
    Ok(count)
}

/// Result of buffering an inline payload against the inline limit.
enum Buffered {
    /// Every chunk arrived and the payload fits.
    Complete(Bytes),
    /// The limit was crossed. Holds what was read so far; the remaining
    /// chunks are still in the iterator.
    Overflow(BytesMut),
}

fn collect_inline<I>(packets: &mut I, limit: u64) -> Result<Buffered, TransferError>
where
    I: Iterator<Item = Result<BlockSequencePacket, TransferError>>,
{
    let mut buf = BytesMut::new();
    for packet in packets {
        let packet = packet?;
        buf.extend_from_slice(packet.bytes());
        if buf.len() as u64 > limit {
            return Ok(Buffered::Overflow(buf));
        }
    }
    Ok(Buffered::Complete(buf.freeze()))
}

// ── Assembler ─────────────────────────────────────────────────────────────────

/// What an inbound session turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Assembled {
    Inline(Bytes),
    File(PathBuf),
    /// The content was already held; the chunks were verified and dropped.
    Duplicate,
    /// The batch terminator. Nothing stored.
    EndOfStream,
}

/// Stores inbound sessions into a datastore and file store.
#[derive(Clone)]
pub struct Assembler {
    datastore: Arc<dyn Datastore>,
    files: FileStore,
    policy: StoragePolicy,
}

impl Assembler {
    pub fn new(datastore: Arc<dyn Datastore>, files: FileStore, policy: StoragePolicy) -> Self {
        Self {
            datastore,
            files,
            policy,
        }
    }

    pub fn datastore(&self) -> &Arc<dyn Datastore> {
        &self.datastore
    }

    pub fn files(&self) -> &FileStore {
        &self.files
    }

    /// Consume an inbound session. Sessions with the same content key are
    /// serialized, so concurrent copies of one message persist once.
    pub fn assemble(&self, stream: BlockDataStream<'_>) -> Result<Assembled, TransferError> {
        if stream.header().is_end_of_stream() {
            drain(stream.packets())?;
            return Ok(Assembled::EndOfStream);
        }

        let key = stream.header().content_key();
        self.files.with_key_lock(&key, || {
            let (header, mut packets) = stream.into_parts();
            let result = self.store(&header, &mut packets);
            match &result {
                Ok(outcome) => log_outcome(&header, outcome),
                Err(e) => {
                    packets.fail(e);
                    tracing::warn!(
                        session_id = header.session_id(),
                        content_key = hex::encode(key),
                        error = %e,
                        "inbound transfer discarded"
                    );
                }
            }
            result
        })
    }

    fn store(
        &self,
        header: &BlockHeaderPacket,
        packets: &mut SessionPackets<'_>,
    ) -> Result<Assembled, TransferError> {
        let key = header.content_key();
        let path = self.files.path_for(header);
        if self.is_known(&key, &path)? {
            drain(packets)?;
            return Ok(Assembled::Duplicate);
        }

        let prefix = if header.to_disk() {
            Bytes::new()
        } else {
            match collect_inline(&mut *packets, self.policy.inline_threshold)? {
                Buffered::Complete(bytes) => {
                    let message =
                        StoredMessage::from_header(header, MessageBody::Inline(bytes.clone()));
                    if !self.datastore.persist(message).map_err(TransferError::Datastore)? {
                        return Ok(Assembled::Duplicate);
                    }
                    return Ok(Assembled::Inline(bytes));
                }
                Buffered::Overflow(buf) => {
                    tracing::debug!(
                        session_id = header.session_id(),
                        limit = self.policy.inline_threshold,
                        "inline payload spilled to disk"
                    );
                    buf.freeze()
                }
            }
        };

        let commit = self.write_file(&path, &prefix, packets)?;
        let message = StoredMessage::from_header(header, MessageBody::File(path.clone()));
        match self.datastore.persist(message) {
            Ok(true) => Ok(Assembled::File(path)),
            Ok(false) => Ok(Assembled::Duplicate),
            Err(e) => {
                if commit == Commit::Written {
                    if let Err(cleanup) = self.files.delete(&path) {
                        tracing::warn!(error = %cleanup, "unpersisted file left in cache");
                    }
                }
                Err(TransferError::Datastore(e))
            }
        }
    }

    /// Write `prefix` and then the remaining verified chunks through a part
    /// file, committing it at `path`.
    fn write_file(
        &self,
        path: &Path,
        prefix: &[u8],
        packets: &mut SessionPackets<'_>,
    ) -> Result<Commit, TransferError> {
        let mut part = self.files.create_part(path).map_err(TransferError::Storage)?;
        part.write_all(prefix)?;
        write_packets(packets, &mut part)?;
        part.flush()?;
        let commit = part.commit().map_err(TransferError::Storage)?;
        if commit == Commit::AlreadyPresent {
            tracing::debug!(path = %path.display(), "verified file already on disk");
        }
        Ok(commit)
    }

    fn is_known(&self, key: &ChunkHash, path: &Path) -> Result<bool, TransferError> {
        if self.datastore.exists_by_hash(key).map_err(TransferError::Datastore)? {
            return Ok(true);
        }
        Ok(self.datastore.exists_by_path(path).map_err(TransferError::Datastore)? > 0)
    }
}

fn log_outcome(header: &BlockHeaderPacket, outcome: &Assembled) {
    let content_key = hex::encode(header.content_key());
    match outcome {
        Assembled::Inline(bytes) => tracing::info!(
            session_id = header.session_id(),
            content_key = %content_key,
            bytes = bytes.len(),
            "message stored inline"
        ),
        Assembled::File(path) => tracing::info!(
            session_id = header.session_id(),
            content_key = %content_key,
            path = %path.display(),
            "message stored on disk"
        ),
        Assembled::Duplicate => tracing::warn!(
            session_id = header.session_id(),
            content_key = %content_key,
            "duplicate content discarded"
        ),
        Assembled::EndOfStream => {}
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
