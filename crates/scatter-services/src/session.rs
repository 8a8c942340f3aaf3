//! Transfer sessions: one header paired with its lazily pulled chunks.
//!
//! A `BlockDataStream` owns the header and a packet iterator. The iterator
//! checks every packet against the header as it is pulled, and the outcome
//! is published on a watch channel so callers can await completion without
//! touching the data path.
//!
//! Sessions move over a byte transport as typed frames:
//!
//!   [header] [seq 0] [seq 1] … [seq n-1]   (next session)   …   [end-of-stream header]

use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;

use scatter_core::config::TransferConfig;
use scatter_core::crypto::{self, ChunkHash};
use scatter_core::{BlockHeaderPacket, BlockSequencePacket, Packet, PacketType, WirePacket};

use crate::chunker::{self, Chunk, Chunker};
use crate::datastore::StoredMessage;
use crate::error::TransferError;

type PacketIter<'a> = Box<dyn Iterator<Item = Result<BlockSequencePacket, TransferError>> + Send + 'a>;

// ── State ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Header known, chunks not yet fully consumed.
    Open,
    /// Every chunk arrived and verified.
    Completed,
    /// The chunk sequence failed; the reason is the error message.
    Failed(String),
}

impl SessionState {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open)
    }
}

/// Write side of a session's state. Leaves `Open` at most once.
#[derive(Clone)]
struct Signal(Arc<watch::Sender<SessionState>>);

impl Signal {
    fn new() -> (Self, Completion) {
        let (tx, rx) = watch::channel(SessionState::Open);
        (Self(Arc::new(tx)), Completion { rx })
    }

    fn finish(&self, state: SessionState) {
        self.0.send_if_modified(|current| {
            if current.is_open() {
                *current = state;
                true
            } else {
                false
            }
        });
    }

    fn is_open(&self) -> bool {
        self.0.borrow().is_open()
    }
}

/// Read side of a session's state. Cheap to clone and independent of the
/// chunk data.
#[derive(Clone)]
pub struct Completion {
    rx: watch::Receiver<SessionState>,
}

impl Completion {
    pub fn state(&self) -> SessionState {
        self.rx.borrow().clone()
    }

    /// Resolve once the session leaves `Open`.
    pub async fn wait(&self) -> SessionState {
        let mut rx = self.rx.clone();
        let state = match rx.wait_for(|s| !s.is_open()).await {
            Ok(state) => state.clone(),
            Err(_) => self.state(),
        };
        state
    }
}

// ── Storage policy ────────────────────────────────────────────────────────────

/// Chooses between inline and on-disk storage by payload size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoragePolicy {
    pub inline_threshold: u64,
}

impl StoragePolicy {
    pub fn new(inline_threshold: u64) -> Self {
        Self { inline_threshold }
    }

    pub fn to_disk(&self, len: u64) -> bool {
        len > self.inline_threshold
    }
}

impl From<&TransferConfig> for StoragePolicy {
    fn from(config: &TransferConfig) -> Self {
        Self::new(config.inline_threshold)
    }
}

// ── Verification ──────────────────────────────────────────────────────────────

/// Checks packets against a hash list as they are pulled: dense sequence
/// numbers, per-chunk hash, and total count. Stops at the first failure.
pub struct Verified<I> {
    inner: I,
    hashes: Vec<ChunkHash>,
    received: usize,
    done: bool,
}

impl<I> Verified<I>
where
    I: Iterator<Item = Result<BlockSequencePacket, TransferError>>,
{
    pub fn new(header: &BlockHeaderPacket, inner: I) -> Self {
        Self {
            inner,
            hashes: header.hash_list().to_vec(),
            received: 0,
            done: false,
        }
    }

    fn check(&self, packet: &BlockSequencePacket) -> Result<(), TransferError> {
        let expected_seq = self.received as u32;
        let Some(expected) = self.hashes.get(self.received) else {
            return Err(TransferError::Overrun {
                expected: self.hashes.len(),
            });
        };
        if packet.sequence_number() != expected_seq {
            return Err(TransferError::OutOfOrder {
                expected: expected_seq,
                actual: packet.sequence_number(),
            });
        }
        if !crypto::verify_chunk(packet.sequence_number(), packet.bytes(), expected) {
            tracing::warn!(
                sequence_number = packet.sequence_number(),
                "chunk failed verification"
            );
            return Err(TransferError::Integrity {
                sequence_number: packet.sequence_number(),
            });
        }
        Ok(())
    }
}

impl<I> Iterator for Verified<I>
where
    I: Iterator<Item = Result<BlockSequencePacket, TransferError>>,
{
    type Item = Result<BlockSequencePacket, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let item = match self.inner.next() {
            None => {
                self.done = true;
                if self.received < self.hashes.len() {
                    return Some(Err(TransferError::Truncated {
                        received: self.received,
                        expected: self.hashes.len(),
                    }));
                }
                return None;
            }
            Some(Err(e)) => Err(e),
            Some(Ok(packet)) => self.check(&packet).map(|()| packet),
        };
        match &item {
            Ok(_) => self.received += 1,
            Err(_) => self.done = true,
        }
        Some(item)
    }
}

// ── Packet iterator ───────────────────────────────────────────────────────────

/// A session's packet iterator. Exhaustion marks the session `Completed`,
/// an error marks it `Failed`, and dropping it early marks it `Failed` too.
pub struct SessionPackets<'a> {
    inner: PacketIter<'a>,
    signal: Signal,
    done: bool,
}

impl SessionPackets<'_> {
    /// Fail the session from the consumer side, for example when storage
    /// refuses the payload.
    pub fn fail(&mut self, error: &TransferError) {
        self.done = true;
        self.signal.finish(SessionState::Failed(error.to_string()));
    }
}

impl Iterator for SessionPackets<'_> {
    type Item = Result<BlockSequencePacket, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            None => {
                self.done = true;
                self.signal.finish(SessionState::Completed);
                None
            }
            Some(Err(e)) => {
                self.fail(&e);
                Some(Err(e))
            }
            Some(Ok(packet)) => Some(Ok(packet)),
        }
    }
}

impl Drop for SessionPackets<'_> {
    fn drop(&mut self) {
        if !self.done {
            self.signal
                .finish(SessionState::Failed(TransferError::Abandoned.to_string()));
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// One header and its chunk sequence for a single send or receive.
pub struct BlockDataStream<'a> {
    header: BlockHeaderPacket,
    packets: Option<PacketIter<'a>>,
    signal: Signal,
    completion: Completion,
    last_in_batch: bool,
}

impl<'a> BlockDataStream<'a> {
    fn with_packets<I>(header: BlockHeaderPacket, packets: I, last_in_batch: bool) -> Self
    where
        I: Iterator<Item = Result<BlockSequencePacket, TransferError>> + Send + 'a,
    {
        let (signal, completion) = Signal::new();
        let verified = Verified::new(&header, packets);
        Self {
            header,
            packets: Some(Box::new(verified)),
            signal,
            completion,
            last_in_batch,
        }
    }

    /// A session received from a peer.
    pub fn inbound<I>(header: BlockHeaderPacket, packets: I) -> Self
    where
        I: IntoIterator<Item = Result<BlockSequencePacket, TransferError>>,
        I::IntoIter: Send + 'a,
    {
        let last = header.is_end_of_stream();
        Self::with_packets(header, packets.into_iter(), last)
    }

    /// A session for sending a stored message. `end` marks the last session
    /// of a batch; `to_disk` tells the receiver where to keep the payload.
    pub fn outbound<I>(
        message: &StoredMessage,
        packets: I,
        end: bool,
        to_disk: bool,
    ) -> Result<Self, TransferError>
    where
        I: IntoIterator<Item = Result<BlockSequencePacket, TransferError>>,
        I::IntoIter: Send + 'a,
    {
        let header = message.header_builder().to_disk(to_disk).build()?;
        Ok(Self::with_packets(header, packets.into_iter(), end))
    }

    /// Terminal marker for a batch. Already complete; it carries no chunks.
    pub fn end_of_stream() -> Self {
        let stream = Self::with_packets(BlockHeaderPacket::end_of_stream(), std::iter::empty(), true);
        stream.signal.finish(SessionState::Completed);
        stream
    }

    /// Send an in-memory body. Inline or on-disk storage is chosen by size.
    pub fn from_blob(
        message: &StoredMessage,
        body: Bytes,
        policy: &StoragePolicy,
        end: bool,
    ) -> Result<Self, TransferError> {
        let to_disk = policy.to_disk(body.len() as u64);
        let chunks = chunker::read_body(body, message.block_size)?;
        Self::outbound(message, chunks.map(|c| Ok(c.into_packet())), end, to_disk)
    }

    /// Send a file, reading it chunk by chunk as the consumer pulls.
    pub fn from_file(
        message: &StoredMessage,
        path: &Path,
        policy: &StoragePolicy,
        end: bool,
    ) -> Result<Self, TransferError> {
        let file = std::fs::File::open(path)?;
        let len = file.metadata()?.len();
        let chunks = Chunker::new(file, message.block_size)?;
        Self::outbound(
            message,
            chunks.map(|c| c.map(Chunk::into_packet)),
            end,
            policy.to_disk(len),
        )
    }

    pub fn header(&self) -> &BlockHeaderPacket {
        &self.header
    }

    pub fn to_disk(&self) -> bool {
        self.header.to_disk()
    }

    /// Whether this session ends its batch.
    pub fn is_last(&self) -> bool {
        self.last_in_batch
    }

    pub fn completion(&self) -> Completion {
        self.completion.clone()
    }

    pub fn state(&self) -> SessionState {
        self.completion.state()
    }

    /// Take the tracked packet iterator, leaving the header behind.
    pub fn into_parts(mut self) -> (BlockHeaderPacket, SessionPackets<'a>) {
        let inner = self
            .packets
            .take()
            .unwrap_or_else(|| Box::new(std::iter::empty()));
        let header = std::mem::replace(&mut self.header, BlockHeaderPacket::end_of_stream());
        let packets = SessionPackets {
            inner,
            signal: self.signal.clone(),
            done: !self.signal.is_open(),
        };
        (header, packets)
    }

    pub fn packets(self) -> SessionPackets<'a> {
        self.into_parts().1
    }
}

impl Drop for BlockDataStream<'_> {
    fn drop(&mut self) {
        if self.packets.is_some() {
            self.signal
                .finish(SessionState::Failed(TransferError::Abandoned.to_string()));
        }
    }
}

// ── Byte transport ────────────────────────────────────────────────────────────

/// Write one session as typed frames, pulling chunks one at a time. A
/// session that ends its batch is followed by an end-of-stream header.
/// Returns the number of chunks written.
pub fn write_session<W: Write>(
    stream: BlockDataStream<'_>,
    writer: &mut W,
) -> Result<usize, TransferError> {
    let last = stream.is_last();
    let (header, mut packets) = stream.into_parts();
    header.write_typed(writer)?;

    let mut written = 0;
    while let Some(packet) = packets.next() {
        let result = packet.and_then(|p| p.write_typed(writer).map_err(TransferError::from));
        if let Err(e) = result {
            packets.fail(&e);
            return Err(e);
        }
        written += 1;
    }

    if last && !header.is_end_of_stream() {
        BlockHeaderPacket::end_of_stream().write_typed(writer)?;
    }
    writer.flush()?;
    tracing::debug!(
        session_id = header.session_id(),
        chunks = written,
        content_key = hex::encode(header.content_key()),
        "session written"
    );
    Ok(written)
}

/// Reads sessions off a byte transport. Each session borrows the reader, so
/// chunks are read only as the consumer pulls them.
pub struct SessionReader<R> {
    reader: R,
    /// Chunks of the current session not yet read off the wire.
    pending: usize,
    broken: bool,
    finished: bool,
}

impl<R: Read + Send> SessionReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            pending: 0,
            broken: false,
            finished: false,
        }
    }

    /// Next session in the batch, or `None` once the end-of-stream header
    /// has been read. Chunks left unread by the previous session are read
    /// and dropped first.
    pub fn next_session(&mut self) -> Result<Option<BlockDataStream<'_>>, TransferError> {
        if self.finished {
            return Ok(None);
        }
        while self.pending > 0 {
            read_sequence(&mut self.reader, &mut self.broken)?;
            self.pending -= 1;
        }
        if self.broken {
            return Err(TransferError::StreamBroken);
        }

        let header = match Packet::read_typed(&mut self.reader) {
            Ok(Packet::Header(header)) => header,
            Ok(other) => {
                self.broken = true;
                return Err(TransferError::UnexpectedPacket {
                    expected: PacketType::BlockHeader,
                    actual: other.packet_type(),
                });
            }
            Err(e) => {
                self.broken = true;
                return Err(e.into());
            }
        };
        if header.is_end_of_stream() {
            self.finished = true;
            return Ok(None);
        }

        tracing::debug!(
            session_id = header.session_id(),
            chunks = header.chunk_count(),
            "session header read"
        );
        self.pending = header.chunk_count();
        let lent = LentPackets {
            reader: &mut self.reader,
            pending: &mut self.pending,
            broken: &mut self.broken,
        };
        Ok(Some(BlockDataStream::inbound(header, lent)))
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

fn read_sequence<R: Read>(
    reader: &mut R,
    broken: &mut bool,
) -> Result<BlockSequencePacket, TransferError> {
    if *broken {
        return Err(TransferError::StreamBroken);
    }
    match Packet::read_typed(reader) {
        Ok(Packet::Sequence(packet)) => Ok(packet),
        Ok(other) => {
            *broken = true;
            Err(TransferError::UnexpectedPacket {
                expected: PacketType::BlockSequence,
                actual: other.packet_type(),
            })
        }
        Err(e) => {
            *broken = true;
            Err(e.into())
        }
    }
}

/// Chunks of the current session, read lazily from the shared reader.
struct LentPackets<'a, R> {
    reader: &'a mut R,
    pending: &'a mut usize,
    broken: &'a mut bool,
}

impl<R: Read> Iterator for LentPackets<'_, R> {
    type Item = Result<BlockSequencePacket, TransferError>;

    fn next(&mut self) -> Option<Self::Item> {
        if *self.pending == 0 {
            return None;
        }
        let result = read_sequence(self.reader, self.broken);
        if result.is_ok() {
            *self.pending -= 1;
        }
        Some(result)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
