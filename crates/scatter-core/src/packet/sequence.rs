//! BlockSequencePacket: one chunk of a session.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{BlockHeaderPacket, PacketError, WirePacket};
use crate::crypto::{self, ChunkHash};
use crate::wire::{PacketType, MAX_FRAME_LEN};

/// Bincode bytes a sequence packet adds around its chunk data: the
/// sequence number, the native flag, and the data length prefix.
const SEQUENCE_OVERHEAD: usize = 4 + 1 + 8;

/// Largest block size whose chunks still fit in a single frame.
pub const MAX_BLOCK_SIZE: u32 = (MAX_FRAME_LEN - SEQUENCE_OVERHEAD) as u32;

/// Chunk payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceData {
    /// Bytes carried in the packet.
    Inline(Bytes),
    /// Payload travels out of band, for example a file already on disk.
    Native,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSequencePacket {
    sequence_number: u32,
    data: SequenceData,
}

#[derive(Serialize, Deserialize)]
pub struct WireSequence {
    sequence_number: u32,
    native: bool,
    data: Bytes,
}

impl BlockSequencePacket {
    pub fn new(sequence_number: u32, data: impl Into<Bytes>) -> Self {
        Self {
            sequence_number,
            data: SequenceData::Inline(data.into()),
        }
    }

    pub fn native(sequence_number: u32) -> Self {
        Self {
            sequence_number,
            data: SequenceData::Native,
        }
    }

    pub fn sequence_number(&self) -> u32 {
        self.sequence_number
    }

    pub fn data(&self) -> &SequenceData {
        &self.data
    }

    pub fn is_native(&self) -> bool {
        matches!(self.data, SequenceData::Native)
    }

    /// Chunk bytes. Empty for native packets.
    pub fn bytes(&self) -> &[u8] {
        match &self.data {
            SequenceData::Inline(b) => b,
            SequenceData::Native => &[],
        }
    }

    pub fn into_bytes(self) -> Bytes {
        match self.data {
            SequenceData::Inline(b) => b,
            SequenceData::Native => Bytes::new(),
        }
    }

    /// Position-bound hash of this chunk, as the sender lists it in the header.
    pub fn calculate_hash(&self) -> ChunkHash {
        crypto::hash_chunk(self.sequence_number, self.bytes())
    }

    /// Check this chunk against the header's hash list. Never panics; an
    /// out-of-range sequence number verifies as false.
    pub fn verify_hash(&self, header: &BlockHeaderPacket) -> bool {
        match header.hash(self.sequence_number) {
            Some(expected) => crypto::verify_chunk(self.sequence_number, self.bytes(), expected),
            None => false,
        }
    }
}

impl WirePacket for BlockSequencePacket {
    const TYPE: PacketType = PacketType::BlockSequence;
    type Wire = WireSequence;

    fn to_wire(&self) -> WireSequence {
        match &self.data {
            SequenceData::Inline(b) => WireSequence {
                sequence_number: self.sequence_number,
                native: false,
                data: b.clone(),
            },
            SequenceData::Native => WireSequence {
                sequence_number: self.sequence_number,
                native: true,
                data: Bytes::new(),
            },
        }
    }

    fn from_wire(wire: WireSequence) -> Result<Self, PacketError> {
        let data = if wire.native {
            SequenceData::Native
        } else {
            SequenceData::Inline(wire.data)
        };
        Ok(Self {
            sequence_number: wire.sequence_number,
            data,
        })
    }
}
