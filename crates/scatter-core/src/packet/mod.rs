//! Scatter packet model.
//!
//! Four wire packets travel between peers:
//!   - `BlockHeaderPacket`: metadata and chunk hash list for one message
//!   - `BlockSequencePacket`: one chunk of payload
//!   - `IdentityPacket`: a self-signed identity record
//!   - `DeclareHashesPacket`: content hashes a peer already holds
//!
//! Each packet has a private serde representation that is bincode-encoded
//! and wrapped in a CRC frame (see `wire`). In-memory types validate on the
//! way in, so a parsed packet always satisfies its invariants.

mod declare;
mod header;
mod identity;
mod sequence;

use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::crypto::KeyError;
use crate::wire::{self, FramingError, PacketType};

pub use declare::{DeclareHashesBuilder, DeclareHashesPacket, DEFAULT_DECLARE_CAP};
pub use header::{sanitize_extension, BlockHeaderBuilder, BlockHeaderPacket, DEFAULT_MIME};
pub use identity::{Identity, IdentityPacket, SharedIdentity, RESERVED_KEY};
pub use sequence::{BlockSequencePacket, SequenceData, MAX_BLOCK_SIZE};

/// Single-byte fingerprint meaning "absent" on the wire.
pub const FINGERPRINT_SENTINEL: &[u8] = &[0];

// ── Codec trait ───────────────────────────────────────────────────────────────

/// A packet with a canonical framed binary encoding.
pub trait WirePacket: Sized {
    /// Discriminator written in front of typed frames.
    const TYPE: PacketType;

    /// Serde representation carried inside the frame.
    type Wire: Serialize + DeserializeOwned;

    fn to_wire(&self) -> Self::Wire;

    /// Validate a decoded representation.
    fn from_wire(wire: Self::Wire) -> Result<Self, PacketError>;

    /// Framed encoding of this packet.
    fn to_bytes(&self) -> Result<Vec<u8>, PacketError> {
        Ok(wire::encode(&self.to_wire())?)
    }

    fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), PacketError> {
        let bytes = self.to_bytes()?;
        writer.write_all(&bytes).map_err(FramingError::Io)?;
        Ok(())
    }

    /// Write the type byte followed by the frame.
    fn write_typed<W: Write>(&self, writer: &mut W) -> Result<(), PacketError> {
        writer
            .write_all(&[u8::from(Self::TYPE)])
            .map_err(FramingError::Io)?;
        self.write_to(writer)
    }

    fn read_from<R: Read>(reader: &mut R) -> Result<Self, PacketError> {
        Self::from_wire(wire::decode(reader)?)
    }

    /// Parse one packet from the front of `bytes`. Returns it with the
    /// number of bytes consumed.
    fn parse(bytes: &[u8]) -> Result<(Self, usize), PacketError> {
        let (wire, consumed) = wire::decode_bytes(bytes)?;
        Ok((Self::from_wire(wire)?, consumed))
    }
}

// ── Typed demultiplexing ──────────────────────────────────────────────────────

/// Any packet, as read from a mixed stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Header(BlockHeaderPacket),
    Sequence(BlockSequencePacket),
    Identity(IdentityPacket),
    DeclareHashes(DeclareHashesPacket),
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Header(_) => PacketType::BlockHeader,
            Packet::Sequence(_) => PacketType::BlockSequence,
            Packet::Identity(_) => PacketType::Identity,
            Packet::DeclareHashes(_) => PacketType::DeclareHashes,
        }
    }

    pub fn write_typed<W: Write>(&self, writer: &mut W) -> Result<(), PacketError> {
        match self {
            Packet::Header(p) => p.write_typed(writer),
            Packet::Sequence(p) => p.write_typed(writer),
            Packet::Identity(p) => p.write_typed(writer),
            Packet::DeclareHashes(p) => p.write_typed(writer),
        }
    }

    /// Read a type byte and the frame that follows it.
    pub fn read_typed<R: Read>(reader: &mut R) -> Result<Self, PacketError> {
        let mut tag = [0u8; 1];
        reader.read_exact(&mut tag).map_err(|e| match e.kind() {
            std::io::ErrorKind::UnexpectedEof => FramingError::Truncated,
            _ => FramingError::Io(e),
        })?;
        let packet = match PacketType::try_from(tag[0])? {
            PacketType::BlockHeader => Packet::Header(BlockHeaderPacket::read_from(reader)?),
            PacketType::BlockSequence => Packet::Sequence(BlockSequencePacket::read_from(reader)?),
            PacketType::Identity => Packet::Identity(IdentityPacket::read_from(reader)?),
            PacketType::DeclareHashes => {
                Packet::DeclareHashes(DeclareHashesPacket::read_from(reader)?)
            }
        };
        Ok(packet)
    }
}

// ── Fingerprint helpers ───────────────────────────────────────────────────────

/// Wire form of an optional fingerprint.
pub(crate) fn fingerprint_to_wire(fp: Option<&str>) -> Vec<u8> {
    match fp {
        Some(fp) => fp.as_bytes().to_vec(),
        None => FINGERPRINT_SENTINEL.to_vec(),
    }
}

/// Translate a wire fingerprint back to an optional string.
pub(crate) fn fingerprint_from_wire(bytes: Vec<u8>) -> Result<Option<String>, PolicyError> {
    if bytes == FINGERPRINT_SENTINEL {
        return Ok(None);
    }
    if bytes.is_empty() {
        return Err(PolicyError::EmptyFingerprint);
    }
    String::from_utf8(bytes)
        .map(Some)
        .map_err(|_| PolicyError::InvalidFingerprint)
}

/// Builder-side check of a caller-supplied fingerprint.
pub(crate) fn check_fingerprint(fp: &str) -> Result<(), PolicyError> {
    if fp.is_empty() {
        return Err(PolicyError::EmptyFingerprint);
    }
    if fp.as_bytes() == FINGERPRINT_SENTINEL {
        return Err(PolicyError::SentinelFingerprint);
    }
    Ok(())
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A packet or builder invariant was violated. Fatal to the operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyError {
    #[error("block size must be set and non-zero unless end of stream")]
    MissingBlockSize,

    #[error("block size {0} exceeds the largest framable chunk ({})", MAX_BLOCK_SIZE)]
    BlockSizeTooLarge(u32),

    #[error("application must be set unless end of stream")]
    MissingApplication,

    #[error("signature supplied without a sender fingerprint")]
    SignatureWithoutSender,

    #[error("fingerprint must not be empty")]
    EmptyFingerprint,

    #[error("fingerprint collides with the absent-fingerprint sentinel")]
    SentinelFingerprint,

    #[error("fingerprint is not valid utf-8")]
    InvalidFingerprint,

    #[error("declare-hashes cannot both opt out and carry hashes")]
    OptOutWithHashes,

    #[error("chunk size must be non-zero")]
    ZeroChunkSize,

    #[error("source needs more chunks than a sequence number can count")]
    TooManyChunks,

    #[error("reserved key {0:?} cannot be modified directly")]
    ReservedKey(String),

    #[error("identity name must not be empty")]
    EmptyName,
}

/// Any failure to build, encode, or parse a packet.
#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error(transparent)]
    Framing(#[from] FramingError),

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Key(#[from] KeyError),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
