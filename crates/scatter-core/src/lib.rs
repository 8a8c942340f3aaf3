//! scatter-core — wire packets, framing, and cryptographic primitives.
//! All other Scatter crates depend on this one.

pub mod config;
pub mod crypto;
pub mod keystore;
pub mod packet;
pub mod wire;

pub use config::{ConfigError, ScatterConfig};
pub use crypto::{ChunkHash, KeyError, Keypair};
pub use keystore::{KeyStore, MemoryKeyStore};
pub use packet::{
    BlockHeaderBuilder, BlockHeaderPacket, BlockSequencePacket, DeclareHashesBuilder,
    DeclareHashesPacket, DEFAULT_DECLARE_CAP, Identity, IdentityPacket, Packet, PacketError, PolicyError,
    SequenceData, SharedIdentity, WirePacket, MAX_BLOCK_SIZE,
};
pub use wire::{FramingError, PacketType};
