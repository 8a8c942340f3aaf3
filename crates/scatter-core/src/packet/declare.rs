//! DeclareHashesPacket: content a peer already holds, or an opt-out.
//!
//! Opting out and listing hashes are mutually exclusive. The builder rejects
//! a request for both. A peer that sends both anyway is read as opted out
//! and its hashes are dropped.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::{PacketError, PolicyError, WirePacket};
use crate::crypto::ChunkHash;
use crate::wire::PacketType;

/// Most hashes a peer announces from its own store in one packet.
pub const DEFAULT_DECLARE_CAP: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeclareHashesPacket {
    opt_out: bool,
    hashes: BTreeSet<ChunkHash>,
}

#[derive(Serialize, Deserialize)]
pub struct WireDeclareHashes {
    opt_out: bool,
    hashes: Vec<ChunkHash>,
}

impl DeclareHashesPacket {
    pub fn builder() -> DeclareHashesBuilder {
        DeclareHashesBuilder::default()
    }

    /// "Send me nothing."
    pub fn opt_out() -> Self {
        Self {
            opt_out: true,
            hashes: BTreeSet::new(),
        }
    }

    pub fn with_hashes<I>(hashes: I) -> Self
    where
        I: IntoIterator<Item = ChunkHash>,
    {
        Self {
            opt_out: false,
            hashes: hashes.into_iter().collect(),
        }
    }

    /// Announce up to `cap` distinct keys from a local store. A store with
    /// nothing to announce opts out.
    pub fn from_known<I>(known: I, cap: usize) -> Self
    where
        I: IntoIterator<Item = ChunkHash>,
    {
        let mut hashes = BTreeSet::new();
        for hash in known {
            if hashes.len() >= cap {
                break;
            }
            hashes.insert(hash);
        }
        if hashes.is_empty() {
            return Self::opt_out();
        }
        Self {
            opt_out: false,
            hashes,
        }
    }

    pub fn is_opt_out(&self) -> bool {
        self.opt_out
    }

    pub fn hashes(&self) -> &BTreeSet<ChunkHash> {
        &self.hashes
    }

    /// Whether the declaring peer still wants content with this key.
    pub fn wants(&self, content_key: &ChunkHash) -> bool {
        !self.opt_out && !self.hashes.contains(content_key)
    }
}

impl WirePacket for DeclareHashesPacket {
    const TYPE: PacketType = PacketType::DeclareHashes;
    type Wire = WireDeclareHashes;

    fn to_wire(&self) -> WireDeclareHashes {
        WireDeclareHashes {
            opt_out: self.opt_out,
            hashes: self.hashes.iter().copied().collect(),
        }
    }

    fn from_wire(wire: WireDeclareHashes) -> Result<Self, PacketError> {
        if wire.opt_out {
            if !wire.hashes.is_empty() {
                tracing::debug!(
                    dropped = wire.hashes.len(),
                    "declare-hashes opted out with hashes; ignoring hashes"
                );
            }
            return Ok(Self::opt_out());
        }
        Ok(Self::with_hashes(wire.hashes))
    }
}

#[derive(Debug, Clone, Default)]
pub struct DeclareHashesBuilder {
    opt_out: bool,
    hashes: BTreeSet<ChunkHash>,
}

impl DeclareHashesBuilder {
    pub fn hash(mut self, hash: ChunkHash) -> Self {
        self.hashes.insert(hash);
        self
    }

    pub fn hashes<I>(mut self, hashes: I) -> Self
    where
        I: IntoIterator<Item = ChunkHash>,
    {
        self.hashes.extend(hashes);
        self
    }

    pub fn opt_out(mut self) -> Self {
        self.opt_out = true;
        self
    }

    pub fn build(self) -> Result<DeclareHashesPacket, PolicyError> {
        if self.opt_out && !self.hashes.is_empty() {
            return Err(PolicyError::OptOutWithHashes);
        }
        Ok(DeclareHashesPacket {
            opt_out: self.opt_out,
            hashes: self.hashes,
        })
    }
}
