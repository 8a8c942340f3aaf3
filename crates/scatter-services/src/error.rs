//! Transfer failures.

use std::io;

use scatter_core::{FramingError, PacketError, PacketType, PolicyError};

/// Why a transfer did not complete. Inbound failures discard everything
/// received so far; nothing is partially committed.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("chunk {sequence_number} failed hash verification")]
    Integrity { sequence_number: u32 },

    #[error("expected chunk {expected}, received chunk {actual}")]
    OutOfOrder { expected: u32, actual: u32 },

    #[error("stream ended after {received} of {expected} chunks")]
    Truncated { received: usize, expected: usize },

    #[error("header lists {expected} chunks but more arrived")]
    Overrun { expected: usize },

    #[error("session dropped before its chunks were consumed")]
    Abandoned,

    #[error("expected a {expected:?} packet, got {actual:?}")]
    UnexpectedPacket {
        expected: PacketType,
        actual: PacketType,
    },

    #[error("transport stream is unusable after an earlier read failure")]
    StreamBroken,

    #[error(transparent)]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error("datastore failure: {0:#}")]
    Datastore(anyhow::Error),

    #[error("file storage failure: {0:#}")]
    Storage(anyhow::Error),

    #[error("i/o failure: {0}")]
    Io(#[from] io::Error),
}

impl From<FramingError> for TransferError {
    fn from(e: FramingError) -> Self {
        TransferError::Packet(PacketError::Framing(e))
    }
}

impl TransferError {
    /// True when the received data itself was bad, as opposed to a local
    /// storage or policy failure.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            TransferError::Integrity { .. }
                | TransferError::OutOfOrder { .. }
                | TransferError::Truncated { .. }
                | TransferError::Overrun { .. }
                | TransferError::UnexpectedPacket { .. }
                | TransferError::Packet(PacketError::Framing(_))
        )
    }
}
