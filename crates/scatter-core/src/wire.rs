//! Scatter wire framing — how packets travel over a raw byte stream.
//!
//! Every packet is serialized and wrapped in a CRC frame:
//!
//!   [u32 LE payload length] [payload] [u32 LE CRC32(payload)]
//!
//! When several packet kinds share one stream, a single type byte
//! (`PacketType`) precedes the frame so the transport can demultiplex.
//! Corruption is reported upward as a `FramingError`. This layer never
//! retries.

use std::io::{self, Read, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;

// ── Packet types ──────────────────────────────────────────────────────────────

/// Discriminator written in front of typed frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    BlockHeader = 0x00,
    BlockSequence = 0x01,
    Identity = 0x02,
    DeclareHashes = 0x03,
}

impl TryFrom<u8> for PacketType {
    type Error = FramingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(PacketType::BlockHeader),
            0x01 => Ok(PacketType::BlockSequence),
            0x02 => Ok(PacketType::Identity),
            0x03 => Ok(PacketType::DeclareHashes),
            other => Err(FramingError::UnknownPacketType(other)),
        }
    }
}

impl From<PacketType> for u8 {
    fn from(t: PacketType) -> u8 {
        t as u8
    }
}

// ── Constants ─────────────────────────────────────────────────────────────────

const LEN_SIZE: usize = 4;
const CRC_SIZE: usize = 4;

/// Largest payload a frame may declare. Anything bigger is treated as a
/// corrupt or hostile length prefix rather than allocated.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Bytes a frame adds around its payload.
pub const FRAME_OVERHEAD: usize = LEN_SIZE + CRC_SIZE;

// ── Framing ───────────────────────────────────────────────────────────────────

/// CRC32 of a payload, as written in the frame trailer.
pub fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Wrap `payload` in a CRC frame.
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(FramingError::TooLarge(payload.len()));
    }
    let mut out = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out.extend_from_slice(&checksum(payload).to_le_bytes());
    Ok(out)
}

/// Write one CRC frame to a stream.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FramingError> {
    let frame = encode_frame(payload)?;
    writer.write_all(&frame)?;
    Ok(())
}

/// Decode one frame from the front of `bytes`.
/// Returns the payload and the number of bytes consumed.
pub fn decode_frame(bytes: &[u8]) -> Result<(&[u8], usize), FramingError> {
    if bytes.len() < LEN_SIZE {
        return Err(FramingError::Truncated);
    }
    let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FramingError::TooLarge(len));
    }
    let total = FRAME_OVERHEAD + len;
    if bytes.len() < total {
        return Err(FramingError::Truncated);
    }
    let payload = &bytes[LEN_SIZE..LEN_SIZE + len];
    let trailer = &bytes[LEN_SIZE + len..total];
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = checksum(payload);
    if expected != actual {
        return Err(FramingError::ChecksumMismatch { expected, actual });
    }
    Ok((payload, total))
}

/// Read exactly one frame from a stream and return its verified payload.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, FramingError> {
    let mut len_buf = [0u8; LEN_SIZE];
    read_exact(reader, &mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(FramingError::TooLarge(len));
    }

    let mut payload = vec![0u8; len];
    read_exact(reader, &mut payload)?;

    let mut crc_buf = [0u8; CRC_SIZE];
    read_exact(reader, &mut crc_buf)?;
    let expected = u32::from_le_bytes(crc_buf);
    let actual = checksum(&payload);
    if expected != actual {
        return Err(FramingError::ChecksumMismatch { expected, actual });
    }
    Ok(payload)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<(), FramingError> {
    reader.read_exact(buf).map_err(|e| match e.kind() {
        io::ErrorKind::UnexpectedEof => FramingError::Truncated,
        _ => FramingError::Io(e),
    })
}

// ── Message codec ─────────────────────────────────────────────────────────────

/// Serialize a message and wrap it in a CRC frame.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, FramingError> {
    let payload = bincode::serialize(message).map_err(FramingError::Encode)?;
    encode_frame(&payload)
}

/// Read one CRC frame from a stream and deserialize it.
pub fn decode<T: DeserializeOwned, R: Read>(reader: &mut R) -> Result<T, FramingError> {
    let payload = read_frame(reader)?;
    bincode::deserialize(&payload).map_err(FramingError::Malformed)
}

/// Deserialize a message from a complete in-memory frame.
pub fn decode_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<(T, usize), FramingError> {
    let (payload, consumed) = decode_frame(bytes)?;
    let message = bincode::deserialize(payload).map_err(FramingError::Malformed)?;
    Ok((message, consumed))
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// A single parse failed. Always fatal to that parse.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    #[error("stream ended before the frame was complete")]
    Truncated,

    #[error("frame checksum mismatch: expected 0x{expected:08x}, computed 0x{actual:08x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("frame length {0} exceeds maximum {}", MAX_FRAME_LEN)]
    TooLarge(usize),

    #[error("unknown packet type byte: 0x{0:02x}")]
    UnknownPacketType(u8),

    #[error("frame payload does not decode: {0}")]
    Malformed(bincode::Error),

    #[error("failed to encode message: {0}")]
    Encode(bincode::Error),

    #[error("transport i/o error: {0}")]
    Io(#[from] io::Error),
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        id: u32,
        body: Vec<u8>,
    }

    fn sample() -> Sample {
        Sample {
            id: 7,
            body: b"framed body".to_vec(),
        }
    }

    #[test]
    fn frame_layout() {
        let frame = encode_frame(b"abc").unwrap();
        assert_eq!(frame.len(), 3 + FRAME_OVERHEAD);
        assert_eq!(&frame[..4], &3u32.to_le_bytes());
        assert_eq!(&frame[4..7], b"abc");
        assert_eq!(&frame[7..], &checksum(b"abc").to_le_bytes());
    }

    #[test]
    fn encode_decode_round_trip() {
        let frame = encode(&sample()).unwrap();
        let decoded: Sample = decode(&mut frame.as_slice()).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn every_single_byte_flip_is_detected() {
        let frame = encode(&sample()).unwrap();
        for i in 0..frame.len() {
            let mut corrupt = frame.clone();
            corrupt[i] ^= 0x01;
            let result: Result<Sample, _> = decode(&mut corrupt.as_slice());
            assert!(result.is_err(), "flip at byte {i} went undetected");
        }
    }

    #[test]
    fn payload_flip_is_checksum_mismatch() {
        let mut frame = encode(&sample()).unwrap();
        frame[LEN_SIZE] ^= 0xff;
        let result: Result<Sample, _> = decode(&mut frame.as_slice());
        assert!(matches!(result, Err(FramingError::ChecksumMismatch { .. })));
    }

    #[test]
    fn truncated_stream() {
        let frame = encode(&sample()).unwrap();
        for cut in [0, 2, LEN_SIZE, frame.len() - 1] {
            let result: Result<Sample, _> = decode(&mut &frame[..cut]);
            assert!(matches!(result, Err(FramingError::Truncated)), "cut at {cut}");
        }
    }

    #[test]
    fn hostile_length_prefix_rejected() {
        let mut frame = encode_frame(b"x").unwrap();
        frame[..4].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            read_frame(&mut frame.as_slice()),
            Err(FramingError::TooLarge(_))
        ));
    }

    #[test]
    fn decode_frame_reports_consumed_bytes() {
        let mut buf = encode_frame(b"first").unwrap();
        let second = encode_frame(b"second").unwrap();
        buf.extend_from_slice(&second);

        let (p1, n1) = decode_frame(&buf).unwrap();
        assert_eq!(p1, b"first");
        let (p2, n2) = decode_frame(&buf[n1..]).unwrap();
        assert_eq!(p2, b"second");
        assert_eq!(n1 + n2, buf.len());
    }

    #[test]
    fn packet_type_round_trip() {
        for t in [
            PacketType::BlockHeader,
            PacketType::BlockSequence,
            PacketType::Identity,
            PacketType::DeclareHashes,
        ] {
            assert_eq!(PacketType::try_from(u8::from(t)).unwrap(), t);
        }
        assert!(matches!(
            PacketType::try_from(0x7f),
            Err(FramingError::UnknownPacketType(0x7f))
        ));
    }
}
