use std::io::{BufReader, Write};
use std::thread;

use crate::*;
use scatter_core::{BlockSequencePacket, PacketError, WirePacket};
use scatter_services::{write_session, BlockDataStream, SessionState, TransferError};

/// Frames for one session whose chunk `forge` carries the wrong bytes but
/// a valid frame checksum.
fn forged_session(msg: &StoredMessage, body: &[u8], forge: u32) -> Result<Vec<u8>> {
    let header = msg.header_builder().build()?;
    let mut wire = Vec::new();
    header.write_typed(&mut wire)?;
    for packet in chunker::sequence_packets(body, msg.block_size)? {
        let packet = packet?;
        let packet = if packet.sequence_number() == forge {
            BlockSequencePacket::new(forge, &b"substituted in transit"[..])
        } else {
            packet
        };
        packet.write_typed(&mut wire)?;
    }
    Ok(wire)
}

/// A forged chunk fails its session; the reader skips the rest of that
/// session and the next one still lands.
#[test]
fn test_forged_chunk_discards_only_its_session() -> Result<()> {
    let node = Node::new("forged", 1 << 20)?;
    let bad_body = payload(2000, 1);
    let good_body = payload(700, 2);
    let bad = message(&bad_body, 256, "chat", "")?;
    let good = message(&good_body, 256, "chat", "")?;

    let mut wire = forged_session(&bad, &bad_body, 2)?;
    let tail = BlockDataStream::from_blob(&good, good_body.clone(), &StoragePolicy::new(1 << 20), true)?;
    write_session(tail, &mut wire)?;

    let mut reader = SessionReader::new(wire.as_slice());
    let first = reader.next_session()?.context("missing first session")?;
    let completion = first.completion();
    let err = node.assembler.assemble(first).unwrap_err();
    assert!(matches!(err, TransferError::Integrity { sequence_number: 2 }));
    assert!(matches!(completion.state(), SessionState::Failed(_)));
    assert!(!node.store.exists_by_hash(&bad.content_key)?);

    let second = reader.next_session()?.context("missing second session")?;
    assert_eq!(node.assembler.assemble(second)?, Assembled::Inline(good_body));
    assert!(reader.next_session()?.is_none());
    assert_eq!(node.store.len(), 1);
    Ok(())
}

/// A forged chunk in an on-disk transfer leaves neither a file nor a part
/// file behind.
#[test]
fn test_forged_chunk_leaves_no_file() -> Result<()> {
    let node = Node::new("forged-disk", 0)?;
    let body = payload(10_000, 3);
    let msg = message(&body, 1000, "files", "bin")?;
    let header = msg.header_builder().to_disk(true).build()?;

    let mut wire = Vec::new();
    header.write_typed(&mut wire)?;
    for packet in chunker::sequence_packets(&body[..], 1000)? {
        let packet = packet?;
        let packet = if packet.sequence_number() == 6 {
            BlockSequencePacket::new(6, vec![0u8; 1000])
        } else {
            packet
        };
        packet.write_typed(&mut wire)?;
    }

    let mut reader = SessionReader::new(wire.as_slice());
    let stream = reader.next_session()?.context("missing session")?;
    assert!(node.assembler.assemble(stream).is_err());
    assert!(node.store.is_empty());
    assert_eq!(std::fs::read_dir(node.cache_dir())?.count(), 0);
    Ok(())
}

/// One flipped bit in transit is caught by the frame checksum and the
/// transport is not trusted afterwards.
#[test]
fn test_flipped_bit_breaks_transport() -> Result<()> {
    let node = Node::new("flipped", 1 << 20)?;
    let body = payload(1500, 4);
    let msg = message(&body, 512, "chat", "")?;

    let mut wire = Vec::new();
    write_session(
        BlockDataStream::from_blob(&msg, body, &StoragePolicy::new(1 << 20), true)?,
        &mut wire,
    )?;
    // Land inside the first chunk's data, just past the header frame.
    let header_len = 1 + msg.header_builder().build()?.to_bytes()?.len();
    wire[header_len + 50] ^= 0x10;

    let mut reader = SessionReader::new(wire.as_slice());
    let stream = reader.next_session()?.context("missing session")?;
    let err = node.assembler.assemble(stream).unwrap_err();
    assert!(err.is_integrity());
    assert!(node.store.is_empty());
    assert!(matches!(reader.next_session(), Err(TransferError::StreamBroken)));
    Ok(())
}

/// The sending peer drops the connection mid-session.
#[test]
fn test_connection_dropped_mid_session() -> Result<()> {
    let node = Node::new("dropped", 1 << 20)?;
    let body = payload(8000, 5);
    let msg = message(&body, 1024, "chat", "")?;

    let mut full = Vec::new();
    write_session(
        BlockDataStream::from_blob(&msg, body, &StoragePolicy::new(1 << 20), true)?,
        &mut full,
    )?;

    let (mut sender, receiver) = socket_pair()?;
    let cut = full.len() / 2;
    let writer = thread::spawn(move || -> Result<()> {
        sender.write_all(&full[..cut])?;
        Ok(())
    });

    let mut reader = SessionReader::new(BufReader::new(receiver));
    let stream = reader.next_session()?.context("missing session")?;
    let completion = stream.completion();
    let err = node.assembler.assemble(stream).unwrap_err();
    writer.join().expect("writer panicked")?;

    assert!(matches!(
        err,
        TransferError::Packet(PacketError::Framing(_)) | TransferError::Truncated { .. }
    ));
    assert!(matches!(completion.state(), SessionState::Failed(_)));
    assert!(node.store.is_empty());
    Ok(())
}
