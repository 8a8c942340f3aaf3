use std::io::{BufReader, BufWriter};
use std::thread;

use crate::*;
use scatter_services::{write_session, BlockDataStream, SessionState};

/// Three messages of different sizes in one batch: small ones stay inline,
/// the large one lands on disk at its content-addressed path.
#[test]
fn test_batch_over_socket() -> Result<()> {
    let node = Node::new("batch", 1024)?;
    let (sender, receiver) = socket_pair()?;

    let bodies = vec![payload(10, 1), payload(900, 2), payload(50_000, 3)];
    let messages = bodies
        .iter()
        .map(|b| message(b, 256, "chat", "bin"))
        .collect::<Result<Vec<_>>>()?;

    let to_send = bodies.clone();
    let outgoing = messages.clone();
    let writer = thread::spawn(move || -> Result<usize> {
        let policy = StoragePolicy::new(1024);
        let mut out = BufWriter::new(sender);
        let mut chunks = 0;
        let last = outgoing.len() - 1;
        for (i, (msg, body)) in outgoing.iter().zip(to_send).enumerate() {
            let stream = BlockDataStream::from_blob(msg, body, &policy, i == last)?;
            chunks += write_session(stream, &mut out)?;
        }
        Ok(chunks)
    });

    let mut reader = SessionReader::new(BufReader::new(receiver));
    let outcomes = node.receive_batch(&mut reader)?;
    let sent_chunks = writer.join().expect("writer thread panicked")?;

    assert_eq!(sent_chunks, 1 + 4 + 196);
    assert_eq!(outcomes.len(), 3);
    assert_eq!(outcomes[0], Assembled::Inline(bodies[0].clone()));
    assert_eq!(outcomes[1], Assembled::Inline(bodies[1].clone()));
    match &outcomes[2] {
        Assembled::File(path) => {
            assert!(path.starts_with(node.cache_dir()));
            assert_eq!(std::fs::read(path)?, bodies[2].to_vec());
        }
        other => panic!("expected a file, got {other:?}"),
    }

    assert_eq!(node.store.len(), 3);
    for m in &messages {
        assert!(node.store.exists_by_hash(&m.content_key)?);
    }
    Ok(())
}

/// 1000 bytes at a 128-byte block size: eight chunks, the last one short.
#[test]
fn test_thousand_bytes_at_128() -> Result<()> {
    let body = payload(1000, 7);
    let msg = message(&body, 128, "files", "dat")?;
    assert_eq!(msg.hash_list.len(), 8);

    let stream = BlockDataStream::from_blob(&msg, body.clone(), &StoragePolicy::new(4096), true)?;
    assert_eq!(stream.header().chunk_count(), 8);
    assert!(!stream.to_disk());

    let packets = stream
        .packets()
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let seqs: Vec<u32> = packets.iter().map(|p| p.sequence_number()).collect();
    assert_eq!(seqs, (0..8).collect::<Vec<u32>>());
    let sizes: Vec<usize> = packets.iter().map(|p| p.bytes().len()).collect();
    assert_eq!(sizes, vec![128, 128, 128, 128, 128, 128, 128, 104]);
    Ok(())
}

/// A file source is read lazily on the sending side and stored on disk on
/// the receiving side.
#[test]
fn test_file_source_round_trip() -> Result<()> {
    let node = Node::new("file-src", 64)?;
    let src_dir = temp_dir("file-src-origin");
    std::fs::create_dir_all(&src_dir)?;
    let src = src_dir.join("photo.jpg");
    let body = payload(20_000, 9);
    std::fs::write(&src, &body)?;

    let hashes = chunker::hash_file(&src, 4096)?;
    let header = BlockHeaderPacket::builder()
        .application("gallery")
        .block_size(4096)
        .mime("image/jpeg")
        .extension("jpg")
        .user_filename("photo.jpg")
        .hash_list(hashes)
        .build()?;
    let msg = StoredMessage::from_header(&header, MessageBody::File(src.clone()));

    let (sender, receiver) = socket_pair()?;
    let writer = thread::spawn(move || -> Result<usize> {
        let stream = BlockDataStream::from_file(&msg, &src, &StoragePolicy::new(64), true)?;
        Ok(write_session(stream, &mut BufWriter::new(sender))?)
    });

    let mut reader = SessionReader::new(BufReader::new(receiver));
    let outcomes = node.receive_batch(&mut reader)?;
    assert_eq!(writer.join().expect("writer thread panicked")?, 5);

    let expected = node.cache_dir().join(header.autogen_filename());
    assert_eq!(outcomes, vec![Assembled::File(expected.clone())]);
    assert_eq!(std::fs::read(&expected)?, body.to_vec());

    let stored = node.store.get_by_hash(&header.content_key())?.context("not stored")?;
    assert_eq!(stored.mime, "image/jpeg");
    assert_eq!(stored.user_filename.as_deref(), Some("photo.jpg"));

    let _ = std::fs::remove_dir_all(&src_dir);
    Ok(())
}

/// The sender judged the message small enough to keep inline, but it is
/// larger than what the receiver keeps in memory, so it lands on disk.
#[test]
fn test_inline_message_over_receiver_limit() -> Result<()> {
    let node = Node::new("spill", 1024)?;
    let body = payload(6000, 11);
    let msg = message(&body, 512, "chat", "txt")?;

    let (sender, receiver) = socket_pair()?;
    let outgoing = body.clone();
    let writer = thread::spawn(move || -> Result<()> {
        let stream = BlockDataStream::from_blob(&msg, outgoing, &StoragePolicy::new(1 << 20), true)?;
        assert!(!stream.to_disk());
        write_session(stream, &mut BufWriter::new(sender))?;
        Ok(())
    });

    let mut reader = SessionReader::new(BufReader::new(receiver));
    let outcomes = node.receive_batch(&mut reader)?;
    writer.join().expect("writer thread panicked")?;

    match outcomes.as_slice() {
        [Assembled::File(path)] => assert_eq!(std::fs::read(path)?, body.to_vec()),
        other => panic!("expected one file, got {other:?}"),
    }
    assert_eq!(node.store.len(), 1);
    Ok(())
}

/// Both ends expose completion without touching the chunk data.
#[tokio::test]
async fn test_completion_signals() -> Result<()> {
    let node = Node::new("completion", 1 << 20)?;
    let body = payload(3000, 4);
    let msg = message(&body, 512, "chat", "")?;

    let outbound = BlockDataStream::from_blob(&msg, body.clone(), &StoragePolicy::new(1 << 20), true)?;
    let sent = outbound.completion();
    assert_eq!(sent.state(), SessionState::Open);

    let mut wire = Vec::new();
    let wire = tokio::task::spawn_blocking(move || -> Result<Vec<u8>> {
        write_session(outbound, &mut wire)?;
        Ok(wire)
    })
    .await??;
    assert_eq!(sent.wait().await, SessionState::Completed);

    let mut reader = SessionReader::new(wire.as_slice());
    let inbound = reader.next_session()?.context("no session on the wire")?;
    let received = inbound.completion();
    let waiter = tokio::spawn(async move { received.wait().await });

    assert_eq!(node.assembler.assemble(inbound)?, Assembled::Inline(body));
    assert_eq!(waiter.await?, SessionState::Completed);
    assert!(reader.next_session()?.is_none());
    Ok(())
}
