use std::io::{BufReader, BufWriter, Write};
use std::thread;

use crate::*;
use scatter_core::{
    DeclareHashesPacket, Identity, IdentityPacket, KeyStore, MemoryKeyStore, Packet, WirePacket,
    DEFAULT_DECLARE_CAP,
};
use scatter_services::{write_session, BlockDataStream, Datastore};

/// A message from `sender`, signed with the secret the key store holds for it.
fn signed_message(sender: &Identity, keys: &dyn KeyStore, body: &[u8]) -> Result<StoredMessage> {
    let mut header = BlockHeaderPacket::builder()
        .from_fingerprint(sender.fingerprint())
        .application("mail")
        .block_size(512)
        .hash_list(chunker::hash_source(body, 512)?)
        .build()?;
    header.sign_ed25519(&keys.secret_key(&sender.fingerprint())?)?;
    Ok(StoredMessage::from_header(
        &header,
        MessageBody::Inline(Bytes::copy_from_slice(body)),
    ))
}

/// Bob announces himself and what he already holds; Alice sends only what
/// he is missing, signed, and Bob checks the signature against her identity.
#[test]
fn test_declare_then_send_missing() -> Result<()> {
    let bob = Node::new("bob", 1 << 20)?;
    let alice_keys = MemoryKeyStore::new();
    let bob_keys = MemoryKeyStore::new();
    let alice = Identity::generate("alice", &alice_keys)?;
    let bob_id = IdentityPacket::generate("bob", &bob_keys)?;

    let bodies = [payload(1200, 1), payload(300, 2), payload(4000, 3)];
    let outbox = bodies
        .iter()
        .map(|b| signed_message(&alice, &alice_keys, b))
        .collect::<Result<Vec<_>>>()?;

    // Bob already received the first message some time ago.
    bob.store.persist(outbox[0].clone())?;

    // Bob → Alice: identity, then the content he holds.
    let mut hello = Vec::new();
    bob_id.write_typed(&mut hello)?;
    DeclareHashesPacket::from_known(bob.store.known_hashes()?, DEFAULT_DECLARE_CAP)
        .write_typed(&mut hello)?;

    let mut cursor = hello.as_slice();
    let peer_identity = match Packet::read_typed(&mut cursor)? {
        Packet::Identity(p) => p,
        other => panic!("expected identity, got {:?}", other.packet_type()),
    };
    let declared = match Packet::read_typed(&mut cursor)? {
        Packet::DeclareHashes(d) => d,
        other => panic!("expected declare-hashes, got {:?}", other.packet_type()),
    };
    let bob_public = peer_identity.identity().context("live identity")?.public_key().to_vec();
    assert!(peer_identity.verify_ed25519(&bob_public));

    let wanted: Vec<(StoredMessage, Bytes)> = outbox
        .iter()
        .zip(bodies.iter())
        .filter(|(m, _)| declared.wants(&m.content_key))
        .map(|(m, b)| (m.clone(), b.clone()))
        .collect();
    assert_eq!(wanted.len(), 2);

    // Alice → Bob: the missing messages as one batch.
    let (sender, receiver) = socket_pair()?;
    let writer = thread::spawn(move || -> Result<()> {
        let policy = StoragePolicy::new(1 << 20);
        let mut out = BufWriter::new(sender);
        let last = wanted.len() - 1;
        for (i, (msg, body)) in wanted.into_iter().enumerate() {
            write_session(BlockDataStream::from_blob(&msg, body, &policy, i == last)?, &mut out)?;
        }
        out.flush()?;
        Ok(())
    });

    let mut reader = SessionReader::new(BufReader::new(receiver));
    let mut received = Vec::new();
    while let Some(stream) = reader.next_session()? {
        assert!(stream.header().verify_ed25519(alice.public_key()));
        assert_eq!(stream.header().from_fingerprint(), Some(alice.fingerprint().as_str()));
        received.push(bob.assembler.assemble(stream)?);
    }
    writer.join().expect("writer panicked")?;

    assert_eq!(
        received,
        vec![
            Assembled::Inline(bodies[1].clone()),
            Assembled::Inline(bodies[2].clone()),
        ]
    );
    assert_eq!(bob.store.len(), 3);
    Ok(())
}

/// A peer that opts out is sent nothing, whatever hashes came with it.
#[test]
fn test_opt_out_wins() -> Result<()> {
    let keys = MemoryKeyStore::new();
    let alice = Identity::generate("alice", &keys)?;
    let msg = signed_message(&alice, &keys, &payload(100, 9))?;

    let declared = DeclareHashesPacket::opt_out();
    let bytes = declared.to_bytes()?;
    let (parsed, consumed) = DeclareHashesPacket::parse(&bytes)?;
    assert_eq!(consumed, bytes.len());
    assert!(parsed.is_opt_out());
    assert!(!parsed.wants(&msg.content_key));
    Ok(())
}

/// A peer with an empty store announces an opt-out rather than an empty list.
#[test]
fn test_empty_store_declares_opt_out() -> Result<()> {
    let fresh = Node::new("fresh", 1 << 20)?;
    let declared =
        DeclareHashesPacket::from_known(fresh.store.known_hashes()?, DEFAULT_DECLARE_CAP);

    let mut wire = Vec::new();
    declared.write_typed(&mut wire)?;
    match Packet::read_typed(&mut wire.as_slice())? {
        Packet::DeclareHashes(parsed) => assert!(parsed.is_opt_out()),
        other => panic!("expected declare-hashes, got {:?}", other.packet_type()),
    }
    Ok(())
}

/// Tampering with any signed header field breaks the sender's signature.
#[test]
fn test_rewritten_header_fails_verification() -> Result<()> {
    let keys = MemoryKeyStore::new();
    let alice = Identity::generate("alice", &keys)?;
    let msg = signed_message(&alice, &keys, &payload(700, 6))?;

    let original = msg.header_builder().build()?;
    assert!(original.verify_ed25519(alice.public_key()));

    let mut renamed = msg.clone();
    renamed.application = "spoofed".into();
    assert!(!renamed.header_builder().build()?.verify_ed25519(alice.public_key()));

    let rerouted = msg.header_builder().to_disk(true).build()?;
    assert!(!rerouted.verify_ed25519(alice.public_key()));
    Ok(())
}
