use std::io::{BufReader, BufWriter};
use std::thread;

use crate::*;
use scatter_core::crypto::Keypair;
use scatter_core::{Identity, SharedIdentity};
use scatter_services::{write_session, BlockDataStream};

fn send_one(sender: TcpStream, msg: StoredMessage, body: Bytes, policy: StoragePolicy) -> Result<()> {
    let stream = BlockDataStream::from_blob(&msg, body, &policy, true)?;
    write_session(stream, &mut BufWriter::new(sender))?;
    Ok(())
}

/// Several peers deliver the same content at once. Exactly one copy is
/// stored; the rest are verified and discarded.
#[test]
fn test_same_content_from_many_peers() -> Result<()> {
    let node = Node::new("same-content", 0)?;
    let body = payload(40_000, 5);
    let msg = message(&body, 1024, "files", "bin")?;
    let policy = StoragePolicy::new(0);

    let outcomes: Vec<Assembled> = thread::scope(|s| -> Result<Vec<Assembled>> {
        let mut receivers = Vec::new();
        for _ in 0..4 {
            let (sender, receiver) = socket_pair()?;
            let (msg, body) = (msg.clone(), body.clone());
            s.spawn(move || send_one(sender, msg, body, policy));
            let node = &node;
            receivers.push(s.spawn(move || -> Result<Vec<Assembled>> {
                let mut reader = SessionReader::new(BufReader::new(receiver));
                node.receive_batch(&mut reader)
            }));
        }
        let mut all = Vec::new();
        for handle in receivers {
            all.extend(handle.join().expect("receiver panicked")?);
        }
        Ok(all)
    })?;

    assert_eq!(outcomes.len(), 4);
    let files: Vec<_> = outcomes
        .iter()
        .filter(|o| matches!(o, Assembled::File(_)))
        .collect();
    assert_eq!(files.len(), 1);
    assert_eq!(
        outcomes.iter().filter(|o| **o == Assembled::Duplicate).count(),
        3
    );
    assert_eq!(node.store.len(), 1);

    // One committed file and no leftover part files.
    let entries: Vec<_> = std::fs::read_dir(node.cache_dir())?.collect::<std::io::Result<_>>()?;
    assert_eq!(entries.len(), 1);
    Ok(())
}

/// Unrelated sessions proceed in parallel and all land.
#[test]
fn test_independent_sessions_in_parallel() -> Result<()> {
    let node = Node::new("parallel", 2048)?;
    let policy = StoragePolicy::new(2048);

    thread::scope(|s| -> Result<()> {
        let mut handles = Vec::new();
        for seed in 0..6u8 {
            let (sender, receiver) = socket_pair()?;
            let body = payload(500 + usize::from(seed) * 700, seed);
            let msg = message(&body, 256, "chat", "txt")?;
            s.spawn(move || send_one(sender, msg, body, policy));
            let node = &node;
            handles.push(s.spawn(move || -> Result<Vec<Assembled>> {
                let mut reader = SessionReader::new(BufReader::new(receiver));
                node.receive_batch(&mut reader)
            }));
        }
        for handle in handles {
            let outcomes = handle.join().expect("receiver panicked")?;
            assert_eq!(outcomes.len(), 1);
            assert_ne!(outcomes[0], Assembled::Duplicate);
        }
        Ok(())
    })?;

    assert_eq!(node.store.len(), 6);
    Ok(())
}

/// Concurrent edits to one identity never leave it with a stale signature.
#[test]
fn test_shared_identity_updates_stay_signed() -> Result<()> {
    let keypair = Keypair::generate();
    let secret = keypair.secret_bytes();
    let public = keypair.public();
    let shared = SharedIdentity::new(Identity::new("relay", &public)?);
    shared.sign(&secret[..])?;

    thread::scope(|s| {
        for t in 0..8 {
            let shared = shared.clone();
            let secret = &secret;
            s.spawn(move || {
                for i in 0..10 {
                    shared
                        .update(&secret[..], |id| {
                            id.insert(format!("k-{t}-{i}"), vec![t as u8, i as u8])?;
                            Ok(())
                        })
                        .expect("update failed");
                    assert!(shared.verify(&public));
                }
            });
        }
    });

    let snapshot = shared.snapshot();
    assert_eq!(snapshot.keymap().len(), 1 + 8 * 10);
    assert!(snapshot.verify_ed25519(&public));
    Ok(())
}
