//! Scatter integration test harness.
//!
//! Scenarios here wire a sending side and a receiving side together over a
//! loopback TCP connection, so every byte goes through the real framing,
//! session reader, and assembler:
//!
//!   cargo test --test integration
//!
//! Each test gets its own temp directory and its own socket pair.

use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;

use scatter_core::BlockHeaderPacket;
use scatter_services::{
    chunker, Assembled, Assembler, Datastore, FileStore, MemoryDatastore, MessageBody,
    SessionReader, StoragePolicy, StoredMessage,
};

mod batch;
mod concurrency;
mod failures;
mod peers;

// ── Harness ───────────────────────────────────────────────────────────────────

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// Fresh per-test directory under the system temp dir.
pub fn temp_dir(tag: &str) -> PathBuf {
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!(
        "scatter-it-{}-{}-{}",
        tag,
        std::process::id(),
        id
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// A connected loopback socket pair: (sender, receiver).
pub fn socket_pair() -> Result<(TcpStream, TcpStream)> {
    let listener = TcpListener::bind("127.0.0.1:0").context("failed to bind loopback")?;
    let addr = listener.local_addr()?;
    let sender = TcpStream::connect(addr).context("failed to connect loopback")?;
    let (receiver, _) = listener.accept().context("failed to accept loopback")?;
    Ok((sender, receiver))
}

/// Deterministic payload bytes.
pub fn payload(len: usize, seed: u8) -> Bytes {
    Bytes::from(
        (0..len)
            .map(|i| (i as u8).wrapping_mul(13).wrapping_add(seed))
            .collect::<Vec<u8>>(),
    )
}

/// A stored message describing `body`, ready to send.
pub fn message(
    body: &[u8],
    block_size: u32,
    app: &str,
    ext: &str,
) -> Result<StoredMessage> {
    let hashes = chunker::hash_source(body, block_size)?;
    let header = BlockHeaderPacket::builder()
        .application(app)
        .block_size(block_size)
        .extension(ext)
        .hash_list(hashes)
        .build()?;
    Ok(StoredMessage::from_header(
        &header,
        MessageBody::Inline(Bytes::copy_from_slice(body)),
    ))
}

/// Receiving node: a datastore, a file store, and an assembler over them.
pub struct Node {
    pub dir: PathBuf,
    pub store: MemoryDatastore,
    pub assembler: Assembler,
}

impl Node {
    pub fn new(tag: &str, inline_threshold: u64) -> Result<Self> {
        let dir = temp_dir(tag);
        let store = MemoryDatastore::new();
        let files = FileStore::new(dir.join("cache"), dir.join("files"))?;
        let assembler = Assembler::new(
            Arc::new(store.clone()),
            files,
            StoragePolicy::new(inline_threshold),
        );
        Ok(Self {
            dir,
            store,
            assembler,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        self.assembler.files().cache_dir()
    }

    /// Assemble every session on `reader` until the batch ends.
    pub fn receive_batch<R: std::io::Read + Send>(
        &self,
        reader: &mut SessionReader<R>,
    ) -> Result<Vec<Assembled>> {
        let mut outcomes = Vec::new();
        while let Some(stream) = reader.next_session()? {
            outcomes.push(self.assembler.assemble(stream)?);
        }
        Ok(outcomes)
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}
