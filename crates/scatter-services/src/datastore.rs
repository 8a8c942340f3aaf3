//! Message persistence interface and an in-memory implementation.
//!
//! The relational store of a real node lives outside this crate. Transfers
//! only need existence checks, an insert that refuses duplicates, and a way
//! to list what is already held for declare-hashes.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use scatter_core::{BlockHeaderBuilder, BlockHeaderPacket, ChunkHash};

/// Where a message's payload lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageBody {
    Inline(Bytes),
    File(PathBuf),
}

/// A message as the datastore keeps it: header metadata plus its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub content_key: ChunkHash,
    pub to_fingerprint: Option<String>,
    pub from_fingerprint: Option<String>,
    pub application: String,
    pub signature: Option<Vec<u8>>,
    pub session_id: i32,
    pub block_size: u32,
    pub mime: String,
    pub extension: String,
    pub user_filename: Option<String>,
    pub hash_list: Vec<ChunkHash>,
    pub body: MessageBody,
}

impl StoredMessage {
    /// Record a received header with the body it assembled to.
    pub fn from_header(header: &BlockHeaderPacket, body: MessageBody) -> Self {
        Self {
            content_key: header.content_key(),
            to_fingerprint: header.to_fingerprint().map(str::to_string),
            from_fingerprint: header.from_fingerprint().map(str::to_string),
            application: header.application().to_string(),
            signature: header.signature().map(<[u8]>::to_vec),
            session_id: header.session_id(),
            block_size: header.block_size(),
            mime: header.mime().to_string(),
            extension: header.extension().to_string(),
            user_filename: header.user_filename().map(str::to_string),
            hash_list: header.hash_list().to_vec(),
            body,
        }
    }

    /// Header builder pre-filled from this message, for sending it on.
    pub fn header_builder(&self) -> BlockHeaderBuilder {
        let mut builder = BlockHeaderPacket::builder()
            .application(self.application.clone())
            .session_id(self.session_id)
            .block_size(self.block_size)
            .mime(self.mime.clone())
            .extension(self.extension.clone())
            .hash_list(self.hash_list.clone());
        if let Some(to) = &self.to_fingerprint {
            builder = builder.to_fingerprint(to.clone());
        }
        if let Some(from) = &self.from_fingerprint {
            builder = builder.from_fingerprint(from.clone());
        }
        if let Some(sig) = &self.signature {
            builder = builder.signature(sig.clone());
        }
        if let Some(name) = &self.user_filename {
            builder = builder.user_filename(name.clone());
        }
        builder
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.body {
            MessageBody::File(path) => Some(path),
            MessageBody::Inline(_) => None,
        }
    }
}

/// Message persistence, keyed by content key.
pub trait Datastore: Send + Sync {
    /// Number of stored messages whose body is the file at `path`.
    fn exists_by_path(&self, path: &Path) -> Result<usize>;

    fn exists_by_hash(&self, content_key: &ChunkHash) -> Result<bool>;

    /// Insert a message. Returns false, leaving the store untouched, when a
    /// message with the same content key is already present.
    fn persist(&self, message: StoredMessage) -> Result<bool>;

    fn get_by_hash(&self, content_key: &ChunkHash) -> Result<Option<StoredMessage>>;

    /// Content keys of every stored message.
    fn known_hashes(&self) -> Result<Vec<ChunkHash>>;
}

/// In-memory datastore.
#[derive(Clone, Default)]
pub struct MemoryDatastore {
    /// content key -> message
    messages: Arc<DashMap<ChunkHash, StoredMessage>>,
    /// file path -> content key
    paths: Arc<DashMap<PathBuf, ChunkHash>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl Datastore for MemoryDatastore {
    fn exists_by_path(&self, path: &Path) -> Result<usize> {
        Ok(usize::from(self.paths.contains_key(path)))
    }

    fn exists_by_hash(&self, content_key: &ChunkHash) -> Result<bool> {
        Ok(self.messages.contains_key(content_key))
    }

    fn persist(&self, message: StoredMessage) -> Result<bool> {
        match self.messages.entry(message.content_key) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                if let Some(path) = message.path() {
                    self.paths.insert(path.to_path_buf(), message.content_key);
                }
                tracing::debug!(
                    content_key = hex::encode(message.content_key),
                    application = %message.application,
                    "message persisted"
                );
                slot.insert(message);
                Ok(true)
            }
        }
    }

    fn get_by_hash(&self, content_key: &ChunkHash) -> Result<Option<StoredMessage>> {
        Ok(self.messages.get(content_key).map(|m| m.clone()))
    }

    fn known_hashes(&self) -> Result<Vec<ChunkHash>> {
        Ok(self.messages.iter().map(|m| *m.key()).collect())
    }
}
