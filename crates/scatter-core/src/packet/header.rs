//! BlockHeaderPacket: metadata and chunking plan for one message.

use serde::{Deserialize, Serialize};

use super::{
    check_fingerprint, fingerprint_from_wire, fingerprint_to_wire, PacketError, PolicyError,
    WirePacket, MAX_BLOCK_SIZE,
};
use crate::crypto::{self, ChunkHash};
use crate::wire::PacketType;

/// Mime type used when the sender does not name one.
pub const DEFAULT_MIME: &str = "application/octet-stream";

/// Describes one message: who it is for, how it was chunked, and the hash
/// of every chunk that follows it.
///
/// `hash_list.len()` is the number of `BlockSequencePacket`s in the session.
/// An end-of-stream header carries no payload and only marks the end of a
/// batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeaderPacket {
    to_fingerprint: Option<String>,
    from_fingerprint: Option<String>,
    application: String,
    signature: Option<Vec<u8>>,
    session_id: i32,
    block_size: u32,
    mime: String,
    extension: String,
    user_filename: Option<String>,
    to_disk: bool,
    end_of_stream: bool,
    hash_list: Vec<ChunkHash>,
}

#[derive(Serialize, Deserialize)]
pub struct WireHeader {
    to_fingerprint: Vec<u8>,
    from_fingerprint: Vec<u8>,
    application: String,
    signature: Vec<u8>,
    session_id: i32,
    block_size: u32,
    mime: String,
    extension: String,
    user_filename: Option<String>,
    to_disk: bool,
    end_of_stream: bool,
    hash_list: Vec<ChunkHash>,
}

impl BlockHeaderPacket {
    pub fn builder() -> BlockHeaderBuilder {
        BlockHeaderBuilder::default()
    }

    /// Terminal marker for a batch of sessions.
    pub fn end_of_stream() -> Self {
        Self {
            to_fingerprint: None,
            from_fingerprint: None,
            application: String::new(),
            signature: None,
            session_id: 0,
            block_size: 0,
            mime: DEFAULT_MIME.to_string(),
            extension: String::new(),
            user_filename: None,
            to_disk: false,
            end_of_stream: true,
            hash_list: Vec::new(),
        }
    }

    pub fn to_fingerprint(&self) -> Option<&str> {
        self.to_fingerprint.as_deref()
    }

    pub fn from_fingerprint(&self) -> Option<&str> {
        self.from_fingerprint.as_deref()
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    pub fn session_id(&self) -> i32 {
        self.session_id
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn mime(&self) -> &str {
        &self.mime
    }

    /// Sanitized extension, without a leading dot.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn user_filename(&self) -> Option<&str> {
        self.user_filename.as_deref()
    }

    pub fn to_disk(&self) -> bool {
        self.to_disk
    }

    pub fn is_end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    pub fn hash_list(&self) -> &[ChunkHash] {
        &self.hash_list
    }

    /// Expected hash of chunk `sequence_number`, if it is in range.
    pub fn hash(&self, sequence_number: u32) -> Option<&ChunkHash> {
        self.hash_list.get(sequence_number as usize)
    }

    /// Number of chunks in the session.
    pub fn chunk_count(&self) -> usize {
        self.hash_list.len()
    }

    /// Dedup key for the message content.
    pub fn content_key(&self) -> ChunkHash {
        crypto::global_hash(&self.hash_list)
    }

    /// Content-addressed storage name: hex content key plus extension.
    /// Empty for end-of-stream headers.
    pub fn autogen_filename(&self) -> String {
        if self.end_of_stream {
            return String::new();
        }
        let key = hex::encode(self.content_key());
        if self.extension.is_empty() {
            key
        } else {
            format!("{}.{}", key, self.extension)
        }
    }

    /// Name shown to the user: the sender's filename if given, else the
    /// autogenerated one.
    pub fn filename(&self) -> String {
        match &self.user_filename {
            Some(name) => name.clone(),
            None => self.autogen_filename(),
        }
    }

    /// Canonical payload covered by the header signature.
    ///
    ///   from || to || application || extension || mime || filename
    ///        || to_disk byte || hash_0 || … || hash_n
    ///
    /// Fingerprints appear in their wire form.
    pub fn signed_payload(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&fingerprint_to_wire(self.from_fingerprint()));
        out.extend_from_slice(&fingerprint_to_wire(self.to_fingerprint()));
        out.extend_from_slice(self.application.as_bytes());
        out.extend_from_slice(self.extension.as_bytes());
        out.extend_from_slice(self.mime.as_bytes());
        out.extend_from_slice(self.filename().as_bytes());
        out.push(self.to_disk as u8);
        for h in &self.hash_list {
            out.extend_from_slice(h);
        }
        out
    }

    /// Sign the header as its sender. Requires a sender fingerprint.
    pub fn sign_ed25519(&mut self, secret_key: &[u8]) -> Result<(), PacketError> {
        if self.from_fingerprint.is_none() {
            return Err(PolicyError::SignatureWithoutSender.into());
        }
        let sig = crypto::sign(secret_key, &self.signed_payload())?;
        self.signature = Some(sig.to_vec());
        Ok(())
    }

    /// Check the header signature. False when unsigned or invalid.
    pub fn verify_ed25519(&self, public_key: &[u8]) -> bool {
        match &self.signature {
            Some(sig) => crypto::verify(public_key, &self.signed_payload(), sig),
            None => false,
        }
    }

    fn validate(&self) -> Result<(), PolicyError> {
        if self.end_of_stream {
            return Ok(());
        }
        if self.block_size == 0 {
            return Err(PolicyError::MissingBlockSize);
        }
        if self.block_size > MAX_BLOCK_SIZE {
            return Err(PolicyError::BlockSizeTooLarge(self.block_size));
        }
        if self.application.is_empty() {
            return Err(PolicyError::MissingApplication);
        }
        if self.signature.is_some() && self.from_fingerprint.is_none() {
            return Err(PolicyError::SignatureWithoutSender);
        }
        Ok(())
    }
}

impl WirePacket for BlockHeaderPacket {
    const TYPE: PacketType = PacketType::BlockHeader;
    type Wire = WireHeader;

    fn to_wire(&self) -> WireHeader {
        WireHeader {
            to_fingerprint: fingerprint_to_wire(self.to_fingerprint()),
            from_fingerprint: fingerprint_to_wire(self.from_fingerprint()),
            application: self.application.clone(),
            signature: self.signature.clone().unwrap_or_default(),
            session_id: self.session_id,
            block_size: self.block_size,
            mime: self.mime.clone(),
            extension: self.extension.clone(),
            user_filename: self.user_filename.clone(),
            to_disk: self.to_disk,
            end_of_stream: self.end_of_stream,
            hash_list: self.hash_list.clone(),
        }
    }

    fn from_wire(wire: WireHeader) -> Result<Self, PacketError> {
        let header = Self {
            to_fingerprint: fingerprint_from_wire(wire.to_fingerprint)?,
            from_fingerprint: fingerprint_from_wire(wire.from_fingerprint)?,
            application: wire.application,
            signature: (!wire.signature.is_empty()).then_some(wire.signature),
            session_id: wire.session_id,
            block_size: wire.block_size,
            mime: if wire.mime.is_empty() {
                DEFAULT_MIME.to_string()
            } else {
                wire.mime
            },
            extension: sanitize_extension(&wire.extension),
            user_filename: wire.user_filename,
            to_disk: wire.to_disk,
            end_of_stream: wire.end_of_stream,
            hash_list: wire.hash_list,
        };
        header.validate()?;
        Ok(header)
    }
}

/// Reduce an extension to a safe single path component.
/// Keeps ASCII alphanumerics, `-`, `_` and inner dots.
pub fn sanitize_extension(ext: &str) -> String {
    let kept: String = ext
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    kept.trim_matches('.').to_string()
}

// ── Builder ───────────────────────────────────────────────────────────────────

/// Validated construction of a `BlockHeaderPacket`.
#[derive(Debug, Clone, Default)]
pub struct BlockHeaderBuilder {
    to_fingerprint: Option<String>,
    from_fingerprint: Option<String>,
    application: Option<String>,
    signature: Option<Vec<u8>>,
    session_id: i32,
    block_size: Option<u32>,
    mime: Option<String>,
    extension: Option<String>,
    user_filename: Option<String>,
    to_disk: bool,
    end_of_stream: bool,
    hash_list: Vec<ChunkHash>,
}

impl BlockHeaderBuilder {
    pub fn to_fingerprint(mut self, fp: impl Into<String>) -> Self {
        self.to_fingerprint = Some(fp.into());
        self
    }

    pub fn from_fingerprint(mut self, fp: impl Into<String>) -> Self {
        self.from_fingerprint = Some(fp.into());
        self
    }

    pub fn application(mut self, app: impl Into<String>) -> Self {
        self.application = Some(app.into());
        self
    }

    pub fn signature(mut self, sig: impl Into<Vec<u8>>) -> Self {
        self.signature = Some(sig.into());
        self
    }

    pub fn session_id(mut self, id: i32) -> Self {
        self.session_id = id;
        self
    }

    pub fn block_size(mut self, size: u32) -> Self {
        self.block_size = Some(size);
        self
    }

    pub fn mime(mut self, mime: impl Into<String>) -> Self {
        self.mime = Some(mime.into());
        self
    }

    pub fn extension(mut self, ext: impl Into<String>) -> Self {
        self.extension = Some(ext.into());
        self
    }

    pub fn user_filename(mut self, name: impl Into<String>) -> Self {
        self.user_filename = Some(name.into());
        self
    }

    pub fn to_disk(mut self, to_disk: bool) -> Self {
        self.to_disk = to_disk;
        self
    }

    pub fn end_of_stream(mut self, end: bool) -> Self {
        self.end_of_stream = end;
        self
    }

    pub fn hash_list(mut self, hashes: Vec<ChunkHash>) -> Self {
        self.hash_list = hashes;
        self
    }

    pub fn build(self) -> Result<BlockHeaderPacket, PolicyError> {
        for fp in [&self.to_fingerprint, &self.from_fingerprint]
            .into_iter()
            .flatten()
        {
            check_fingerprint(fp)?;
        }
        if self.signature.is_some() && self.from_fingerprint.is_none() {
            return Err(PolicyError::SignatureWithoutSender);
        }

        let header = BlockHeaderPacket {
            to_fingerprint: self.to_fingerprint,
            from_fingerprint: self.from_fingerprint,
            application: self.application.unwrap_or_default(),
            signature: self.signature,
            session_id: self.session_id,
            block_size: self.block_size.unwrap_or(0),
            mime: self.mime.unwrap_or_else(|| DEFAULT_MIME.to_string()),
            extension: self
                .extension
                .as_deref()
                .map(sanitize_extension)
                .unwrap_or_default(),
            user_filename: self.user_filename,
            to_disk: self.to_disk,
            end_of_stream: self.end_of_stream,
            hash_list: self.hash_list,
        };
        header.validate()?;
        Ok(header)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
