//! Cryptographic primitives for Scatter.
//!
//! Provides two things:
//!   1. BLAKE3 hashing — chunk hashes, message content keys, fingerprints
//!   2. Ed25519 signatures — identity and header signing
//!
//! Secret key material is held in `Zeroizing` buffers and wiped on drop.
//! There is no unsafe code in this module.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use thiserror::Error;
use zeroize::Zeroizing;

// ── BLAKE3 ────────────────────────────────────────────────────────────────────

/// A 32-byte content hash. Used for chunk hashes and message content keys.
pub type ChunkHash = [u8; 32];

/// Length of a content hash in bytes.
pub const HASH_LEN: usize = 32;

/// Hash a byte slice, returning a 32-byte BLAKE3 digest.
pub fn hash(data: &[u8]) -> ChunkHash {
    *blake3::hash(data).as_bytes()
}

/// Incremental BLAKE3 hasher for payloads that arrive in pieces.
///
/// # Example
/// ```
/// use scatter_core::crypto::Hasher;
/// let mut h = Hasher::new();
/// h.update(b"hello ");
/// h.update(b"world");
/// let digest = h.finalize();
/// assert_eq!(digest, scatter_core::crypto::hash(b"hello world"));
/// ```
pub struct Hasher(blake3::Hasher);

impl Hasher {
    pub fn new() -> Self {
        Self(blake3::Hasher::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> ChunkHash {
        *self.0.finalize().as_bytes()
    }
}

impl Default for Hasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash one chunk, bound to its position in the sequence.
///
///   chunk_hash = BLAKE3(u32_be(sequence_number) || bytes)
///
/// A chunk moved to another position hashes differently, so reordered or
/// substituted chunks fail verification.
pub fn hash_chunk(sequence_number: u32, bytes: &[u8]) -> ChunkHash {
    let mut h = Hasher::new();
    h.update(&sequence_number.to_be_bytes());
    h.update(bytes);
    h.finalize()
}

/// Recompute a chunk hash and compare it with `expected` in constant time.
pub fn verify_chunk(sequence_number: u32, bytes: &[u8], expected: &ChunkHash) -> bool {
    hashes_equal(&hash_chunk(sequence_number, bytes), expected)
}

/// Constant-time comparison of two hashes.
pub fn hashes_equal(a: &ChunkHash, b: &ChunkHash) -> bool {
    // blake3::Hash implements PartialEq in constant time.
    blake3::Hash::from(*a) == blake3::Hash::from(*b)
}

/// Content key of a whole message: BLAKE3 over the concatenated hash list.
///
/// Identical content chunked at the same block size always maps to the same
/// key, which makes it the dedup key for storage.
pub fn global_hash(hash_list: &[ChunkHash]) -> ChunkHash {
    let mut h = Hasher::new();
    for chunk_hash in hash_list {
        h.update(chunk_hash);
    }
    h.finalize()
}

/// Stable identity handle: base64 of the BLAKE3 hash of a raw public key.
pub fn fingerprint(public_key: &[u8]) -> String {
    BASE64.encode(hash(public_key))
}

/// Base64 encoding used for fingerprints and stored secrets.
pub fn base64_encode(data: &[u8]) -> String {
    BASE64.encode(data)
}

pub fn base64_decode(data: &str) -> Result<Vec<u8>, KeyError> {
    BASE64.decode(data).map_err(|_| KeyError::Encoding)
}

// ── Ed25519 ───────────────────────────────────────────────────────────────────

/// Ed25519 public key length.
pub const PUBLIC_KEY_LEN: usize = 32;

/// Ed25519 seed length.
pub const SEED_LEN: usize = 32;

/// Ed25519 secret key length in `seed || public` form.
pub const SECRET_KEY_LEN: usize = 64;

/// Ed25519 detached signature length.
pub const SIGNATURE_LEN: usize = 64;

/// A long-term Ed25519 signing keypair for one identity.
///
/// The secret never leaves this struct except through `secret_bytes`,
/// which hands back a zeroizing copy for persistence.
pub struct Keypair {
    signing: SigningKey,
}

impl Keypair {
    /// Generate a new random keypair.
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Reconstruct a keypair from a 32-byte seed or a 64-byte `seed || public`
    /// secret key.
    pub fn from_secret(secret: &[u8]) -> Result<Self, KeyError> {
        Ok(Self {
            signing: signing_key(secret)?,
        })
    }

    pub fn public(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.signing.verifying_key().to_bytes()
    }

    /// Secret key in 64-byte `seed || public` form, for the key store.
    pub fn secret_bytes(&self) -> Zeroizing<[u8; SECRET_KEY_LEN]> {
        Zeroizing::new(self.signing.to_keypair_bytes())
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_LEN] {
        self.signing.sign(message).to_bytes()
    }
}

fn signing_key(secret: &[u8]) -> Result<SigningKey, KeyError> {
    match secret.len() {
        SEED_LEN => {
            let mut seed = Zeroizing::new([0u8; SEED_LEN]);
            seed.copy_from_slice(secret);
            Ok(SigningKey::from_bytes(&seed))
        }
        SECRET_KEY_LEN => {
            let mut bytes = Zeroizing::new([0u8; SECRET_KEY_LEN]);
            bytes.copy_from_slice(secret);
            SigningKey::from_keypair_bytes(&bytes).map_err(|_| KeyError::MalformedSecretKey)
        }
        other => Err(KeyError::SecretKeyLength(other)),
    }
}

/// Sign `message` with a 32-byte seed or 64-byte secret key.
pub fn sign(secret: &[u8], message: &[u8]) -> Result<[u8; SIGNATURE_LEN], KeyError> {
    Ok(signing_key(secret)?.sign(message).to_bytes())
}

/// Verify a detached signature. Any malformed input verifies as false.
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(key_bytes) = <[u8; PUBLIC_KEY_LEN]>::try_from(public_key) else {
        return false;
    };
    let Ok(key) = VerifyingKey::from_bytes(&key_bytes) else {
        return false;
    };
    let Ok(sig) = Signature::from_slice(signature) else {
        return false;
    };
    key.verify(message, &sig).is_ok()
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Key handling failures. Never silently defaulted.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("secret key must be {} or {} bytes, got {0}", SEED_LEN, SECRET_KEY_LEN)]
    SecretKeyLength(usize),

    #[error("secret key does not match its embedded public key")]
    MalformedSecretKey,

    #[error("public key must be {} bytes, got {0}", PUBLIC_KEY_LEN)]
    PublicKeyLength(usize),

    #[error("public key is not a valid ed25519 point")]
    MalformedPublicKey,

    #[error("identity has no public key under the reserved key name")]
    MissingPublicKey,

    #[error("no private key stored for {0}")]
    MissingPrivateKey(String),

    #[error("invalid base64 key encoding")]
    Encoding,

    #[error("key store failure: {0}")]
    Store(String),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
