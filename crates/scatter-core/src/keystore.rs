//! Secure key storage interface.
//!
//! Private keys of local identities are kept outside the packet model, keyed
//! by fingerprint and stored base64-encoded. The platform decides where they
//! live; this crate only ships an in-memory store for tests and embedding.

use std::collections::HashMap;

use parking_lot::RwLock;
use zeroize::Zeroizing;

use crate::crypto::KeyError;

/// Storage for identity secret keys.
pub trait KeyStore: Send + Sync {
    /// Store a base64-encoded secret key under an identity fingerprint.
    fn put(&self, fingerprint: &str, base64_secret: &str) -> Result<(), KeyError>;

    /// Fetch the base64-encoded secret for a fingerprint, if any.
    fn get(&self, fingerprint: &str) -> Result<Option<Zeroizing<String>>, KeyError>;

    /// Fetch and decode a secret key, failing if none is stored.
    fn secret_key(&self, fingerprint: &str) -> Result<Zeroizing<Vec<u8>>, KeyError> {
        let encoded = self
            .get(fingerprint)?
            .ok_or_else(|| KeyError::MissingPrivateKey(fingerprint.to_string()))?;
        Ok(Zeroizing::new(crate::crypto::base64_decode(&encoded)?))
    }
}

/// Process-local key store.
#[derive(Default)]
pub struct MemoryKeyStore {
    keys: RwLock<HashMap<String, Zeroizing<String>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.read().is_empty()
    }
}

impl KeyStore for MemoryKeyStore {
    fn put(&self, fingerprint: &str, base64_secret: &str) -> Result<(), KeyError> {
        self.keys.write().insert(
            fingerprint.to_string(),
            Zeroizing::new(base64_secret.to_string()),
        );
        Ok(())
    }

    fn get(&self, fingerprint: &str) -> Result<Option<Zeroizing<String>>, KeyError> {
        Ok(self.keys.read().get(fingerprint).cloned())
    }
}
