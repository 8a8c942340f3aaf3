//! IdentityPacket: a self-certifying identity record.
//!
//! An identity is a name plus a map of named keys. The Ed25519 public key
//! always lives under `RESERVED_KEY`; the signature covers
//!
//!   name || for each key in lexicographic order: key || value
//!
//! Signing mutates the record, so concurrent writers go through
//! `SharedIdentity`, which holds one lock per identity.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{PacketError, PolicyError, WirePacket};
use crate::crypto::{self, KeyError, Keypair, PUBLIC_KEY_LEN};
use crate::keystore::KeyStore;
use crate::wire::PacketType;

/// Key name under which an identity's public key is stored.
pub const RESERVED_KEY: &str = "scatterbrain";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    name: String,
    keymap: BTreeMap<String, Vec<u8>>,
    signature: Option<Vec<u8>>,
}

/// A live identity or the sentinel ending a batch of identities.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityPacket {
    Live(Identity),
    End,
}

#[derive(Serialize, Deserialize)]
pub enum WireIdentity {
    Live {
        name: String,
        keys: BTreeMap<String, Vec<u8>>,
        signature: Vec<u8>,
    },
    End,
}

impl Identity {
    /// Unsigned identity for an existing public key.
    pub fn new(name: impl Into<String>, public_key: &[u8]) -> Result<Self, PacketError> {
        let name = name.into();
        if name.is_empty() {
            return Err(PolicyError::EmptyName.into());
        }
        if public_key.len() != PUBLIC_KEY_LEN {
            return Err(KeyError::PublicKeyLength(public_key.len()).into());
        }
        let mut keymap = BTreeMap::new();
        keymap.insert(RESERVED_KEY.to_string(), public_key.to_vec());
        Ok(Self {
            name,
            keymap,
            signature: None,
        })
    }

    /// Create a local identity with a fresh keypair. The secret key is
    /// stored base64-encoded under the identity fingerprint, and the
    /// identity is self-signed.
    pub fn generate(name: impl Into<String>, store: &dyn KeyStore) -> Result<Self, PacketError> {
        let keypair = Keypair::generate();
        let mut identity = Self::new(name, &keypair.public())?;
        let secret = keypair.secret_bytes();
        store.put(&keypair.fingerprint(), &crypto::base64_encode(&secret[..]))?;
        identity.sign_ed25519(&secret[..])?;
        tracing::debug!(
            name = %identity.name,
            fingerprint = %identity.fingerprint(),
            "generated identity"
        );
        Ok(identity)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn public_key(&self) -> &[u8] {
        self.keymap
            .get(RESERVED_KEY)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn fingerprint(&self) -> String {
        crypto::fingerprint(self.public_key())
    }

    pub fn keymap(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.keymap
    }

    pub fn get(&self, key: &str) -> Option<&[u8]> {
        self.keymap.get(key).map(Vec::as_slice)
    }

    /// Add or replace a named key. The reserved key is off limits.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>, PolicyError> {
        let key = key.into();
        if key == RESERVED_KEY {
            return Err(PolicyError::ReservedKey(key));
        }
        Ok(self.keymap.insert(key, value.into()))
    }

    pub fn remove(&mut self, key: &str) -> Result<Option<Vec<u8>>, PolicyError> {
        if key == RESERVED_KEY {
            return Err(PolicyError::ReservedKey(key.to_string()));
        }
        Ok(self.keymap.remove(key))
    }

    pub fn signature(&self) -> Option<&[u8]> {
        self.signature.as_deref()
    }

    pub fn signed_payload(&self) -> Vec<u8> {
        let mut out = self.name.as_bytes().to_vec();
        for (key, value) in &self.keymap {
            out.extend_from_slice(key.as_bytes());
            out.extend_from_slice(value);
        }
        out
    }

    pub fn sign_ed25519(&mut self, secret_key: &[u8]) -> Result<(), KeyError> {
        let sig = crypto::sign(secret_key, &self.signed_payload())?;
        self.signature = Some(sig.to_vec());
        Ok(())
    }

    /// False on a wrong-length key, a missing signature, or a bad signature.
    pub fn verify_ed25519(&self, public_key: &[u8]) -> bool {
        if public_key.len() != PUBLIC_KEY_LEN {
            return false;
        }
        match &self.signature {
            Some(sig) => crypto::verify(public_key, &self.signed_payload(), sig),
            None => false,
        }
    }
}

impl IdentityPacket {
    pub fn generate(name: impl Into<String>, store: &dyn KeyStore) -> Result<Self, PacketError> {
        Identity::generate(name, store).map(IdentityPacket::Live)
    }

    pub fn is_end(&self) -> bool {
        matches!(self, IdentityPacket::End)
    }

    pub fn identity(&self) -> Option<&Identity> {
        match self {
            IdentityPacket::Live(identity) => Some(identity),
            IdentityPacket::End => None,
        }
    }

    pub fn fingerprint(&self) -> Option<String> {
        self.identity().map(Identity::fingerprint)
    }

    /// Always false for the end sentinel.
    pub fn verify_ed25519(&self, public_key: &[u8]) -> bool {
        self.identity()
            .is_some_and(|identity| identity.verify_ed25519(public_key))
    }
}

impl WirePacket for IdentityPacket {
    const TYPE: PacketType = PacketType::Identity;
    type Wire = WireIdentity;

    fn to_wire(&self) -> WireIdentity {
        match self {
            IdentityPacket::Live(identity) => WireIdentity::Live {
                name: identity.name.clone(),
                keys: identity.keymap.clone(),
                signature: identity.signature.clone().unwrap_or_default(),
            },
            IdentityPacket::End => WireIdentity::End,
        }
    }

    fn from_wire(wire: WireIdentity) -> Result<Self, PacketError> {
        let (name, keys, signature) = match wire {
            WireIdentity::End => return Ok(IdentityPacket::End),
            WireIdentity::Live {
                name,
                keys,
                signature,
            } => (name, keys, signature),
        };
        if name.is_empty() {
            return Err(PolicyError::EmptyName.into());
        }
        let public_key = keys.get(RESERVED_KEY).ok_or(KeyError::MissingPublicKey)?;
        if public_key.len() != PUBLIC_KEY_LEN {
            return Err(KeyError::PublicKeyLength(public_key.len()).into());
        }
        Ok(IdentityPacket::Live(Identity {
            name,
            keymap: keys,
            signature: (!signature.is_empty()).then_some(signature),
        }))
    }
}

// ── Shared identity ───────────────────────────────────────────────────────────

/// An identity shared between threads. Every mutation and its re-signing
/// happen under one lock, so no reader sees a record whose signature does
/// not match its contents.
#[derive(Debug, Clone)]
pub struct SharedIdentity {
    inner: Arc<Mutex<Identity>>,
}

impl SharedIdentity {
    pub fn new(identity: Identity) -> Self {
        Self {
            inner: Arc::new(Mutex::new(identity)),
        }
    }

    /// Apply `mutate`, then re-sign with `secret_key`. If either step
    /// fails the identity is left unchanged.
    pub fn update<F>(&self, secret_key: &[u8], mutate: F) -> Result<(), PacketError>
    where
        F: FnOnce(&mut Identity) -> Result<(), PolicyError>,
    {
        let mut guard = self.inner.lock();
        let mut next = guard.clone();
        mutate(&mut next)?;
        next.sign_ed25519(secret_key)?;
        *guard = next;
        Ok(())
    }

    /// Re-sign in place.
    pub fn sign(&self, secret_key: &[u8]) -> Result<(), KeyError> {
        self.inner.lock().sign_ed25519(secret_key)
    }

    pub fn verify(&self, public_key: &[u8]) -> bool {
        self.inner.lock().verify_ed25519(public_key)
    }

    pub fn snapshot(&self) -> Identity {
        self.inner.lock().clone()
    }

    pub fn packet(&self) -> IdentityPacket {
        IdentityPacket::Live(self.snapshot())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
