//! Identity generation.

use anyhow::{Context, Result};

use scatter_core::{crypto, Identity, KeyStore};
use scatter_services::FileKeyStore;

pub fn cmd_identity(name: &str, keystore: &str) -> Result<()> {
    let store = FileKeyStore::open(keystore);
    let identity = Identity::generate(name, &store).context("failed to generate identity")?;
    let fingerprint = identity.fingerprint();

    // The stored secret must decode back.
    store
        .secret_key(&fingerprint)
        .with_context(|| format!("key store at {} did not keep the secret", keystore))?;

    println!("═══════════════════════════════════════");
    println!("  Identity: {}", identity.name());
    println!("═══════════════════════════════════════");
    println!("  Fingerprint : {}", fingerprint);
    println!("  Public key  : {}", crypto::base64_encode(identity.public_key()));
    println!(
        "  Signature   : {}",
        if identity.verify_ed25519(identity.public_key()) { "valid" } else { "INVALID" }
    );
    println!("  Key store   : {}", store.path().display());

    Ok(())
}
