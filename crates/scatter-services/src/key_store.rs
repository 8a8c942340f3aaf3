//! File-backed key store.
//!
//! Secrets live in one JSON object mapping fingerprint → base64 secret key.
//! Every write replaces the whole file atomically: tmp file → rename. On
//! unix the file is readable by the owner only.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::Context;
use parking_lot::Mutex;
use zeroize::Zeroizing;

use scatter_core::{KeyError, KeyStore};

pub struct FileKeyStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    lock: Mutex<()>,
}

impl FileKeyStore {
    /// Use `path` as the key file. It is created on first write.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fingerprints with a stored secret.
    pub fn fingerprints(&self) -> Result<Vec<String>, KeyError> {
        let _guard = self.lock.lock();
        let keys = read_keys(&self.path).map_err(store_error)?;
        Ok(keys.keys().cloned().collect())
    }
}

impl KeyStore for FileKeyStore {
    fn put(&self, fingerprint: &str, base64_secret: &str) -> Result<(), KeyError> {
        let _guard = self.lock.lock();
        let mut keys = read_keys(&self.path).map_err(store_error)?;
        keys.insert(fingerprint.to_string(), base64_secret.to_string());
        write_keys(&self.path, &keys).map_err(store_error)?;
        tracing::debug!(fingerprint, path = %self.path.display(), "secret key stored");
        Ok(())
    }

    fn get(&self, fingerprint: &str) -> Result<Option<Zeroizing<String>>, KeyError> {
        let _guard = self.lock.lock();
        let mut keys = read_keys(&self.path).map_err(store_error)?;
        Ok(keys.remove(fingerprint).map(Zeroizing::new))
    }
}

fn store_error(e: anyhow::Error) -> KeyError {
    KeyError::Store(format!("{e:#}"))
}

fn read_keys(path: &Path) -> anyhow::Result<BTreeMap<String, String>> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read key file: {}", path.display()))
        }
    };
    serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse key file: {}", path.display()))
}

fn write_keys(path: &Path, keys: &BTreeMap<String, String>) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create key dir: {}", parent.display()))?;
    }
    let json = Zeroizing::new(serde_json::to_vec_pretty(keys).context("failed to encode keys")?);

    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp_path)
            .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(fs::Permissions::from_mode(0o600))
                .context("failed to restrict key file permissions")?;
        }
        file.write_all(&json).context("failed to write keys")?;
        file.sync_all().context("failed to sync key file")?;
    }
    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "failed to rename {} to {}",
            tmp_path.display(),
            path.display()
        )
    })
}
