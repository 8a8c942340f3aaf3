//! On-disk file storage for received and user files.
//!
//! Received files are content-addressed:
//!   {cache_dir}/{hex(content_key)}.{extension}
//!
//! Writers never touch the final path until the content is verified. Bytes
//! go to a private part file beside it, and the part file is linked into
//! place only if nothing is there yet. An existing file is never replaced,
//! and a part file that is not committed is removed when it is dropped.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;
use parking_lot::Mutex;

use scatter_core::{BlockHeaderPacket, ChunkHash};

static PART_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Cache and user file directories, plus per-content locks.
#[derive(Clone)]
pub struct FileStore {
    cache_dir: PathBuf,
    user_dir: PathBuf,
    locks: Arc<DashMap<ChunkHash, Arc<Mutex<()>>>>,
}

impl FileStore {
    /// Open a store, creating both directories if needed.
    pub fn new(cache_dir: impl Into<PathBuf>, user_dir: impl Into<PathBuf>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        let user_dir = user_dir.into();
        for dir in [&cache_dir, &user_dir] {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create directory: {}", dir.display()))?;
        }
        Ok(Self {
            cache_dir,
            user_dir,
            locks: Arc::new(DashMap::new()),
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn user_dir(&self) -> &Path {
        &self.user_dir
    }

    /// Final location of a received message's file.
    pub fn path_for(&self, header: &BlockHeaderPacket) -> PathBuf {
        self.cache_dir.join(header.autogen_filename())
    }

    /// Run `f` while holding the lock for one content key. Holders of other
    /// keys are not blocked.
    pub fn with_key_lock<T>(&self, key: &ChunkHash, f: impl FnOnce() -> T) -> T {
        let lock = self.locks.entry(*key).or_default().clone();
        let result = {
            let _guard = lock.lock();
            f()
        };
        drop(lock);
        self.locks.remove_if(key, |_, l| Arc::strong_count(l) == 1);
        result
    }

    /// Open a fresh part file that will become `target` on commit.
    pub fn create_part(&self, target: &Path) -> Result<PartFile> {
        let name = target
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("message");
        let id = PART_COUNTER.fetch_add(1, Ordering::Relaxed);
        let part = target.with_file_name(format!(".{}.{}-{}.part", name, std::process::id(), id));
        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&part)
            .with_context(|| format!("failed to create part file: {}", part.display()))?;
        tracing::trace!(path = %part.display(), "part file opened");
        Ok(PartFile {
            part,
            target: target.to_path_buf(),
            writer: Some(BufWriter::new(file)),
            written: 0,
        })
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    pub fn file_size(&self, path: &Path) -> Result<u64> {
        let meta =
            fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
        Ok(meta.len())
    }

    pub fn open(&self, path: &Path) -> Result<File> {
        File::open(path).with_context(|| format!("failed to open {}", path.display()))
    }

    pub fn delete(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).with_context(|| format!("failed to delete {}", path.display()))?;
        tracing::debug!(path = %path.display(), "file deleted");
        Ok(())
    }

    /// Copy a local file into the user directory under `name`. Fails if a
    /// file with that name already exists.
    pub fn insert_file(&self, source: &Path, name: &str) -> Result<PathBuf> {
        let file_name = Path::new(name)
            .file_name()
            .with_context(|| format!("not a usable file name: {name:?}"))?;
        let dest = self.user_dir.join(file_name);
        let mut out = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&dest)
            .with_context(|| format!("failed to create {}", dest.display()))?;
        let mut input = self.open(source)?;
        io::copy(&mut input, &mut out)
            .with_context(|| format!("failed to copy into {}", dest.display()))?;
        out.sync_all().context("failed to sync inserted file")?;
        tracing::info!(path = %dest.display(), "file inserted");
        Ok(dest)
    }
}

/// Outcome of committing a part file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commit {
    /// The part file now lives at the target path.
    Written,
    /// Something already occupied the target; the part file was discarded.
    AlreadyPresent,
}

/// Append-only file that becomes visible at its target path only on
/// `commit`. Dropped without committing, it deletes itself.
pub struct PartFile {
    part: PathBuf,
    target: PathBuf,
    writer: Option<BufWriter<File>>,
    written: u64,
}

impl PartFile {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flush, sync, and link into place without replacing anything.
    pub fn commit(mut self) -> Result<Commit> {
        if let Some(writer) = self.writer.take() {
            let file = writer
                .into_inner()
                .map_err(|e| e.into_error())
                .context("failed to flush part file")?;
            file.sync_all().context("failed to sync part file")?;
        }
        let outcome = match fs::hard_link(&self.part, &self.target) {
            Ok(()) => Commit::Written,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Commit::AlreadyPresent,
            Err(e) => {
                return Err(e).with_context(|| {
                    format!(
                        "failed to link {} to {}",
                        self.part.display(),
                        self.target.display()
                    )
                })
            }
        };
        tracing::debug!(
            path = %self.target.display(),
            bytes = self.written,
            ?outcome,
            "part file committed"
        );
        Ok(outcome)
    }
}

impl Write for PartFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "part file already committed"))?;
        let n = writer.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        drop(self.writer.take());
        if let Err(e) = fs::remove_file(&self.part) {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::warn!(path = %self.part.display(), error = %e, "failed to remove part file");
            }
        }
    }
}
