//! Content-addressed artifact storage.
//!
//! Artifacts are named after the SHA-256 of their bytes, so writing the same
//! document twice yields the same file and an existing file is never
//! overwritten. Bytes go to a private temp file first and are published under
//! the final name with a hard link, so a visible artifact is always complete.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use log::debug;
use sha2::{Digest, Sha256};

use crate::{Error, OutputFormat, Result, ServiceConfig};

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Where an artifact ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredArtifact {
    pub path: PathBuf,
    /// Stable retrieval URL handed back to the caller
    pub url: String,
    pub size: u64,
}

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
    public_base_url: String,
}

impl ArtifactStore {
    pub fn new(dir: impl Into<PathBuf>, public_base_url: impl Into<String>) -> Self {
        Self { dir: dir.into(), public_base_url: public_base_url.into() }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(config.output_dir.clone(), config.public_base_url.clone())
    }

    /// `<first 16 hex chars of sha256>.<ext>`
    pub fn file_name(bytes: &[u8], format: OutputFormat) -> String {
        let digest = hex::encode(Sha256::digest(bytes));
        format!("{}.{}", &digest[..16], format.extension())
    }

    pub fn write(&self, bytes: &[u8], format: OutputFormat) -> Result<StoredArtifact> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            Error::StorageWriteFailure(format!("cannot create {}: {}", self.dir.display(), e))
        })?;

        let name = Self::file_name(bytes, format);
        let path = self.dir.join(&name);
        if path.exists() {
            debug!("artifact {} already stored", path.display());
        } else {
            let temp = self.dir.join(format!(
                ".{}.{}-{}.tmp",
                name,
                std::process::id(),
                TEMP_SEQ.fetch_add(1, Ordering::Relaxed)
            ));
            let published = write_synced(&temp, bytes).and_then(|_| match fs::hard_link(&temp, &path) {
                Err(e) if e.kind() == IoErrorKind::AlreadyExists => Ok(false),
                other => other.map(|_| true),
            });
            let _ = fs::remove_file(&temp);
            match published {
                Ok(true) => debug!("wrote artifact {} ({} bytes)", path.display(), bytes.len()),
                Ok(false) => debug!("artifact {} stored concurrently", path.display()),
                Err(e) => {
                    return Err(Error::StorageWriteFailure(format!("cannot write {}: {}", path.display(), e)));
                }
            }
        }

        let url = format!("{}/{}", self.public_base_url.trim_end_matches('/'), name);
        Ok(StoredArtifact { path, url, size: bytes.len() as u64 })
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut f = OpenOptions::new().write(true).create_new(true).open(path)?;
    f.write_all(bytes)?;
    f.sync_all()
}
