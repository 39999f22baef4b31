//! SecureVault - Blob Store
//!
//! Owns the private directory of opaque ciphertext files. Writes are atomic
//! (temp file, fsync, rename) so a crash never leaves a half-written blob
//! at a catalog-visible path.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::crypto::generate_blob_name;
use crate::error::{VaultError, VaultResult};

/// Suffix for every stored blob
const BLOB_SUFFIX: &str = ".enc";

/// Free and total bytes of the filesystem holding the blob directory.
#[derive(Debug, Clone, Copy)]
pub struct FsSpace {
    pub free_bytes: u64,
    pub total_bytes: u64,
}

/// Scoped creation, read, and deletion of ciphertext blobs.
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open the store rooted at `root`, creating it (and parents) as needed.
    pub fn open<P: AsRef<Path>>(root: P) -> VaultResult<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Default blob directory: `<user-home>/.securevault/files`.
    pub fn default_root() -> VaultResult<PathBuf> {
        let home = dirs::home_dir().ok_or_else(|| {
            VaultError::StoreFailed("cannot determine the user home directory".into())
        })?;
        Ok(home.join(".securevault").join("files"))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write ciphertext under a fresh opaque name and return its path.
    pub fn write(&self, data: &[u8]) -> VaultResult<PathBuf> {
        let name = format!("{}{}", generate_blob_name()?, BLOB_SUFFIX);
        let path = self.root.join(name);
        self.write_atomic(&path, data)?;
        Ok(path)
    }

    /// Rewrite an existing blob in place: sibling temp, fsync, rename over.
    /// Used by rotation so each blob flips from old key to new key atomically.
    pub fn rewrite(&self, path: &Path, data: &[u8]) -> VaultResult<()> {
        self.write_atomic(path, data)
    }

    fn write_atomic(&self, path: &Path, data: &[u8]) -> VaultResult<()> {
        let temp_path = path.with_extension("tmp");

        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)?;
        file.write_all(data)?;
        file.sync_all()?;

        fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Read a blob. A missing file is `BlobMissing`, not an IO error.
    pub fn read(&self, path: &Path) -> VaultResult<Vec<u8>> {
        match fs::read(path) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(VaultError::BlobMissing),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a blob. Idempotent: a missing file is success.
    pub fn delete(&self, path: &Path) -> VaultResult<()> {
        match fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    /// Current free bytes on the filesystem containing the blob directory,
    /// or `None` when the platform probe fails (callers then skip the
    /// space-policy check rather than refuse all writes).
    pub fn free_bytes(&self) -> Option<u64> {
        match fs2::available_space(&self.root) {
            Ok(free) => Some(free),
            Err(e) => {
                log::warn!("free-space probe failed: {e}");
                None
            }
        }
    }

    /// Free and total bytes of the containing filesystem.
    pub fn space(&self) -> Option<FsSpace> {
        let free_bytes = fs2::available_space(&self.root).ok()?;
        let total_bytes = fs2::total_space(&self.root).ok()?;
        Some(FsSpace {
            free_bytes,
            total_bytes,
        })
    }
}
