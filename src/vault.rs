//! SecureVault - Vault Service
//!
//! Binds the crypto primitives, the catalog, and the blob store behind one
//! handle. The service exclusively owns the derived session key while the
//! vault is unlocked; callers thread the `Vault` value through their program
//! instead of reaching for globals.
//!
//! Calls are serialized at the contract level: one operation completes
//! before the next begins. Embedders running operations on background
//! workers should wrap the service in a single mutex.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Serialize;
use zeroize::Zeroize;

use crate::blobs::BlobStore;
use crate::catalog::Catalog;
use crate::crypto::{self, SessionKey};
use crate::error::{VaultError, VaultResult};
use crate::models::{extension_tag, now, split_name, FileEntry, NewFileEntry, Operator};
use crate::rotation::RotationEngine;

/// Encryption + metadata overhead factor for space estimates
const OVERHEAD_FACTOR: f64 = 1.2;

/// Flat per-file metadata allowance in bytes
const METADATA_BYTES: u64 = 1024;

/// Minimum free-space buffer beyond current usage
const MIN_FREE_BUFFER: u64 = 100 * 1024 * 1024;

/// Recommended headroom multiplier over current usage
const RECOMMENDED_FACTOR: f64 = 1.5;

/// Aggregate counts over the catalog.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct VaultStats {
    pub file_count: usize,
    pub total_original_bytes: u64,
}

/// Disk-space posture of the vault directory.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SpaceStatus {
    pub free_bytes: u64,
    pub total_bytes: u64,
    /// Fraction of the filesystem in use, 0.0 when unknown
    pub usage_fraction: f64,
    /// free >= current usage x 1.2 + 100 MiB
    pub has_min: bool,
    /// free >= 1.5 x (current usage x 1.2)
    pub has_recommended: bool,
}

/// The credential-bound storage engine for one vault.
pub struct Vault {
    catalog: Catalog,
    blobs: BlobStore,
    key: RwLock<Option<SessionKey>>,
}

impl Vault {
    /// Open the vault rooted at `root`: catalog at `root/vault.db`, blobs
    /// under `root/files`. Creates and seeds both on first use.
    pub fn open_at<P: AsRef<Path>>(root: P) -> VaultResult<Self> {
        let root = root.as_ref();
        let catalog = Catalog::open(root.join("vault.db"))?;
        catalog.initialize()?;
        let blobs = BlobStore::open(root.join("files"))?;

        Ok(Self {
            catalog,
            blobs,
            key: RwLock::new(None),
        })
    }

    /// Open the vault at the default location, `<user-home>/.securevault`.
    pub fn open_default() -> VaultResult<Self> {
        let files_root = BlobStore::default_root()?;
        let root = files_root
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or(files_root);
        Self::open_at(root)
    }

    // ───────────────────────────────────────────────────────────────────
    // SESSION
    // ───────────────────────────────────────────────────────────────────

    /// Verify operator credentials against the catalog.
    pub fn authenticate(&self, username: &str, password: &str) -> VaultResult<Operator> {
        self.catalog
            .authenticate(username, password)?
            .ok_or(VaultError::BadCredentials)
    }

    /// Derive and hold the session key. No verification happens here; call
    /// [`authenticate`](Self::authenticate) first.
    pub fn unlock(&self, password: &str, salt: &str) -> VaultResult<()> {
        let key = crypto::derive_key(password, salt)?;
        *self.key.write() = Some(key);
        Ok(())
    }

    /// Discard the session key; the buffer is zeroized on drop.
    pub fn lock(&self) {
        *self.key.write() = None;
    }

    pub fn is_unlocked(&self) -> bool {
        self.key.read().is_some()
    }

    // ───────────────────────────────────────────────────────────────────
    // FILE OPERATIONS
    // ───────────────────────────────────────────────────────────────────

    /// Encrypt and store a file, recording it in the catalog.
    ///
    /// The catalog row is inserted only after the blob write succeeds, so an
    /// observer seeing the row can assume the blob existed at commit time.
    pub fn add(&self, source: &Path, description: &str, tags: &str) -> VaultResult<FileEntry> {
        self.ensure_unlocked()?;

        let meta = fs::metadata(source)?;
        if !meta.is_file() {
            return Err(VaultError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "source is not a regular file",
            )));
        }
        let size = meta.len();

        if let Some(free) = self.blobs.free_bytes() {
            let required = estimated_space(size);
            if free < required {
                return Err(VaultError::InsufficientSpace {
                    requested: required,
                    available: free,
                });
            }
        }

        let mut plaintext = fs::read(source)?;
        let blob = {
            let guard = self.key.read();
            let key = guard.as_ref().ok_or(VaultError::NotUnlocked)?;
            crypto::encrypt(&plaintext, key)?
        };
        plaintext.zeroize();
        let blob_path = self.blobs.write(&blob)?;

        let original_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let entry = NewFileEntry {
            file_type: extension_tag(&original_name),
            original_name,
            blob_path,
            file_size: size,
            date_added: now(),
            description: description.to_string(),
            tags: tags.to_string(),
        };
        let id = self.catalog.insert_file_entry(&entry)?;

        log::info!("stored entry {id} ({} bytes)", entry.file_size);
        Ok(FileEntry {
            id,
            original_name: entry.original_name,
            blob_path: entry.blob_path,
            file_type: entry.file_type,
            file_size: entry.file_size,
            date_added: entry.date_added,
            description: entry.description,
            tags: entry.tags,
        })
    }

    /// Decrypt a stored entry into `output_dir` under its original name,
    /// suffixing `_1`, `_2`, ... before the extension until the path is
    /// unique. Decryption failure is terminal: no alternate keys are tried
    /// and nothing is written.
    pub fn retrieve(&self, entry: &FileEntry, output_dir: &Path) -> VaultResult<PathBuf> {
        self.ensure_unlocked()?;

        let blob = self.blobs.read(&entry.blob_path)?;
        let mut plaintext = {
            let guard = self.key.read();
            let key = guard.as_ref().ok_or(VaultError::NotUnlocked)?;
            crypto::decrypt(&blob, key)?
        };

        let output_path = unique_output_path(output_dir, &entry.original_name);
        let written = fs::write(&output_path, &plaintext);
        plaintext.zeroize();
        written?;
        Ok(output_path)
    }

    /// Delete an entry's blob and catalog row; true iff the row existed.
    /// A blob that is already gone does not block removal of the row.
    pub fn delete(&self, entry: &FileEntry) -> VaultResult<bool> {
        self.blobs.delete(&entry.blob_path)?;
        self.catalog.delete_file_entry(entry.id)
    }

    pub fn list(&self) -> VaultResult<Vec<FileEntry>> {
        self.catalog.list_files()
    }

    pub fn search(&self, term: &str) -> VaultResult<Vec<FileEntry>> {
        self.catalog.search_files(term)
    }

    /// Fetch one entry by catalog id.
    pub fn entry(&self, id: i64) -> VaultResult<Option<FileEntry>> {
        self.catalog.file_entry(id)
    }

    // ───────────────────────────────────────────────────────────────────
    // CREDENTIALS
    // ───────────────────────────────────────────────────────────────────

    /// Change the operator's password (and optionally name), re-encrypting
    /// every stored blob under the new key. On success the session key is
    /// replaced; on failure the vault still opens with the current password
    /// (see the rotation module for the mid-flight hazard).
    pub fn change_password(
        &self,
        operator: &Operator,
        current_password: &str,
        new_password: &str,
        new_name: Option<&str>,
    ) -> VaultResult<Operator> {
        let engine = RotationEngine::new(&self.catalog, &self.blobs);
        let outcome = engine.rotate(operator, current_password, new_password, new_name)?;

        // Old key dropped here, zeroized by SessionKey
        *self.key.write() = Some(outcome.new_key);
        Ok(outcome.operator)
    }

    // ───────────────────────────────────────────────────────────────────
    // ACCOUNTING
    // ───────────────────────────────────────────────────────────────────

    pub fn stats(&self) -> VaultResult<VaultStats> {
        let entries = self.catalog.list_files()?;
        Ok(VaultStats {
            file_count: entries.len(),
            total_original_bytes: entries.iter().map(|e| e.file_size).sum(),
        })
    }

    pub fn space_status(&self) -> VaultResult<SpaceStatus> {
        let stats = self.stats()?;
        let used = (stats.total_original_bytes as f64 * OVERHEAD_FACTOR) as u64;

        let Some(space) = self.blobs.space() else {
            return Ok(SpaceStatus {
                free_bytes: 0,
                total_bytes: 0,
                usage_fraction: 0.0,
                has_min: false,
                has_recommended: false,
            });
        };

        let usage_fraction = if space.total_bytes == 0 {
            0.0
        } else {
            (space.total_bytes - space.free_bytes) as f64 / space.total_bytes as f64
        };

        Ok(SpaceStatus {
            free_bytes: space.free_bytes,
            total_bytes: space.total_bytes,
            usage_fraction,
            has_min: space.free_bytes >= used + MIN_FREE_BUFFER,
            has_recommended: space.free_bytes as f64 >= RECOMMENDED_FACTOR * used as f64,
        })
    }

    /// Whether a file of `size` bytes fits under the space policy. Errs on
    /// the permissive side when the free-space probe is unavailable.
    pub fn can_store(&self, size: u64) -> bool {
        match self.blobs.free_bytes() {
            Some(free) => free >= estimated_space(size),
            None => true,
        }
    }

    fn ensure_unlocked(&self) -> VaultResult<()> {
        if self.key.read().is_some() {
            Ok(())
        } else {
            Err(VaultError::NotUnlocked)
        }
    }
}

/// Estimated on-disk cost of storing a file: ciphertext overhead plus a
/// flat metadata allowance.
fn estimated_space(size: u64) -> u64 {
    (size as f64 * OVERHEAD_FACTOR) as u64 + METADATA_BYTES
}

fn unique_output_path(output_dir: &Path, original_name: &str) -> PathBuf {
    let mut candidate = output_dir.join(original_name);
    let (stem, extension) = split_name(original_name);
    let mut counter = 1;
    while candidate.exists() {
        candidate = output_dir.join(format!("{stem}_{counter}{extension}"));
        counter += 1;
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn open_vault(root: &Path) -> Vault {
        Vault::open_at(root).unwrap()
    }

    fn unlock_as_admin(vault: &Vault, password: &str) -> Operator {
        let operator = vault.authenticate("admin", "admin123").unwrap();
        vault.unlock(password, &operator.salt).unwrap();
        operator
    }

    fn sample_bytes() -> Vec<u8> {
        (0u8..=255).cycle().take(1024).collect()
    }

    fn write_source(dir: &Path, name: &str, content: &[u8]) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_fresh_vault_authenticates_and_is_empty() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir.path().join("vault"));

        let operator = vault.authenticate("admin", "admin123").unwrap();
        assert_eq!(operator.username, "admin");
        assert!(vault.list().unwrap().is_empty());

        assert!(matches!(
            vault.authenticate("admin", "xxx"),
            Err(VaultError::BadCredentials)
        ));
    }

    #[test]
    fn test_add_then_retrieve_roundtrip() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir.path().join("vault"));
        unlock_as_admin(&vault, "admin123");

        let content = sample_bytes();
        let source = write_source(dir.path(), "sample.bin", &content);
        let entry = vault.add(&source, "test payload", "bin").unwrap();

        assert_eq!(entry.original_name, "sample.bin");
        assert_eq!(entry.file_type, "bin");
        assert_eq!(entry.file_size, 1024);
        // IV + padded ciphertext
        assert!(fs::metadata(&entry.blob_path).unwrap().len() >= 1040);

        let listed = vault.list().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].original_name, "sample.bin");

        let out_dir = dir.path().join("out");
        fs::create_dir_all(&out_dir).unwrap();
        let restored = vault.retrieve(&entry, &out_dir).unwrap();
        assert_eq!(fs::read(restored).unwrap(), content);
    }

    #[test]
    fn test_identical_adds_produce_distinct_blobs() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir.path().join("vault"));
        unlock_as_admin(&vault, "admin123");

        let source = write_source(dir.path(), "dup.txt", b"identical content");
        let first = vault.add(&source, "", "").unwrap();
        let second = vault.add(&source, "", "").unwrap();

        assert_ne!(first.blob_path, second.blob_path);
        assert_ne!(
            fs::read(&first.blob_path).unwrap(),
            fs::read(&second.blob_path).unwrap()
        );
    }

    #[test]
    fn test_wrong_session_key_fails_terminally() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir.path().join("vault"));
        let operator = unlock_as_admin(&vault, "admin123");

        let source = write_source(dir.path(), "secret.txt", &sample_bytes());
        let entry = vault.add(&source, "", "").unwrap();

        // Session keyed from the wrong password, same salt
        vault.unlock("xxx", &operator.salt).unwrap();

        let out_dir = dir.path().join("out");
        fs::create_dir_all(&out_dir).unwrap();
        assert!(matches!(
            vault.retrieve(&entry, &out_dir),
            Err(VaultError::DecryptFailed)
        ));
        // Nothing written on failure
        assert_eq!(fs::read_dir(&out_dir).unwrap().count(), 0);
    }

    #[test]
    fn test_locked_vault_refuses_file_operations() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir.path().join("vault"));

        let source = write_source(dir.path(), "f.txt", b"data");
        assert!(matches!(
            vault.add(&source, "", ""),
            Err(VaultError::NotUnlocked)
        ));

        unlock_as_admin(&vault, "admin123");
        let entry = vault.add(&source, "", "").unwrap();
        vault.lock();
        assert!(!vault.is_unlocked());
        assert!(matches!(
            vault.retrieve(&entry, dir.path()),
            Err(VaultError::NotUnlocked)
        ));
    }

    #[test]
    fn test_delete_middle_of_three() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir.path().join("vault"));
        unlock_as_admin(&vault, "admin123");

        let mut entries = Vec::new();
        for name in ["a.txt", "b.txt", "c.txt"] {
            let source = write_source(dir.path(), name, name.as_bytes());
            entries.push(vault.add(&source, "", "").unwrap());
        }

        assert!(vault.delete(&entries[1]).unwrap());
        assert!(!entries[1].blob_path.exists());

        let remaining: Vec<_> = vault
            .list()
            .unwrap()
            .into_iter()
            .map(|e| e.original_name)
            .collect();
        assert!(!remaining.contains(&"b.txt".to_string()));

        let out_dir = dir.path().join("out");
        fs::create_dir_all(&out_dir).unwrap();
        for entry in [&entries[0], &entries[2]] {
            let restored = vault.retrieve(entry, &out_dir).unwrap();
            assert_eq!(
                fs::read(restored).unwrap(),
                entry.original_name.as_bytes()
            );
        }
    }

    #[test]
    fn test_delete_tolerates_missing_blob() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir.path().join("vault"));
        unlock_as_admin(&vault, "admin123");

        let source = write_source(dir.path(), "gone.txt", b"bytes");
        let entry = vault.add(&source, "", "").unwrap();
        fs::remove_file(&entry.blob_path).unwrap();

        assert!(vault.delete(&entry).unwrap());
        assert!(vault.list().unwrap().is_empty());
    }

    #[test]
    fn test_retrieve_suffixes_name_collisions() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir.path().join("vault"));
        unlock_as_admin(&vault, "admin123");

        let source = write_source(dir.path(), "report.pdf", b"pdf bytes");
        let entry = vault.add(&source, "", "").unwrap();

        let out_dir = dir.path().join("out");
        fs::create_dir_all(&out_dir).unwrap();
        let first = vault.retrieve(&entry, &out_dir).unwrap();
        let second = vault.retrieve(&entry, &out_dir).unwrap();
        let third = vault.retrieve(&entry, &out_dir).unwrap();

        assert_eq!(first.file_name().unwrap(), "report.pdf");
        assert_eq!(second.file_name().unwrap(), "report_1.pdf");
        assert_eq!(third.file_name().unwrap(), "report_2.pdf");
    }

    #[test]
    fn test_stats_and_space_policy() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir.path().join("vault"));
        unlock_as_admin(&vault, "admin123");

        let source = write_source(dir.path(), "s.bin", &sample_bytes());
        vault.add(&source, "", "").unwrap();

        let stats = vault.stats().unwrap();
        assert_eq!(stats.file_count, 1);
        assert_eq!(stats.total_original_bytes, 1024);

        let status = vault.space_status().unwrap();
        assert!(status.usage_fraction >= 0.0 && status.usage_fraction <= 1.0);

        // can_store(n) == true must imply add() does not hit the space check
        if vault.can_store(1024) {
            let again = write_source(dir.path(), "s2.bin", &sample_bytes());
            assert!(!matches!(
                vault.add(&again, "", ""),
                Err(VaultError::InsufficientSpace { .. })
            ));
        }
    }

    #[test]
    fn test_search_passthrough() {
        let dir = tempdir().unwrap();
        let vault = open_vault(&dir.path().join("vault"));
        unlock_as_admin(&vault, "admin123");

        let source = write_source(dir.path(), "ledger.csv", b"1,2,3");
        vault.add(&source, "quarterly accounts", "finance").unwrap();

        assert_eq!(vault.search("LEDGER").unwrap().len(), 1);
        assert_eq!(vault.search("finance").unwrap().len(), 1);
        assert!(vault.search("missing").unwrap().is_empty());
    }
}
