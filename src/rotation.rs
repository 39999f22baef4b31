//! SecureVault - Key Rotation (Password Change)
//!
//! Re-derives the session key from the new password and re-encrypts every
//! stored blob, then commits verifier + salt (+ optional name) in a single
//! catalog transaction. Until that commit the verifier still matches the
//! old password, so an aborted rotation leaves a vault the operator can
//! still open with the current password.
//!
//! States: *untouched* (all blobs under the old key) -> *in flight* (some
//! blobs rewritten, verifier unchanged) -> *committed*. The in-flight
//! window is the hazard: each blob flips atomically via rename, but a crash
//! mid-loop leaves a split vault with no journal to finish the job. That
//! degradation is accepted for a single-operator local tool; the first
//! failing entry aborts the loop and is reported to the caller.

use zeroize::Zeroize;

use crate::blobs::BlobStore;
use crate::catalog::Catalog;
use crate::crypto::{self, SessionKey};
use crate::error::{VaultError, VaultResult};
use crate::models::{FileEntry, Operator};

/// Result of a completed rotation.
pub struct RotationOutcome {
    /// Operator record as committed (new verifier, salt, possibly name)
    pub operator: Operator,
    /// Key for the continuing session; replaces the old one
    pub new_key: SessionKey,
    /// Number of blobs rewritten
    pub reencrypted: usize,
}

/// Orchestrates the password-change protocol over catalog + blob store.
pub struct RotationEngine<'a> {
    catalog: &'a Catalog,
    blobs: &'a BlobStore,
}

impl<'a> RotationEngine<'a> {
    pub fn new(catalog: &'a Catalog, blobs: &'a BlobStore) -> Self {
        Self { catalog, blobs }
    }

    /// Run the full protocol. Fails with `BadCredentials` before touching
    /// anything if the current password does not verify, and with
    /// `RotationFailed(entry_id)` if any blob cannot be re-encrypted.
    pub fn rotate(
        &self,
        operator: &Operator,
        current_password: &str,
        new_password: &str,
        new_name: Option<&str>,
    ) -> VaultResult<RotationOutcome> {
        if !crypto::verify_password(current_password, &operator.password_hash, &operator.salt)? {
            return Err(VaultError::BadCredentials);
        }

        // A name conflict after the blobs are rewritten would strand the
        // vault in the in-flight state, so check before starting.
        let name_change = new_name.filter(|n| *n != operator.username);
        if let Some(name) = name_change {
            if self.catalog.username_taken(name, operator.id)? {
                return Err(VaultError::StoreFailed(
                    "requested operator name is already in use".into(),
                ));
            }
        }

        let new_salt = crypto::generate_salt()?;
        let old_key = crypto::derive_key(current_password, &operator.salt)?;
        let new_key = crypto::derive_key(new_password, &new_salt)?;

        let entries = self.catalog.list_files()?;
        log::info!(
            "re-encrypting {} entries for operator {}",
            entries.len(),
            operator.id
        );

        let mut reencrypted = 0;
        for entry in &entries {
            if let Err(e) = self.reencrypt_blob(entry, &old_key, &new_key) {
                log::error!("rotation aborted at entry {}: {e}", entry.id);
                return Err(VaultError::RotationFailed(entry.id));
            }
            reencrypted += 1;
        }

        let new_verifier = crypto::hash_password(new_password, &new_salt)?;
        let committed =
            self.catalog
                .update_operator(operator.id, name_change, &new_verifier, &new_salt)?;
        if !committed {
            // Blobs already carry the new key; surface loudly rather than
            // pretend the old credentials still open them.
            return Err(VaultError::StoreFailed(
                "credential commit failed after re-encryption".into(),
            ));
        }

        let operator = Operator {
            username: name_change.unwrap_or(&operator.username).to_string(),
            password_hash: new_verifier,
            salt: new_salt,
            ..operator.clone()
        };

        // old_key is dropped (and zeroized) on return
        Ok(RotationOutcome {
            operator,
            new_key,
            reencrypted,
        })
    }

    /// Flip one blob from the old key to the new key with a fresh IV,
    /// writing to a sibling temp path and renaming over the original.
    fn reencrypt_blob(
        &self,
        entry: &FileEntry,
        old_key: &SessionKey,
        new_key: &SessionKey,
    ) -> VaultResult<()> {
        let blob = self.blobs.read(&entry.blob_path)?;
        let mut plaintext = crypto::decrypt(&blob, old_key)?;
        let reencrypted = crypto::encrypt(&plaintext, new_key);
        plaintext.zeroize();
        self.blobs.rewrite(&entry.blob_path, &reencrypted?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::Vault;
    use std::fs;
    use std::path::{Path, PathBuf};
    use tempfile::tempdir;

    fn seeded_vault(root: &Path) -> (Vault, Operator) {
        let vault = Vault::open_at(root).unwrap();
        let operator = vault.authenticate("admin", "admin123").unwrap();
        vault.unlock("admin123", &operator.salt).unwrap();
        (vault, operator)
    }

    fn add_file(vault: &Vault, dir: &Path, name: &str, content: &[u8]) -> crate::models::FileEntry {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        vault.add(&path, "", "").unwrap()
    }

    fn retrieve_bytes(vault: &Vault, entry: &crate::models::FileEntry, dir: &Path) -> Vec<u8> {
        let out = dir.join("out");
        fs::create_dir_all(&out).unwrap();
        let restored: PathBuf = vault.retrieve(entry, &out).unwrap();
        let bytes = fs::read(&restored).unwrap();
        fs::remove_file(&restored).unwrap();
        bytes
    }

    #[test]
    fn test_password_change_reencrypts_everything() {
        let dir = tempdir().unwrap();
        let (vault, operator) = seeded_vault(&dir.path().join("vault"));

        let first = add_file(&vault, dir.path(), "one.txt", b"first file");
        let second = add_file(&vault, dir.path(), "two.txt", b"second file");
        let old_blob = fs::read(&first.blob_path).unwrap();

        let updated = vault
            .change_password(&operator, "admin123", "N3w-pass!", None)
            .unwrap();
        assert_ne!(updated.salt, operator.salt);
        assert_ne!(updated.password_hash, operator.password_hash);

        // Old credentials are dead, new ones live
        assert!(vault.authenticate("admin", "admin123").is_err());
        vault.authenticate("admin", "N3w-pass!").unwrap();

        // Blobs rewritten in place under the new key
        assert_ne!(fs::read(&first.blob_path).unwrap(), old_blob);
        assert_eq!(retrieve_bytes(&vault, &first, dir.path()), b"first file");
        assert_eq!(retrieve_bytes(&vault, &second, dir.path()), b"second file");
    }

    #[test]
    fn test_new_session_from_scratch_after_rotation() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("vault");
        let entry;
        {
            let (vault, operator) = seeded_vault(&root);
            entry = add_file(&vault, dir.path(), "persist.bin", &[7u8; 300]);
            vault
                .change_password(&operator, "admin123", "N3w-pass!", None)
                .unwrap();
        }

        let vault = Vault::open_at(&root).unwrap();
        let operator = vault.authenticate("admin", "N3w-pass!").unwrap();
        vault.unlock("N3w-pass!", &operator.salt).unwrap();
        assert_eq!(retrieve_bytes(&vault, &entry, dir.path()), [7u8; 300]);
    }

    #[test]
    fn test_wrong_current_password_aborts_untouched() {
        let dir = tempdir().unwrap();
        let (vault, operator) = seeded_vault(&dir.path().join("vault"));
        let entry = add_file(&vault, dir.path(), "safe.txt", b"still mine");
        let blob_before = fs::read(&entry.blob_path).unwrap();

        assert!(matches!(
            vault.change_password(&operator, "xxx", "N3w-pass!", None),
            Err(VaultError::BadCredentials)
        ));

        // Nothing was rewritten and the old credentials still work
        assert_eq!(fs::read(&entry.blob_path).unwrap(), blob_before);
        vault.authenticate("admin", "admin123").unwrap();
        assert_eq!(retrieve_bytes(&vault, &entry, dir.path()), b"still mine");
    }

    #[test]
    fn test_rotation_reports_first_failing_entry() {
        let dir = tempdir().unwrap();
        let (vault, operator) = seeded_vault(&dir.path().join("vault"));
        let entry = add_file(&vault, dir.path(), "corrupt.bin", b"will be truncated");

        // Structurally invalid blob: rotation cannot decrypt it
        fs::write(&entry.blob_path, b"short").unwrap();

        assert!(matches!(
            vault.change_password(&operator, "admin123", "N3w-pass!", None),
            Err(VaultError::RotationFailed(id)) if id == entry.id
        ));

        // Verifier untouched: the current password still authenticates
        vault.authenticate("admin", "admin123").unwrap();
    }

    #[test]
    fn test_rotation_with_name_change() {
        let dir = tempdir().unwrap();
        let (vault, operator) = seeded_vault(&dir.path().join("vault"));
        let entry = add_file(&vault, dir.path(), "mine.txt", b"renamed owner");

        let updated = vault
            .change_password(&operator, "admin123", "N3w-pass!", Some("root"))
            .unwrap();
        assert_eq!(updated.username, "root");

        assert!(vault.authenticate("admin", "N3w-pass!").is_err());
        vault.authenticate("root", "N3w-pass!").unwrap();
        assert_eq!(retrieve_bytes(&vault, &entry, dir.path()), b"renamed owner");
    }

    #[test]
    fn test_empty_vault_rotation() {
        let dir = tempdir().unwrap();
        let (vault, operator) = seeded_vault(&dir.path().join("vault"));

        vault
            .change_password(&operator, "admin123", "N3w-pass!", None)
            .unwrap();
        vault.authenticate("admin", "N3w-pass!").unwrap();
    }
}
