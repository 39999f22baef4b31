//! SecureVault - Password Hashing and Key Derivation
//!
//! Two independent derivations share the same stored salt: the login
//! verifier is a salted SHA-256 digest, the session key comes from
//! PBKDF2-HMAC-SHA-256. Changing the password regenerates the salt and
//! recomputes both.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::{Digest, Sha256};

use crate::error::{VaultError, VaultResult};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// Salt length in raw bytes (stored Base64-encoded)
pub const SALT_LEN: usize = 32;

/// PBKDF2 iteration count. Fixed: existing vaults were written with it.
pub const PBKDF2_ROUNDS: u32 = 10_000;

/// The 256-bit symmetric key for an unlocked session.
///
/// Owned exclusively by the vault service; the buffer is zeroized when the
/// key is dropped (on `lock()` or process end).
pub struct SessionKey {
    inner: Secret<[u8; KEY_LEN]>,
}

impl SessionKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }
}

/// Generate a fresh 32-byte salt, Base64-encoded.
pub fn generate_salt() -> VaultResult<String> {
    let mut salt = [0u8; SALT_LEN];
    OsRng
        .try_fill_bytes(&mut salt)
        .map_err(|e| VaultError::CryptoUnavailable(e.to_string()))?;
    Ok(STANDARD.encode(salt))
}

/// Hash a password with its salt: Base64(SHA-256(salt-bytes || utf8(password))).
///
/// This is the stored login verifier, not the encryption key.
pub fn hash_password(password: &str, salt: &str) -> VaultResult<String> {
    let salt_bytes = STANDARD.decode(salt)?;
    let mut digest = Sha256::new();
    digest.update(&salt_bytes);
    digest.update(password.as_bytes());
    Ok(STANDARD.encode(digest.finalize()))
}

/// Recompute the verifier and compare in constant time.
pub fn verify_password(password: &str, hash: &str, salt: &str) -> VaultResult<bool> {
    let computed = hash_password(password, salt)?;
    Ok(ct_eq(computed.as_bytes(), hash.as_bytes()))
}

/// Derive the 256-bit session key: PBKDF2-HMAC-SHA-256, 10,000 rounds.
pub fn derive_key(password: &str, salt: &str) -> VaultResult<SessionKey> {
    let salt_bytes = STANDARD.decode(salt)?;
    let mut okm = [0u8; KEY_LEN];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), &salt_bytes, PBKDF2_ROUNDS, &mut okm);
    Ok(SessionKey::new(okm))
}

/// Constant-time byte comparison.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
