//! SecureVault - File Envelope Encryption
//!
//! AES-256-CBC with PKCS#7 padding. Blob layout is bit-exact for
//! compatibility with existing vaults: bytes 0..15 are the IV, the rest is
//! ciphertext. No header, no MAC, no version byte.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use rand::rngs::OsRng;
use rand::RngCore;

use super::keys::SessionKey;
use crate::error::{VaultError, VaultResult};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// IV length prepended to every blob
pub const IV_LEN: usize = 16;

/// AES block length; the ciphertext part is always a multiple of this
const BLOCK_LEN: usize = 16;

/// Raw bytes in a random blob filename (before Base64)
const BLOB_NAME_LEN: usize = 16;

/// Encrypt plaintext under the session key, emitting `IV || ciphertext`.
///
/// A fresh IV is drawn from the OS RNG per call, so encrypting identical
/// plaintext twice yields distinct blobs.
pub fn encrypt(plaintext: &[u8], key: &SessionKey) -> VaultResult<Vec<u8>> {
    let mut iv = [0u8; IV_LEN];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| VaultError::CryptoUnavailable(e.to_string()))?;

    let cipher = Aes256CbcEnc::new(key.expose().into(), (&iv).into());
    let ciphertext = cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
    blob.extend_from_slice(&iv);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a blob produced by [`encrypt`].
///
/// Any structural problem - too short, ciphertext not block-aligned, bad
/// padding - collapses to `DecryptFailed` without saying which. There is no
/// fallback to alternate keys; failure is terminal.
pub fn decrypt(blob: &[u8], key: &SessionKey) -> VaultResult<Vec<u8>> {
    if blob.len() < IV_LEN + BLOCK_LEN || (blob.len() - IV_LEN) % BLOCK_LEN != 0 {
        return Err(VaultError::DecryptFailed);
    }

    let (iv, ciphertext) = blob.split_at(IV_LEN);
    let cipher = Aes256CbcDec::new(key.expose().into(), GenericArray::from_slice(iv));

    cipher
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| VaultError::DecryptFailed)
}

/// Generate an opaque blob filename: 16 random bytes, URL-safe Base64,
/// unrelated to the original name.
pub fn generate_blob_name() -> VaultResult<String> {
    let mut bytes = [0u8; BLOB_NAME_LEN];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| VaultError::CryptoUnavailable(e.to_string()))?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}
