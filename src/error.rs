//! SecureVault - Error Types

use thiserror::Error;

/// Result type for vault operations
pub type VaultResult<T> = Result<T, VaultError>;

/// Vault error types
#[derive(Error, Debug)]
pub enum VaultError {
    /// Unknown operator, wrong password, or failed current-password check
    /// during rotation. Deliberately carries no detail: callers must not be
    /// able to distinguish "unknown name" from "wrong password".
    #[error("Authentication failed. Please check your credentials.")]
    BadCredentials,

    /// An operation that needs the session key was called before `unlock`.
    #[error("Vault is locked - no session key is set")]
    NotUnlocked,

    #[error("Insufficient space: {requested} bytes required, {available} available")]
    InsufficientSpace { requested: u64, available: u64 },

    /// Catalog row exists but the blob file is gone.
    #[error("Encrypted file is missing from the vault directory")]
    BlobMissing,

    /// Structural or padding error during decryption. Never says which.
    #[error("Decryption failed. Invalid credentials or corrupted file.")]
    DecryptFailed,

    #[error("Catalog operation failed: {0}")]
    StoreFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Password rotation aborted; carries the id of the first entry that
    /// could not be re-encrypted.
    #[error("Password change failed while re-encrypting entry {0}")]
    RotationFailed(i64),

    /// OS RNG or cipher primitive unavailable. Fatal.
    #[error("Cryptographic backend unavailable: {0}")]
    CryptoUnavailable(String),
}

impl VaultError {
    /// Render a message safe to show to the operator.
    ///
    /// Masks anything that looks like key material or a filesystem path so
    /// that surfaced errors never leak paths, SQL state, or secrets.
    pub fn user_message(&self) -> String {
        sanitize_message(&self.to_string())
    }

    /// Whether the error is transient from the caller's point of view.
    pub fn is_transient(&self) -> bool {
        matches!(self, VaultError::StoreFailed(_) | VaultError::Io(_))
    }
}

impl From<rusqlite::Error> for VaultError {
    fn from(e: rusqlite::Error) -> Self {
        VaultError::StoreFailed(e.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::StoreFailed(format!("serialization failed: {e}"))
    }
}

impl From<base64::DecodeError> for VaultError {
    fn from(e: base64::DecodeError) -> Self {
        VaultError::StoreFailed(format!("stored credential is not valid base64: {e}"))
    }
}

const SENSITIVE_WORDS: [&str; 4] = ["password", "key", "token", "secret"];

/// Mask sensitive words and path-like tokens in a message.
pub fn sanitize_message(message: &str) -> String {
    message
        .split_whitespace()
        .map(mask_token)
        .collect::<Vec<_>>()
        .join(" ")
}

fn mask_token(token: &str) -> &str {
    let lower = token.to_ascii_lowercase();
    if SENSITIVE_WORDS.iter().any(|w| lower.contains(w)) && !is_plain_word(&lower) {
        return "[REDACTED]";
    }
    if looks_like_path(token) {
        return "[PATH]";
    }
    token
}

/// The bare words themselves ("password", "key") are fine in prose;
/// masking kicks in for composites like "password=hunter2" or "key.bin".
fn is_plain_word(lower: &str) -> bool {
    SENSITIVE_WORDS.contains(&lower.trim_end_matches(['.', ',', ':', ';']))
}

fn looks_like_path(token: &str) -> bool {
    token.contains('/') || token.contains('\\')
}
