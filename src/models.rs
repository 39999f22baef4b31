//! SecureVault - Catalog Data Model

use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::error::{VaultError, VaultResult};

/// Timestamps are ISO-8601 local-datetime text without a timezone. The
/// fixed 6-digit fraction keeps lexicographic and chronological order in
/// agreement for `ORDER BY` on the stored text.
const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// The sole credential holder of a vault.
///
/// The password itself is never stored: `password_hash` is the salted
/// SHA-256 verifier and `salt` feeds both the verifier and PBKDF2.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub id: i64,
    /// Display name, unique among active operators
    pub username: String,
    /// Base64(SHA-256(salt-bytes || utf8(password)))
    pub password_hash: String,
    /// Base64 of 32 random bytes; rewritten together with the verifier
    pub salt: String,
    pub created_at: NaiveDateTime,
    pub last_login: Option<NaiveDateTime>,
    pub is_active: bool,
}

/// Catalog row binding an original filename and metadata to one blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEntry {
    pub id: i64,
    /// Filename as supplied by the operator
    pub original_name: String,
    /// Absolute path of the ciphertext blob; opaque random name
    pub blob_path: PathBuf,
    /// Lowercased extension tag, may be empty
    pub file_type: String,
    /// Declared size of the original plaintext in bytes
    pub file_size: u64,
    pub date_added: NaiveDateTime,
    pub description: String,
    /// Free-text tag string
    pub tags: String,
}

/// A file entry before the catalog has assigned it an identity.
#[derive(Debug, Clone)]
pub struct NewFileEntry {
    pub original_name: String,
    pub blob_path: PathBuf,
    pub file_type: String,
    pub file_size: u64,
    pub date_added: NaiveDateTime,
    pub description: String,
    pub tags: String,
}

/// Current local time, truncated to the stored precision.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Accepts variable-width fractions (1 to 9
/// digits) and shorter ISO forms for rows written by earlier versions of
/// the vault.
pub fn parse_timestamp(text: &str) -> VaultResult<NaiveDateTime> {
    for format in [
        TIMESTAMP_FORMAT,
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
    ] {
        if let Ok(ts) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(ts);
        }
    }
    Err(VaultError::StoreFailed(format!(
        "unparseable catalog timestamp: {text}"
    )))
}

/// Lowercased extension of a filename, empty when there is none.
/// A leading dot (hidden files) does not count as an extension separator.
pub fn extension_tag(filename: &str) -> String {
    match filename.rfind('.') {
        Some(idx) if idx > 0 && idx < filename.len() - 1 => {
            filename[idx + 1..].to_lowercase()
        }
        _ => String::new(),
    }
}

/// Split a filename into (stem, extension-with-dot) for collision suffixing.
pub fn split_name(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(idx) if idx > 0 => (&filename[..idx], &filename[idx..]),
        _ => (filename, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_timestamp_roundtrip() {
        let ts = now();
        let text = format_timestamp(&ts);
        let parsed = parse_timestamp(&text).unwrap();
        // Precision below a microsecond is not stored
        assert_eq!(format_timestamp(&parsed), text);
    }

    #[test]
    fn test_parse_short_forms() {
        assert!(parse_timestamp("2025-01-01T10:00:00").is_ok());
        assert!(parse_timestamp("2025-01-01T10:00").is_ok());
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_parse_variable_precision_fractions() {
        // Existing catalogs hold fractions trimmed to 3, 6, or 9 digits
        let millis = parse_timestamp("2025-01-01T10:00:00.123").unwrap();
        assert_eq!(
            millis,
            NaiveDate::from_ymd_opt(2025, 1, 1)
                .unwrap()
                .and_hms_milli_opt(10, 0, 0, 123)
                .unwrap()
        );
        assert!(parse_timestamp("2025-01-01T10:00:00.123456").is_ok());
        assert!(parse_timestamp("2025-01-01T10:00:00.123456789").is_ok());
    }

    #[test]
    fn test_extension_tag() {
        assert_eq!(extension_tag("Report.PDF"), "pdf");
        assert_eq!(extension_tag("archive.tar.gz"), "gz");
        assert_eq!(extension_tag("README"), "");
        assert_eq!(extension_tag(".bashrc"), "");
        assert_eq!(extension_tag("trailingdot."), "");
    }

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("photo.jpg"), ("photo", ".jpg"));
        assert_eq!(split_name("README"), ("README", ""));
        assert_eq!(split_name(".bashrc"), (".bashrc", ""));
    }
}
