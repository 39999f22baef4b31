//! # SecureVault
//!
//! Credential-bound encrypted file vault for a single operator.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                       VAULT SERVICE                      │
//! │   unlock / add / retrieve / delete / list / search       │
//! │                 ┌──────────┴──────────┐                  │
//! │        ┌────────┴───────┐     ┌───────┴────────┐         │
//! │        │    CATALOG     │     │   BLOB STORE   │         │
//! │        │  (SQLite rows) │     │  (*.enc files) │         │
//! │        └────────┬───────┘     └───────┬────────┘         │
//! │                 └──────────┬──────────┘                  │
//! │        PBKDF2 session key · AES-256-CBC envelopes        │
//! │        rotation: re-encrypt all blobs on password change │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Security model
//!
//! - One active operator; a salted SHA-256 verifier gates login
//! - A PBKDF2-derived AES-256 key encrypts every file independently
//! - Blob names are random; no plaintext metadata on disk beside the catalog
//! - The session key is zeroized on lock
//! - No MAC on blobs and no rotation journal: documented legacy weaknesses

pub mod blobs;
pub mod catalog;
pub mod crypto;
pub mod error;
pub mod models;
pub mod rotation;
pub mod vault;

pub use blobs::BlobStore;
pub use catalog::Catalog;
pub use crypto::SessionKey;
pub use error::{VaultError, VaultResult};
pub use models::{FileEntry, Operator};
pub use rotation::{RotationEngine, RotationOutcome};
pub use vault::{SpaceStatus, Vault, VaultStats};

/// SecureVault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
