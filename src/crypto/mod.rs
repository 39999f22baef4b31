//! SecureVault - Cryptographic Core
//!
//! Password-based key derivation and the per-file AES-256-CBC envelope.

pub mod envelope;
pub mod keys;

pub use envelope::*;
pub use keys::*;
