//! zkv-crypto: the vault cryptographic engine
//!
//! Key hierarchy:
//! ```text
//! Seed phrase (12/24-word mnemonic, never persisted)
//!   └── Master secret (256-bit, Argon2id with fixed application salt)
//!         ├── Encryption key (HKDF-SHA256, info="zkv:encryption")
//!         │     └── AEAD: XChaCha20-Poly1305, blob = nonce(24) || ct || tag(16)
//!         └── Identity subkey (HKDF-SHA256, info="zkv:identity")
//!               └── vault_id = hex(BLAKE3(identity subkey))  — public
//! ```
//!
//! The master secret and the raw identity subkey exist only inside
//! `derive_identity` and are zeroized before it returns.

pub mod aead;
pub mod chunk;
pub mod identity;
pub mod mnemonic;

pub use aead::{decrypt, encrypt};
pub use chunk::{
    chunk_count, chunk_count_with, chunk_id, decrypt_chunk, encrypt_chunk, storage_path, CHUNK_SIZE,
};
pub use identity::{derive_identity, derive_identity_with_params, EncryptionKey, VaultIdentity};
pub use mnemonic::{generate_mnemonic, validate_mnemonic};

/// Size of a symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;

/// Fixed per-blob overhead: nonce + tag
pub const BLOB_OVERHEAD: usize = NONCE_SIZE + TAG_SIZE;
