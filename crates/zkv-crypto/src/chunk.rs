//! Deterministic chunk addressing and per-chunk encryption
//!
//! `chunk_id(file_uid, index) = hex(BLAKE3(file_uid || ":" || index))` —
//! stable and injective per `(file_uid, index)`, but recoverable only by
//! iterating `[0, chunk_count)`; the count in the manifest entry is the
//! only index bookkeeping that exists. The `file_uid` is a random value
//! that lives exclusively inside the encrypted manifest, so chunk paths
//! are unguessable without manifest access.

use zkv_core::VaultResult;

use crate::aead;
use crate::identity::EncryptionKey;

/// Plaintext chunk size: 10 MiB
pub const CHUNK_SIZE: u64 = 10 * 1024 * 1024;

/// Number of chunks needed for a file of `file_size` bytes.
pub fn chunk_count(file_size: u64) -> u32 {
    chunk_count_with(file_size, CHUNK_SIZE)
}

/// [`chunk_count`] with an explicit chunk size.
pub fn chunk_count_with(file_size: u64, chunk_size: u64) -> u32 {
    file_size.div_ceil(chunk_size) as u32
}

/// Deterministic content address of one chunk.
pub fn chunk_id(file_uid: &str, index: u32) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(file_uid.as_bytes());
    hasher.update(b":");
    hasher.update(index.to_string().as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Object key of a chunk in the blob store: `{vault_id}/{chunk_id}`.
pub fn storage_path(vault_id: &str, chunk_id: &str) -> String {
    format!("{vault_id}/{chunk_id}")
}

/// Encrypt one plaintext chunk slice. Output grows by [`crate::BLOB_OVERHEAD`].
pub fn encrypt_chunk(plaintext: &[u8], key: &EncryptionKey) -> VaultResult<Vec<u8>> {
    aead::encrypt(plaintext, key)
}

/// Decrypt one chunk blob.
pub fn decrypt_chunk(blob: &[u8], key: &EncryptionKey) -> VaultResult<Vec<u8>> {
    aead::decrypt(blob, key)
}
