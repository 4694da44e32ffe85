//! zkv-store: client for the hosted row/blob store
//!
//! The store holds only ciphertext and opaque identifiers:
//! - vault rows at `vaults/{vault_id}` (encrypted manifest + quota fields)
//! - upload-tracking rows at `uploads/{upload_id}` (resumability)
//! - chunk blobs at `{vault_id}/{chunk_id}`
//!
//! `vault_id` doubles as the bearer credential: the hosted store grants
//! row access to whoever presents it. Inserts require no credential at
//! all (accountless creation — admission control is an external layer).

pub mod client;
pub mod operator;

pub use client::{StoreClient, UploadRecord, VaultRow};
pub use operator::{build_operator, memory_operator};
