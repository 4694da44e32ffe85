//! Row and blob operations against the store

use opendal::{ErrorKind, Operator};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

use zkv_core::{VaultError, VaultResult};

/// The single row a vault occupies in the hosted store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultRow {
    /// Encrypted manifest document (`nonce || ct || tag`)
    #[serde(with = "base64_bytes")]
    pub manifest_cipher: Vec<u8>,
    /// Unix-seconds deadline for the server-side expiry sweep
    pub burn_at: Option<u64>,
    pub storage_used: u64,
    pub storage_limit: u64,
}

/// Store-tracked upload record enabling resumability.
///
/// Created when an item starts uploading, deleted on completion or
/// explicit cancellation, deliberately left behind on terminal failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    pub upload_id: String,
    pub vault_id: String,
    pub file_uid: String,
    pub total_chunks: u32,
    pub received_chunks: BTreeSet<u32>,
}

/// Client over the hosted row/blob store.
pub struct StoreClient {
    op: Operator,
    /// Serializes record read-modify-writes; stands in for the hosted
    /// store's atomic append-if-absent operation.
    record_lock: tokio::sync::Mutex<()>,
    #[cfg(feature = "fault-injection")]
    faults: FaultPlan,
}

/// Deterministic write-failure schedule, compiled only under the
/// `fault-injection` feature so production builds carry no hook.
#[cfg(feature = "fault-injection")]
#[derive(Default)]
struct FaultPlan {
    put_chunk_skip: std::sync::atomic::AtomicU32,
    put_chunk_fail: std::sync::atomic::AtomicU32,
}

#[cfg(feature = "fault-injection")]
impl FaultPlan {
    fn check_put_chunk(&self) -> VaultResult<()> {
        use std::sync::atomic::Ordering;
        let take = |counter: &std::sync::atomic::AtomicU32| {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        };
        if take(&self.put_chunk_skip) {
            return Ok(());
        }
        if take(&self.put_chunk_fail) {
            return Err(VaultError::Storage("injected chunk write failure".into()));
        }
        Ok(())
    }
}

fn vault_path(vault_id: &str) -> String {
    format!("vaults/{vault_id}")
}

fn upload_path(upload_id: &str) -> String {
    format!("uploads/{upload_id}")
}

fn storage_err(e: opendal::Error) -> VaultError {
    VaultError::Storage(e.to_string())
}

impl StoreClient {
    pub fn new(op: Operator) -> Self {
        Self {
            op,
            record_lock: tokio::sync::Mutex::new(()),
            #[cfg(feature = "fault-injection")]
            faults: FaultPlan::default(),
        }
    }

    /// Fail the next `times` chunk writes after letting `skip` writes
    /// pass. The injected error counts as transient.
    #[cfg(feature = "fault-injection")]
    pub fn fail_chunk_puts(&self, skip: u32, times: u32) {
        use std::sync::atomic::Ordering;
        self.faults.put_chunk_skip.store(skip, Ordering::SeqCst);
        self.faults.put_chunk_fail.store(times, Ordering::SeqCst);
    }

    /// In-memory store for tests.
    pub fn memory() -> Self {
        Self::new(crate::operator::memory_operator())
    }

    // ── Vault rows ─────────────────────────────────────────────────────

    /// Insert a fresh vault row. This is the unauthenticated write path;
    /// it refuses to clobber an existing vault.
    pub async fn insert_vault(&self, vault_id: &str, row: &VaultRow) -> VaultResult<()> {
        let path = vault_path(vault_id);
        if self.op.exists(&path).await.map_err(storage_err)? {
            return Err(VaultError::Storage(format!(
                "vault row already exists: {vault_id}"
            )));
        }
        self.op
            .write(&path, serde_json::to_vec(row)?)
            .await
            .map_err(storage_err)?;
        debug!(vault_id, "vault row inserted");
        Ok(())
    }

    /// Fetch a vault row. Not-found collapses into the generic
    /// inaccessible outcome — callers cannot distinguish a missing vault
    /// from a key that fails to decrypt one.
    pub async fn fetch_vault(&self, vault_id: &str) -> VaultResult<VaultRow> {
        let bytes = self
            .op
            .read(&vault_path(vault_id))
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => VaultError::VaultInaccessible,
                _ => storage_err(e),
            })?;
        Ok(serde_json::from_slice(&bytes.to_vec())?)
    }

    /// Full-row replace keyed by `vault_id` (last write wins).
    pub async fn put_vault(&self, vault_id: &str, row: &VaultRow) -> VaultResult<()> {
        self.op
            .write(&vault_path(vault_id), serde_json::to_vec(row)?)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn delete_vault(&self, vault_id: &str) -> VaultResult<()> {
        self.op
            .delete(&vault_path(vault_id))
            .await
            .map_err(storage_err)
    }

    // ── Upload records ─────────────────────────────────────────────────

    pub async fn create_upload_record(&self, record: &UploadRecord) -> VaultResult<()> {
        self.op
            .write(&upload_path(&record.upload_id), serde_json::to_vec(record)?)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    pub async fn fetch_upload_record(&self, upload_id: &str) -> VaultResult<UploadRecord> {
        let bytes = self
            .op
            .read(&upload_path(upload_id))
            .await
            .map_err(storage_err)?;
        Ok(serde_json::from_slice(&bytes.to_vec())?)
    }

    /// Append a received chunk index if absent (idempotent).
    pub async fn append_received_chunk(&self, upload_id: &str, index: u32) -> VaultResult<()> {
        let _guard = self.record_lock.lock().await;
        let mut record = self.fetch_upload_record(upload_id).await?;
        if record.received_chunks.insert(index) {
            self.op
                .write(&upload_path(upload_id), serde_json::to_vec(&record)?)
                .await
                .map_err(storage_err)?;
        }
        Ok(())
    }

    /// Upload record ids currently tracked at the store. Records outlive
    /// terminal item failures, so this doubles as the resume inventory.
    pub async fn list_upload_records(&self) -> VaultResult<Vec<String>> {
        let entries = match self.op.list("uploads/").await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_err(e)),
        };
        Ok(entries
            .iter()
            .filter(|e| !e.name().ends_with('/'))
            .map(|e| e.name().to_string())
            .collect())
    }

    pub async fn delete_upload_record(&self, upload_id: &str) -> VaultResult<()> {
        self.op
            .delete(&upload_path(upload_id))
            .await
            .map_err(storage_err)
    }

    // ── Chunk blobs ────────────────────────────────────────────────────

    /// Store a chunk blob; rejects if the object already exists. Chunks
    /// are content-addressed and immutable — never silently overwritten.
    pub async fn put_chunk(&self, path: &str, blob: Vec<u8>) -> VaultResult<()> {
        #[cfg(feature = "fault-injection")]
        self.faults.check_put_chunk()?;
        if self.op.exists(path).await.map_err(storage_err)? {
            return Err(VaultError::ChunkExists(path.to_string()));
        }
        self.op.write(path, blob).await.map_err(storage_err)?;
        Ok(())
    }

    pub async fn get_chunk(&self, path: &str) -> VaultResult<Vec<u8>> {
        Ok(self.op.read(path).await.map_err(storage_err)?.to_vec())
    }

    pub async fn chunk_exists(&self, path: &str) -> VaultResult<bool> {
        self.op.exists(path).await.map_err(storage_err)
    }

    /// Batch delete; missing objects are skipped, not errors.
    pub async fn delete_chunks(&self, paths: &[String]) -> VaultResult<()> {
        for path in paths {
            match self.op.delete(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(storage_err(e)),
            }
        }
        Ok(())
    }
}

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(&s)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_row() -> VaultRow {
        VaultRow {
            manifest_cipher: vec![1, 2, 3, 4],
            burn_at: None,
            storage_used: 0,
            storage_limit: 1 << 30,
        }
    }

    #[tokio::test]
    async fn test_vault_row_roundtrip() {
        let store = StoreClient::memory();
        let row = sample_row();

        store.insert_vault("vault-a", &row).await.unwrap();
        let fetched = store.fetch_vault("vault-a").await.unwrap();
        assert_eq!(fetched, row);
    }

    #[tokio::test]
    async fn test_insert_rejects_existing_vault() {
        let store = StoreClient::memory();
        store.insert_vault("vault-a", &sample_row()).await.unwrap();

        let result = store.insert_vault("vault-a", &sample_row()).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_fetch_missing_vault_is_inaccessible() {
        let store = StoreClient::memory();
        assert!(matches!(
            store.fetch_vault("nope").await,
            Err(VaultError::VaultInaccessible)
        ));
    }

    #[tokio::test]
    async fn test_put_vault_replaces() {
        let store = StoreClient::memory();
        store.insert_vault("v", &sample_row()).await.unwrap();

        let mut updated = sample_row();
        updated.storage_used = 42;
        store.put_vault("v", &updated).await.unwrap();

        assert_eq!(store.fetch_vault("v").await.unwrap().storage_used, 42);
    }

    #[tokio::test]
    async fn test_upload_record_append_idempotent() {
        let store = StoreClient::memory();
        let record = UploadRecord {
            upload_id: "up-1".into(),
            vault_id: "v".into(),
            file_uid: "uid".into(),
            total_chunks: 3,
            received_chunks: BTreeSet::new(),
        };
        store.create_upload_record(&record).await.unwrap();

        store.append_received_chunk("up-1", 1).await.unwrap();
        store.append_received_chunk("up-1", 1).await.unwrap();
        store.append_received_chunk("up-1", 0).await.unwrap();

        let fetched = store.fetch_upload_record("up-1").await.unwrap();
        assert_eq!(fetched.received_chunks, BTreeSet::from([0, 1]));
    }

    #[tokio::test]
    async fn test_list_upload_records() {
        let store = StoreClient::memory();
        assert!(store.list_upload_records().await.unwrap().is_empty());

        for id in ["up-a", "up-b"] {
            let record = UploadRecord {
                upload_id: id.into(),
                vault_id: "v".into(),
                file_uid: "uid".into(),
                total_chunks: 1,
                received_chunks: BTreeSet::new(),
            };
            store.create_upload_record(&record).await.unwrap();
        }
        store.delete_upload_record("up-a").await.unwrap();

        assert_eq!(store.list_upload_records().await.unwrap(), vec!["up-b"]);
    }

    #[cfg(feature = "fault-injection")]
    #[tokio::test]
    async fn test_fail_chunk_puts_schedule() {
        let store = StoreClient::memory();
        store.fail_chunk_puts(1, 2);

        store.put_chunk("v/pass", vec![1]).await.unwrap();
        assert!(store.put_chunk("v/fail-1", vec![2]).await.is_err());
        assert!(store.put_chunk("v/fail-2", vec![3]).await.is_err());
        // Schedule exhausted; writes flow again
        store.put_chunk("v/fail-1", vec![2]).await.unwrap();
    }

    #[tokio::test]
    async fn test_put_chunk_rejects_existing() {
        let store = StoreClient::memory();
        store.put_chunk("v/abc", vec![1, 2, 3]).await.unwrap();

        assert!(matches!(
            store.put_chunk("v/abc", vec![4, 5, 6]).await,
            Err(VaultError::ChunkExists(_))
        ));
        // Original blob untouched
        assert_eq!(store.get_chunk("v/abc").await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_delete_chunks_skips_missing() {
        let store = StoreClient::memory();
        store.put_chunk("v/one", vec![1]).await.unwrap();

        store
            .delete_chunks(&["v/one".into(), "v/never-existed".into()])
            .await
            .unwrap();
        assert!(!store.chunk_exists("v/one").await.unwrap());
    }
}
