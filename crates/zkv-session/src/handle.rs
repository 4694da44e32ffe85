//! Live session handle: key access and the manifest-mutation entry point

use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use zkv_core::types::unix_now;
use zkv_core::{VaultError, VaultResult};
use zkv_crypto::{EncryptionKey, BLOB_OVERHEAD};
use zkv_manifest::{Entry, EntryKind, FileMeta, Manifest};
use zkv_store::StoreClient;

/// Shared slot holding the session's encryption key.
///
/// Logout takes the key out synchronously; the zeroize-on-drop key type
/// wipes it at that moment. Handles cloned into in-flight transfers then
/// observe `SessionLocked` on their next key access.
pub struct KeySlot {
    inner: Mutex<Option<EncryptionKey>>,
}

impl KeySlot {
    pub fn new(key: EncryptionKey) -> Self {
        Self {
            inner: Mutex::new(Some(key)),
        }
    }

    /// Run `f` against the key, or fail if the session has been locked.
    pub fn with_key<R>(&self, f: impl FnOnce(&EncryptionKey) -> R) -> VaultResult<R> {
        let guard = self.inner.lock().map_err(|_| VaultError::SessionLocked)?;
        match guard.as_ref() {
            Some(key) => Ok(f(key)),
            None => Err(VaultError::SessionLocked),
        }
    }

    /// Drop (and thereby zeroize) the key. Idempotent.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.lock() {
            guard.take();
        }
    }
}

/// Result of one serialized manifest mutation.
pub struct MutationOutcome {
    /// File entries removed by this mutation (for blob cleanup)
    pub removed_files: Vec<Entry>,
    /// Signed adjustment to the vault's stored-bytes accounting
    pub storage_delta: i64,
}

impl MutationOutcome {
    pub fn none() -> Self {
        Self {
            removed_files: Vec::new(),
            storage_delta: 0,
        }
    }
}

/// A mutation applied to the manifest under the single-writer actor.
pub type MutationFn = Box<dyn FnOnce(&mut Manifest) -> VaultResult<MutationOutcome> + Send>;

pub(crate) struct MutationRequest {
    pub mutate: MutationFn,
    pub reply: oneshot::Sender<VaultResult<MutationOutcome>>,
}

/// Cloneable handle to the unlocked session.
///
/// Handed to the transfer engine and the presentation layer; all copies
/// die together when the session locks.
#[derive(Clone)]
pub struct SessionHandle {
    pub vault_id: String,
    key: Arc<KeySlot>,
    store: Arc<StoreClient>,
    manifest: Arc<RwLock<Manifest>>,
    mutations: mpsc::Sender<MutationRequest>,
    cancel: CancellationToken,
}

impl SessionHandle {
    pub(crate) fn new(
        vault_id: String,
        key: Arc<KeySlot>,
        store: Arc<StoreClient>,
        manifest: Arc<RwLock<Manifest>>,
        mutations: mpsc::Sender<MutationRequest>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            vault_id,
            key,
            store,
            manifest,
            mutations,
            cancel,
        }
    }

    pub fn store(&self) -> &StoreClient {
        &self.store
    }

    /// Token tripped at logout; transfers derive child tokens from it.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Encrypt arbitrary bytes under the session key.
    pub fn encrypt(&self, plaintext: &[u8]) -> VaultResult<Vec<u8>> {
        self.key.with_key(|k| zkv_crypto::encrypt(plaintext, k))?
    }

    /// Decrypt a blob under the session key.
    pub fn decrypt(&self, blob: &[u8]) -> VaultResult<Vec<u8>> {
        self.key.with_key(|k| zkv_crypto::decrypt(blob, k))?
    }

    /// Point-in-time copy of the manifest for display purposes.
    pub fn snapshot(&self) -> Manifest {
        self.manifest
            .read()
            .map(|m| m.clone())
            .unwrap_or_else(|_| Manifest::empty())
    }

    /// The single serialization point for manifest writes.
    ///
    /// Requests queue FIFO behind the actor's inbox; each one sees the
    /// result of the previous write before it starts. A failed persist
    /// leaves the previous in-memory manifest as the displayed truth.
    pub async fn apply_manifest_mutation(&self, mutate: MutationFn) -> VaultResult<MutationOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.mutations
            .send(MutationRequest {
                mutate,
                reply: reply_tx,
            })
            .await
            .map_err(|_| VaultError::SessionLocked)?;
        reply_rx.await.map_err(|_| VaultError::SessionLocked)?
    }

    /// Create a folder with a collision-safe name; returns its id.
    pub async fn create_folder(&self, name: String, parent: Option<Uuid>) -> VaultResult<Uuid> {
        let id = Uuid::new_v4();
        self.apply_manifest_mutation(Box::new(move |m| {
            let truncated = zkv_manifest::truncate_name(&name, false);
            let unique = m.unique_name(&truncated, parent, true);
            m.add_entries([Entry {
                id,
                name: unique,
                parent,
                kind: EntryKind::Folder,
            }]);
            Ok(MutationOutcome::none())
        }))
        .await?;
        Ok(id)
    }

    /// Commit a fully uploaded file into the manifest; returns the entry id.
    ///
    /// Called by the upload orchestrator only after every chunk is
    /// durably stored — no reader ever observes a partial file.
    pub async fn add_file_entry(
        &self,
        name: String,
        parent: Option<Uuid>,
        file_uid: String,
        size: u64,
        chunk_count: u32,
        mime_type: String,
    ) -> VaultResult<Uuid> {
        let id = Uuid::new_v4();
        let encrypted_bytes = size as i64 + i64::from(chunk_count) * BLOB_OVERHEAD as i64;
        self.apply_manifest_mutation(Box::new(move |m| {
            let truncated = zkv_manifest::truncate_name(&name, true);
            let unique = m.unique_name(&truncated, parent, false);
            m.add_entries([Entry {
                id,
                name: unique,
                parent,
                kind: EntryKind::File(FileMeta {
                    file_uid,
                    size,
                    chunk_count,
                    mime_type,
                    created_at: unix_now(),
                }),
            }]);
            Ok(MutationOutcome {
                removed_files: Vec::new(),
                storage_delta: encrypted_bytes,
            })
        }))
        .await?;
        Ok(id)
    }

    /// Remove entries (folders recurse), then delete the orphaned chunk
    /// blobs. Returns the removed file entries.
    pub async fn remove_entries(&self, ids: Vec<Uuid>) -> VaultResult<Vec<Entry>> {
        let outcome = self
            .apply_manifest_mutation(Box::new(move |m| {
                let removed = m.remove_entries(&ids);
                let delta: i64 = removed
                    .iter()
                    .filter_map(|e| e.file_meta())
                    .map(|f| f.size as i64 + i64::from(f.chunk_count) * BLOB_OVERHEAD as i64)
                    .sum();
                Ok(MutationOutcome {
                    removed_files: removed,
                    storage_delta: -delta,
                })
            }))
            .await?;

        // Manifest is persisted first, so a failure here orphans blobs
        // rather than dangling references
        let mut paths = Vec::new();
        for entry in &outcome.removed_files {
            if let Some(meta) = entry.file_meta() {
                for index in 0..meta.chunk_count {
                    let chunk = zkv_crypto::chunk_id(&meta.file_uid, index);
                    paths.push(zkv_crypto::storage_path(&self.vault_id, &chunk));
                }
            }
        }
        self.store.delete_chunks(&paths).await?;

        Ok(outcome.removed_files)
    }

    pub async fn rename_entry(&self, id: Uuid, new_name: String) -> VaultResult<()> {
        self.apply_manifest_mutation(Box::new(move |m| {
            m.rename_entry(id, &new_name);
            Ok(MutationOutcome::none())
        }))
        .await
        .map(|_| ())
    }

    pub async fn move_entry(&self, id: Uuid, new_parent: Option<Uuid>) -> VaultResult<()> {
        self.apply_manifest_mutation(Box::new(move |m| {
            // Defensive: refuse to move a folder into its own subtree
            if let Some(target) = new_parent {
                if target == id || m.is_descendant_of(target, id) {
                    return Err(VaultError::InvalidOperation(
                        "cannot move an entry into its own subtree".into(),
                    ));
                }
            }
            m.move_entry(id, new_parent);
            Ok(MutationOutcome::none())
        }))
        .await
        .map(|_| ())
    }
}
