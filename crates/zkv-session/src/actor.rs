//! The manifest-mutation actor: one writer, FIFO inbox
//!
//! Each request is applied to a clone of the current manifest, encrypted,
//! and persisted as a full-document replace before the clone is committed
//! as the new in-memory truth. A later request only starts once the prior
//! one's result is known, so manifest writes are totally ordered — the
//! structural replacement for incidental promise-chaining.

use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use zkv_core::VaultResult;
use zkv_manifest::Manifest;
use zkv_store::StoreClient;

use crate::handle::{KeySlot, MutationRequest};

pub(crate) struct MutationActor {
    pub vault_id: String,
    pub key: Arc<KeySlot>,
    pub store: Arc<StoreClient>,
    pub manifest: Arc<RwLock<Manifest>>,
    pub cancel: CancellationToken,
}

impl MutationActor {
    pub(crate) async fn run(self, mut inbox: mpsc::Receiver<MutationRequest>) {
        loop {
            let request = tokio::select! {
                _ = self.cancel.cancelled() => break,
                request = inbox.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };

            let result = self.handle(request.mutate).await;
            if let Err(e) = &result {
                warn!(vault_id = %self.vault_id, error = %e, "manifest mutation failed");
            }
            // Receiver gone means the caller stopped waiting; the write
            // outcome above still stands
            let _ = request.reply.send(result);
        }
        debug!(vault_id = %self.vault_id, "mutation actor stopped");
    }

    async fn handle(
        &self,
        mutate: crate::handle::MutationFn,
    ) -> VaultResult<crate::handle::MutationOutcome> {
        // Work on a clone; the shared manifest only advances on success
        let mut candidate = {
            let current = self
                .manifest
                .read()
                .map_err(|_| zkv_core::VaultError::SessionLocked)?;
            current.clone()
        };

        let outcome = mutate(&mut candidate)?;

        let cipher = self
            .key
            .with_key(|k| zkv_crypto::encrypt(&candidate.to_bytes()?, k))??;

        // Full-row read-modify-write keyed by vault_id; this actor is the
        // only row writer in the process
        let mut row = self.store.fetch_vault(&self.vault_id).await?;
        row.manifest_cipher = cipher;
        row.storage_used = row
            .storage_used
            .saturating_add_signed(outcome.storage_delta);
        self.store.put_vault(&self.vault_id, &row).await?;

        let mut shared = self
            .manifest
            .write()
            .map_err(|_| zkv_core::VaultError::SessionLocked)?;
        *shared = candidate;
        debug!(
            vault_id = %self.vault_id,
            entries = shared.len(),
            storage_used = row.storage_used,
            "manifest persisted"
        );
        Ok(outcome)
    }
}
