//! The session state machine

use secrecy::SecretString;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use zkv_core::config::KdfConfig;
use zkv_core::types::BurnPolicy;
use zkv_core::{VaultError, VaultResult};
use zkv_manifest::Manifest;
use zkv_store::{StoreClient, VaultRow};

use crate::actor::MutationActor;
use crate::handle::{KeySlot, SessionHandle};

/// Default quota granted to a new vault: 10 GiB.
const DEFAULT_STORAGE_LIMIT: u64 = 10 * 1024 * 1024 * 1024;

/// Depth of the mutation inbox; senders briefly backpressure beyond it.
const MUTATION_INBOX_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Locked,
    Creating,
    Unlocking,
    Unlocked,
}

/// The single live session of the process.
///
/// Transition table: `Locked → Creating → Unlocked`,
/// `Locked → Unlocking → Unlocked`, `Unlocked → Locked` (logout, idle
/// timeout, network loss). `create`/`unlock` refuse to run unless the
/// session is `Locked`, enforcing at most one unlocked session.
pub struct Session {
    store: Arc<StoreClient>,
    kdf: KdfConfig,
    state: SessionState,
    handle: Option<SessionHandle>,
    key: Option<Arc<KeySlot>>,
    cancel: Option<CancellationToken>,
}

impl Session {
    pub fn new(store: Arc<StoreClient>, kdf: KdfConfig) -> Self {
        Self {
            store,
            kdf,
            state: SessionState::Locked,
            handle: None,
            key: None,
            cancel: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Live handle, or `None` while locked.
    pub fn handle(&self) -> Option<SessionHandle> {
        self.handle.clone()
    }

    /// Create a brand-new vault from a seed phrase and go Unlocked.
    ///
    /// Writes the vault row with its initial quota grant through the
    /// store's unauthenticated insert path.
    pub async fn create(
        &mut self,
        seed_phrase: &SecretString,
        burn_policy: BurnPolicy,
    ) -> VaultResult<SessionHandle> {
        self.require_locked()?;
        self.state = SessionState::Creating;

        match self.create_inner(seed_phrase, burn_policy).await {
            Ok(handle) => {
                self.state = SessionState::Unlocked;
                info!(vault_id = %handle.vault_id, "vault created");
                Ok(handle)
            }
            Err(e) => {
                self.state = SessionState::Locked;
                Err(e)
            }
        }
    }

    /// Unlock an existing vault.
    ///
    /// Row-not-found, authorization rejection, and decryption failure all
    /// collapse into `VaultInaccessible`: an unlock attempt reveals
    /// nothing about whether a vault exists.
    pub async fn unlock(&mut self, seed_phrase: &SecretString) -> VaultResult<SessionHandle> {
        self.require_locked()?;
        self.state = SessionState::Unlocking;

        match self.unlock_inner(seed_phrase).await {
            Ok(handle) => {
                self.state = SessionState::Unlocked;
                info!(vault_id = %handle.vault_id, "vault unlocked");
                Ok(handle)
            }
            Err(e) => {
                self.state = SessionState::Locked;
                Err(e)
            }
        }
    }

    pub fn logout(&mut self) {
        self.lock("logout");
    }

    pub fn idle_timeout(&mut self) {
        self.lock("idle timeout");
    }

    pub fn network_loss(&mut self) {
        self.lock("network loss");
    }

    fn require_locked(&self) -> VaultResult<()> {
        if self.state == SessionState::Locked {
            Ok(())
        } else {
            Err(VaultError::InvalidOperation(format!(
                "session is not locked (state: {:?})",
                self.state
            )))
        }
    }

    /// Synchronously zero the key, trip the cancellation token, and tear
    /// down all handles. In-flight transfers are abandoned, not drained —
    /// this can orphan chunks and upload records at the store, an
    /// accepted risk.
    fn lock(&mut self, reason: &str) {
        if self.state != SessionState::Unlocked {
            return;
        }
        if let Some(key) = self.key.take() {
            key.clear();
        }
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        self.handle = None;
        self.state = SessionState::Locked;
        warn!(reason, "session locked");
    }

    async fn create_inner(
        &mut self,
        seed_phrase: &SecretString,
        burn_policy: BurnPolicy,
    ) -> VaultResult<SessionHandle> {
        let identity = zkv_crypto::derive_identity_with_params(seed_phrase, &self.kdf)?;
        let vault_id = identity.vault_id;
        let key = Arc::new(KeySlot::new(identity.encryption_key));

        let manifest = Manifest::empty();
        let cipher = key.with_key(|k| zkv_crypto::encrypt(&manifest.to_bytes()?, k))??;

        let row = VaultRow {
            manifest_cipher: cipher,
            burn_at: burn_policy.burn_at(zkv_core::types::unix_now()),
            storage_used: 0,
            storage_limit: DEFAULT_STORAGE_LIMIT,
        };
        self.store.insert_vault(&vault_id, &row).await?;

        Ok(self.go_unlocked(vault_id, key, manifest))
    }

    async fn unlock_inner(&mut self, seed_phrase: &SecretString) -> VaultResult<SessionHandle> {
        let identity = zkv_crypto::derive_identity_with_params(seed_phrase, &self.kdf)?;
        let vault_id = identity.vault_id;
        let key = Arc::new(KeySlot::new(identity.encryption_key));

        let row = self.store.fetch_vault(&vault_id).await.map_err(collapse)?;
        let plaintext = key
            .with_key(|k| zkv_crypto::decrypt(&row.manifest_cipher, k))
            .and_then(|r| r)
            .map_err(collapse)?;
        let manifest = Manifest::from_bytes(&plaintext).map_err(|_| VaultError::VaultInaccessible)?;

        Ok(self.go_unlocked(vault_id, key, manifest))
    }

    fn go_unlocked(
        &mut self,
        vault_id: String,
        key: Arc<KeySlot>,
        manifest: Manifest,
    ) -> SessionHandle {
        let manifest = Arc::new(RwLock::new(manifest));
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(MUTATION_INBOX_DEPTH);

        let actor = MutationActor {
            vault_id: vault_id.clone(),
            key: Arc::clone(&key),
            store: Arc::clone(&self.store),
            manifest: Arc::clone(&manifest),
            cancel: cancel.clone(),
        };
        tokio::spawn(actor.run(rx));

        let handle = SessionHandle::new(
            vault_id,
            Arc::clone(&key),
            Arc::clone(&self.store),
            manifest,
            tx,
            cancel.clone(),
        );

        self.key = Some(key);
        self.cancel = Some(cancel);
        self.handle = Some(handle.clone());
        handle
    }
}

/// Fold every unlock failure mode into the one generic outcome. Only a
/// KDF primitive failure stays distinct — it is fatal, not an oracle.
fn collapse(e: VaultError) -> VaultError {
    match e {
        VaultError::KeyDerivation(_) => e,
        _ => VaultError::VaultInaccessible,
    }
}
