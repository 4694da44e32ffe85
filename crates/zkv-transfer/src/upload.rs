//! The upload orchestrator
//!
//! Every enqueued file becomes a queue item with its own cancellation
//! token. A global semaphore bounds how many items upload at once; within
//! an item a small worker pool drains a shared deque of chunk indices, so
//! chunk order within an item is not guaranteed, only completion is.
//!
//! Ordering guarantee: the manifest entry is committed only after every
//! chunk of the item is durably stored. A reader that can see the entry
//! can fetch all of its chunks.

use bytes::Bytes;
use std::collections::{BTreeSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use zkv_core::config::TransferConfig;
use zkv_core::types::UploadStatus;
use zkv_core::{VaultError, VaultResult};
use zkv_session::SessionHandle;
use zkv_store::UploadRecord;

use crate::events::TransferEvent;

const EVENT_CHANNEL_DEPTH: usize = 256;

/// A file handed to the queue; bytes already in memory.
pub struct UploadFile {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Point-in-time view of a queue item for display.
#[derive(Debug, Clone)]
pub struct UploadItem {
    pub id: Uuid,
    pub name: String,
    pub status: UploadStatus,
    pub total_chunks: u32,
    pub chunks_done: u32,
    pub total_bytes: u64,
    pub bytes_done: u64,
    pub speed_bps: u64,
    pub error: Option<String>,
}

struct Progress {
    status: UploadStatus,
    chunks_done: u32,
    bytes_done: u64,
    speed_bps: u64,
    started: Option<Instant>,
    error: Option<String>,
}

struct Item {
    id: Uuid,
    name: String,
    parent: Option<Uuid>,
    /// Random uid chunk addresses derive from; lives only in the
    /// encrypted manifest once the entry is committed
    file_uid: String,
    mime_type: String,
    data: Bytes,
    total_chunks: u32,
    cancel: CancellationToken,
    progress: Mutex<Progress>,
}

impl Item {
    fn snapshot(&self) -> UploadItem {
        let p = self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        UploadItem {
            id: self.id,
            name: self.name.clone(),
            status: p.status,
            total_chunks: self.total_chunks,
            chunks_done: p.chunks_done,
            total_bytes: self.data.len() as u64,
            bytes_done: p.bytes_done,
            speed_bps: p.speed_bps,
            error: p.error.clone(),
        }
    }

    fn start(&self) {
        let mut p = self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        p.status = UploadStatus::Uploading;
        p.started = Some(Instant::now());
    }

    fn finish(&self, status: UploadStatus, error: Option<String>) {
        let mut p = self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        p.status = status;
        p.error = error;
    }

    /// Account one stored chunk; returns the progress triple for the event.
    fn bump(&self, bytes: u64) -> (u32, u64, u64) {
        let mut p = self
            .progress
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        p.chunks_done += 1;
        p.bytes_done += bytes;
        if let Some(started) = p.started {
            let secs = started.elapsed().as_secs_f64();
            if secs > 0.0 {
                p.speed_bps = (p.bytes_done as f64 / secs) as u64;
            }
        }
        (p.chunks_done, p.bytes_done, p.speed_bps)
    }
}

struct Shared {
    session: SessionHandle,
    cfg: TransferConfig,
    items: Mutex<Vec<Arc<Item>>>,
    events: broadcast::Sender<TransferEvent>,
}

impl Shared {
    fn items_locked(&self) -> std::sync::MutexGuard<'_, Vec<Arc<Item>>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit_progress(&self, item: &Item, chunks_done: u32, bytes_done: u64, speed_bps: u64) {
        let _ = self.events.send(TransferEvent::Progress {
            item_id: item.id,
            chunks_done,
            total_chunks: item.total_chunks,
            bytes_done,
            total_bytes: item.data.len() as u64,
            speed_bps,
        });
    }
}

/// The process-wide upload queue, bound to one unlocked session.
pub struct UploadQueue {
    shared: Arc<Shared>,
    slots: Arc<Semaphore>,
}

impl UploadQueue {
    pub fn new(session: SessionHandle, cfg: TransferConfig) -> Self {
        let slots = Arc::new(Semaphore::new(cfg.max_active_uploads.max(1)));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_DEPTH);
        Self {
            shared: Arc::new(Shared {
                session,
                cfg,
                items: Mutex::new(Vec::new()),
                events,
            }),
            slots,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.shared.events.subscribe()
    }

    /// Enqueue files for upload into `parent`; returns the item ids in
    /// input order. Items start as soon as a global slot frees up.
    pub fn enqueue(&self, files: Vec<UploadFile>, parent: Option<Uuid>) -> Vec<Uuid> {
        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            let total_chunks =
                zkv_crypto::chunk_count_with(file.data.len() as u64, self.shared.cfg.chunk_size);
            let item = Arc::new(Item {
                id: Uuid::new_v4(),
                name: file.name,
                parent,
                file_uid: Uuid::new_v4().to_string(),
                mime_type: file.mime_type,
                data: file.data,
                total_chunks,
                cancel: self.shared.session.cancellation().child_token(),
                progress: Mutex::new(Progress {
                    status: UploadStatus::Pending,
                    chunks_done: 0,
                    bytes_done: 0,
                    speed_bps: 0,
                    started: None,
                    error: None,
                }),
            });
            debug!(item = %item.id, name = %item.name, chunks = total_chunks, "upload enqueued");
            ids.push(item.id);
            self.shared.items_locked().push(Arc::clone(&item));
            tokio::spawn(run_item(
                Arc::clone(&self.shared),
                Arc::clone(&self.slots),
                item,
            ));
        }
        ids
    }

    /// Request cancellation of a pending or uploading item. Returns false
    /// for unknown ids and items already in a terminal state.
    pub fn cancel(&self, item_id: Uuid) -> bool {
        let items = self.shared.items_locked();
        let Some(item) = items.iter().find(|i| i.id == item_id) else {
            return false;
        };
        let active = {
            let p = item
                .progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            matches!(p.status, UploadStatus::Pending | UploadStatus::Uploading)
        };
        if active {
            item.cancel.cancel();
        }
        active
    }

    /// Drop completed items from the visible queue.
    pub fn clear_completed(&self) {
        self.shared.items_locked().retain(|item| {
            let p = item
                .progress
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            p.status != UploadStatus::Completed
        });
    }

    pub fn snapshot(&self) -> Vec<UploadItem> {
        self.shared
            .items_locked()
            .iter()
            .map(|item| item.snapshot())
            .collect()
    }
}

/// Terminal outcomes of one item's run.
enum UploadAbort {
    Cancelled { upload_id: Option<String> },
    Failed { error: VaultError },
}

async fn run_item(shared: Arc<Shared>, slots: Arc<Semaphore>, item: Arc<Item>) {
    let _permit = tokio::select! {
        _ = item.cancel.cancelled() => {
            finish_cancelled(&shared, &item, None).await;
            return;
        }
        permit = slots.acquire_owned() => match permit {
            Ok(permit) => permit,
            // The semaphore outlives all items; closure means shutdown
            Err(_) => return,
        },
    };

    let outcome = upload_item(&shared, &item).await;

    // The permit is held until the status below is final, so a snapshot
    // never shows more than the cap in the Uploading state
    match outcome {
        Ok(entry_id) => {
            item.finish(UploadStatus::Completed, None);
            let _ = shared.events.send(TransferEvent::Completed {
                item_id: item.id,
                entry_id,
            });
            info!(item = %item.id, %entry_id, "upload completed");
        }
        Err(UploadAbort::Cancelled { upload_id }) => {
            finish_cancelled(&shared, &item, upload_id).await;
        }
        Err(UploadAbort::Failed { error }) => {
            let message = error.to_string();
            item.finish(UploadStatus::Error, Some(message.clone()));
            let _ = shared.events.send(TransferEvent::Failed {
                item_id: item.id,
                error: message,
            });
            warn!(item = %item.id, error = %error, "upload failed");
        }
    }
}

/// Cancel teardown: delete the upload record if one was created, remove
/// the item from the queue, announce. Already-stored chunks are orphaned
/// deliberately; nothing references them without a manifest entry.
async fn finish_cancelled(shared: &Shared, item: &Arc<Item>, upload_id: Option<String>) {
    if let Some(upload_id) = upload_id {
        if let Err(e) = shared.session.store().delete_upload_record(&upload_id).await {
            warn!(item = %item.id, error = %e, "could not delete upload record");
        }
    }
    shared.items_locked().retain(|i| i.id != item.id);
    let _ = shared
        .events
        .send(TransferEvent::Cancelled { item_id: item.id });
    info!(item = %item.id, "upload cancelled");
}

async fn upload_item(shared: &Arc<Shared>, item: &Arc<Item>) -> Result<Uuid, UploadAbort> {
    if item.cancel.is_cancelled() {
        return Err(UploadAbort::Cancelled { upload_id: None });
    }
    item.start();
    shared.emit_progress(item, 0, 0, 0);

    let upload_id = Uuid::new_v4().to_string();
    let record = UploadRecord {
        upload_id: upload_id.clone(),
        vault_id: shared.session.vault_id.clone(),
        file_uid: item.file_uid.clone(),
        total_chunks: item.total_chunks,
        received_chunks: BTreeSet::new(),
    };
    if let Err(error) = shared.session.store().create_upload_record(&record).await {
        return Err(UploadAbort::Failed { error });
    }

    if let Err(abort) = upload_chunks(shared, item, &upload_id).await {
        return Err(match abort {
            UploadAbort::Cancelled { .. } => UploadAbort::Cancelled {
                upload_id: Some(upload_id),
            },
            failed => failed,
        });
    }

    // Every chunk is durable; only now does the file become visible
    let entry_id = shared
        .session
        .add_file_entry(
            item.name.clone(),
            item.parent,
            item.file_uid.clone(),
            item.data.len() as u64,
            item.total_chunks,
            item.mime_type.clone(),
        )
        .await
        .map_err(|e| match e {
            VaultError::Cancelled | VaultError::SessionLocked => UploadAbort::Cancelled {
                upload_id: Some(upload_id.clone()),
            },
            error => UploadAbort::Failed { error },
        })?;

    if let Err(e) = shared.session.store().delete_upload_record(&upload_id).await {
        // Entry is committed; a stale record is garbage, not corruption
        warn!(item = %item.id, error = %e, "could not delete finished upload record");
    }
    Ok(entry_id)
}

/// Drain all chunk indices through the worker pool. The first chunk
/// failure halts the remaining workers and wins as the item outcome;
/// user cancellation takes precedence over any stored failure.
async fn upload_chunks(
    shared: &Arc<Shared>,
    item: &Arc<Item>,
    upload_id: &str,
) -> Result<(), UploadAbort> {
    if item.total_chunks == 0 {
        return Ok(());
    }

    let pending: Arc<Mutex<VecDeque<u32>>> =
        Arc::new(Mutex::new((0..item.total_chunks).collect()));
    let failure: Arc<Mutex<Option<VaultError>>> = Arc::new(Mutex::new(None));
    let halt = item.cancel.child_token();

    let workers = shared
        .cfg
        .chunk_workers
        .max(1)
        .min(item.total_chunks as usize);
    let mut handles = Vec::with_capacity(workers);
    for _ in 0..workers {
        let shared = Arc::clone(shared);
        let item = Arc::clone(item);
        let pending = Arc::clone(&pending);
        let failure = Arc::clone(&failure);
        let halt = halt.clone();
        let upload_id = upload_id.to_string();
        handles.push(tokio::spawn(async move {
            loop {
                if halt.is_cancelled() {
                    break;
                }
                let index = {
                    let mut queue = pending.lock().unwrap_or_else(PoisonError::into_inner);
                    queue.pop_front()
                };
                let Some(index) = index else { break };

                match upload_one_chunk(&shared, &item, &upload_id, index, &halt).await {
                    Ok(bytes) => {
                        let (chunks_done, bytes_done, speed_bps) = item.bump(bytes);
                        shared.emit_progress(&item, chunks_done, bytes_done, speed_bps);
                    }
                    Err(error) => {
                        let mut slot = failure.lock().unwrap_or_else(PoisonError::into_inner);
                        if slot.is_none() {
                            *slot = Some(error);
                        }
                        drop(slot);
                        halt.cancel();
                        break;
                    }
                }
            }
        }));
    }
    for handle in handles {
        let _ = handle.await;
    }

    if item.cancel.is_cancelled() {
        return Err(UploadAbort::Cancelled { upload_id: None });
    }
    if let Some(error) = failure
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take()
    {
        return Err(UploadAbort::Failed { error });
    }
    Ok(())
}

/// Where this chunk's store write stands across retry attempts.
enum PutState {
    /// No write attempted yet; an existing object is a foreign collision
    Fresh,
    /// A write errored in flight and may or may not have landed
    Unconfirmed,
    Stored,
}

/// Upload one chunk with bounded retries and linear backoff. Transient
/// errors retry in place; anything else aborts the item. Returns the
/// plaintext byte count on success.
async fn upload_one_chunk(
    shared: &Shared,
    item: &Item,
    upload_id: &str,
    index: u32,
    halt: &CancellationToken,
) -> VaultResult<u64> {
    let chunk_size = shared.cfg.chunk_size as usize;
    let start = index as usize * chunk_size;
    let end = (start + chunk_size).min(item.data.len());
    let plain = item.data.slice(start..end);
    let path = zkv_crypto::storage_path(
        &shared.session.vault_id,
        &zkv_crypto::chunk_id(&item.file_uid, index),
    );

    let mut put_state = PutState::Fresh;
    let retries = shared.cfg.chunk_retries.max(1);
    for attempt in 1..=retries {
        if halt.is_cancelled() {
            return Err(VaultError::Cancelled);
        }
        match store_chunk(shared, upload_id, index, &plain, &path, &mut put_state).await {
            Ok(()) => return Ok(plain.len() as u64),
            Err(e) if e.is_transient() && attempt < retries => {
                debug!(chunk = index, attempt, error = %e, "chunk attempt failed, backing off");
                let backoff = Duration::from_millis(u64::from(attempt) * 1000);
                tokio::select! {
                    _ = halt.cancelled() => return Err(VaultError::Cancelled),
                    _ = sleep(backoff) => {}
                }
            }
            Err(e) => return Err(e),
        }
    }
    Err(VaultError::TransferTerminal(format!(
        "chunk {index} failed after {retries} attempts"
    )))
}

/// One attempt: encrypt and store the blob, then record the index as
/// received. Retries re-enter with `put_state` carried over, so a
/// successful write is never repeated and only the record append reruns.
async fn store_chunk(
    shared: &Shared,
    upload_id: &str,
    index: u32,
    plain: &Bytes,
    path: &str,
    put_state: &mut PutState,
) -> VaultResult<()> {
    if !matches!(put_state, PutState::Stored) {
        let blob = shared.session.encrypt(plain)?;
        let was_unconfirmed = matches!(put_state, PutState::Unconfirmed);
        *put_state = PutState::Unconfirmed;
        match shared.session.store().put_chunk(path, blob).await {
            Ok(()) => *put_state = PutState::Stored,
            // The address derives from a uid only this item knows, so an
            // existing object after our own errored write is our write
            Err(VaultError::ChunkExists(_)) if was_unconfirmed => *put_state = PutState::Stored,
            Err(e) => return Err(e),
        }
    }
    shared
        .session
        .store()
        .append_received_chunk(upload_id, index)
        .await
}
