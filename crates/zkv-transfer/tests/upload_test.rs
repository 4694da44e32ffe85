//! End-to-end upload scenarios against the in-memory store

use bytes::Bytes;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use zkv_core::config::{KdfConfig, TransferConfig};
use zkv_core::types::{BurnPolicy, UploadStatus};
use zkv_session::{Session, SessionHandle};
use zkv_store::StoreClient;
use zkv_transfer::{TransferEvent, UploadFile, UploadQueue};

fn test_kdf() -> KdfConfig {
    KdfConfig {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}

fn small_chunks() -> TransferConfig {
    TransferConfig {
        chunk_size: 10 * 1024,
        ..TransferConfig::default()
    }
}

async fn unlocked() -> (Session, SessionHandle, Arc<StoreClient>) {
    let store = Arc::new(StoreClient::memory());
    let mut session = Session::new(Arc::clone(&store), test_kdf());
    let handle = session
        .create(
            &SecretString::from("orbit canvas lumber velvet praise wheat"),
            BurnPolicy::Never,
        )
        .await
        .unwrap();
    (session, handle, store)
}

fn pattern(len: usize) -> Bytes {
    Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<u8>>())
}

fn file(name: &str, data: Bytes) -> UploadFile {
    UploadFile {
        name: name.to_string(),
        mime_type: "application/octet-stream".to_string(),
        data,
    }
}

async fn wait_for_terminal(
    rx: &mut broadcast::Receiver<TransferEvent>,
    item_id: Uuid,
) -> TransferEvent {
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out waiting for transfer event")
            .expect("event channel closed");
        match event {
            TransferEvent::Completed { item_id: id, .. }
            | TransferEvent::Failed { item_id: id, .. }
            | TransferEvent::Cancelled { item_id: id }
                if id == item_id =>
            {
                return event;
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_multi_chunk_upload_commits_entry() {
    let (_session, handle, store) = unlocked().await;
    let queue = UploadQueue::new(handle.clone(), small_chunks());
    let mut rx = queue.subscribe();

    // 25 KiB across 10 KiB chunks: two full, one partial
    let data = pattern(25 * 1024);
    let ids = queue.enqueue(vec![file("backup.tar", data)], None);

    let event = wait_for_terminal(&mut rx, ids[0]).await;
    let TransferEvent::Completed { entry_id, .. } = event else {
        panic!("expected completion, got {event:?}");
    };

    let manifest = handle.snapshot();
    let entry = manifest.get(entry_id).unwrap();
    let meta = entry.file_meta().unwrap();
    assert_eq!(entry.name, "backup.tar");
    assert_eq!(meta.size, 25 * 1024);
    assert_eq!(meta.chunk_count, 3);

    for index in 0..meta.chunk_count {
        let path = zkv_crypto::storage_path(
            &handle.vault_id,
            &zkv_crypto::chunk_id(&meta.file_uid, index),
        );
        assert!(store.chunk_exists(&path).await.unwrap());
    }

    let items = queue.snapshot();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, UploadStatus::Completed);
    assert_eq!(items[0].chunks_done, 3);
    assert_eq!(items[0].bytes_done, 25 * 1024);

    // Quota accounting reflects ciphertext growth
    let row = store.fetch_vault(&handle.vault_id).await.unwrap();
    assert_eq!(
        row.storage_used,
        25 * 1024 + 3 * zkv_crypto::BLOB_OVERHEAD as u64
    );

    queue.clear_completed();
    assert!(queue.snapshot().is_empty());
}

#[tokio::test]
async fn test_upload_download_roundtrip() {
    let (_session, handle, _store) = unlocked().await;
    let queue = UploadQueue::new(handle.clone(), small_chunks());
    let mut rx = queue.subscribe();

    // Not chunk-aligned on purpose
    let data = pattern(25 * 1024 + 7);
    let ids = queue.enqueue(vec![file("notes.md", data.clone())], None);

    let event = wait_for_terminal(&mut rx, ids[0]).await;
    let TransferEvent::Completed { entry_id, .. } = event else {
        panic!("expected completion, got {event:?}");
    };

    let downloaded = zkv_transfer::download_file(&handle, entry_id, None)
        .await
        .unwrap();
    assert_eq!(downloaded.name, "notes.md");
    assert_eq!(downloaded.bytes, data.as_ref());
}

#[tokio::test]
async fn test_cancel_before_start_leaves_no_trace() {
    let (_session, handle, store) = unlocked().await;
    let queue = UploadQueue::new(handle.clone(), small_chunks());
    let mut rx = queue.subscribe();

    let ids = queue.enqueue(vec![file("doomed.bin", pattern(30 * 1024))], None);
    // Single-threaded test runtime: the item task has not polled yet,
    // so this cancellation lands while the item is still Pending
    assert!(queue.cancel(ids[0]));

    let event = wait_for_terminal(&mut rx, ids[0]).await;
    assert!(matches!(event, TransferEvent::Cancelled { .. }));

    // No queue item, no manifest entry, no quota consumed
    assert!(queue.snapshot().is_empty());
    assert!(handle.snapshot().is_empty());
    let row = store.fetch_vault(&handle.vault_id).await.unwrap();
    assert_eq!(row.storage_used, 0);
}

#[tokio::test]
async fn test_cancel_mid_upload_cleans_up() {
    let (_session, handle, store) = unlocked().await;
    let cfg = TransferConfig {
        chunk_workers: 1,
        ..small_chunks()
    };
    let queue = UploadQueue::new(handle.clone(), cfg);
    let mut rx = queue.subscribe();

    // Three chunks through one worker; the second write fails twice, so
    // after the first chunk lands the worker sits in retry backoff and
    // the cancellation below cannot race item completion
    store.fail_chunk_puts(1, 2);
    let ids = queue.enqueue(vec![file("large.iso", pattern(25 * 1024))], None);

    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out")
            .expect("event channel closed");
        match event {
            TransferEvent::Progress {
                item_id,
                chunks_done,
                ..
            } if item_id == ids[0] && chunks_done >= 1 => break,
            TransferEvent::Progress { .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert!(queue.cancel(ids[0]));

    let event = wait_for_terminal(&mut rx, ids[0]).await;
    assert!(matches!(event, TransferEvent::Cancelled { .. }));

    // Record deleted, no manifest entry, item gone from the queue, no
    // quota consumed; the one stored chunk is orphaned at the store and
    // nothing references it
    assert!(store.list_upload_records().await.unwrap().is_empty());
    assert!(handle.snapshot().is_empty());
    assert!(queue.snapshot().is_empty());
    let row = store.fetch_vault(&handle.vault_id).await.unwrap();
    assert_eq!(row.storage_used, 0);
}

#[tokio::test]
async fn test_cancel_refused_for_unknown_and_terminal_items() {
    let (_session, handle, _store) = unlocked().await;
    let queue = UploadQueue::new(handle.clone(), small_chunks());
    let mut rx = queue.subscribe();

    let ids = queue.enqueue(vec![file("done.bin", pattern(1024))], None);
    let event = wait_for_terminal(&mut rx, ids[0]).await;
    assert!(matches!(event, TransferEvent::Completed { .. }));

    assert!(!queue.cancel(ids[0]));
    assert!(!queue.cancel(Uuid::new_v4()));
}

#[tokio::test]
async fn test_progress_events_count_up() {
    let (_session, handle, _store) = unlocked().await;
    let queue = UploadQueue::new(handle.clone(), small_chunks());
    let mut rx = queue.subscribe();

    let ids = queue.enqueue(vec![file("track.bin", pattern(30 * 1024))], None);

    let mut progress = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out")
            .expect("event channel closed");
        match event {
            TransferEvent::Progress {
                item_id,
                chunks_done,
                total_chunks,
                ..
            } if item_id == ids[0] => {
                assert_eq!(total_chunks, 3);
                progress.push(chunks_done);
            }
            TransferEvent::Completed { item_id, .. } if item_id == ids[0] => break,
            other => panic!("unexpected event: {other:?}"),
        }
    }
    // One event at the start, one per stored chunk
    assert_eq!(progress, vec![0, 1, 2, 3]);
}

#[tokio::test]
async fn test_empty_file_upload() {
    let (_session, handle, _store) = unlocked().await;
    let queue = UploadQueue::new(handle.clone(), small_chunks());
    let mut rx = queue.subscribe();

    let ids = queue.enqueue(vec![file("empty.txt", Bytes::new())], None);
    let event = wait_for_terminal(&mut rx, ids[0]).await;
    let TransferEvent::Completed { entry_id, .. } = event else {
        panic!("expected completion, got {event:?}");
    };

    let manifest = handle.snapshot();
    let meta = manifest.get(entry_id).unwrap().file_meta().unwrap().clone();
    assert_eq!(meta.size, 0);
    assert_eq!(meta.chunk_count, 0);

    let downloaded = zkv_transfer::download_file(&handle, entry_id, None)
        .await
        .unwrap();
    assert!(downloaded.bytes.is_empty());
}

#[tokio::test]
async fn test_upload_into_folder_with_name_collisions() {
    let (_session, handle, _store) = unlocked().await;
    let folder_id = handle.create_folder("inbox".into(), None).await.unwrap();

    let queue = UploadQueue::new(handle.clone(), small_chunks());
    let mut rx = queue.subscribe();

    let ids = queue.enqueue(
        vec![
            file("report.pdf", pattern(512)),
            file("report.pdf", pattern(512)),
        ],
        Some(folder_id),
    );
    let mut remaining: Vec<Uuid> = ids.clone();
    while !remaining.is_empty() {
        let event = tokio::time::timeout(Duration::from_secs(30), rx.recv())
            .await
            .expect("timed out")
            .expect("event channel closed");
        match event {
            TransferEvent::Completed { item_id, .. } => remaining.retain(|id| *id != item_id),
            TransferEvent::Failed { .. } | TransferEvent::Cancelled { .. } => {
                panic!("upload did not complete: {event:?}")
            }
            TransferEvent::Progress { .. } => {}
        }
    }

    let manifest = handle.snapshot();
    let mut names: Vec<String> = manifest
        .entries_in_folder(Some(folder_id))
        .iter()
        .map(|e| e.name.clone())
        .collect();
    names.sort();
    assert_eq!(names, vec!["report (1).pdf", "report.pdf"]);
}

#[tokio::test]
async fn test_transient_chunk_failure_retries_to_completion() {
    let (_session, handle, store) = unlocked().await;
    let queue = UploadQueue::new(handle.clone(), small_chunks());
    let mut rx = queue.subscribe();

    // First write attempt fails once; the retry must land the chunk
    store.fail_chunk_puts(0, 1);
    let ids = queue.enqueue(vec![file("flaky.bin", pattern(1024))], None);

    let event = wait_for_terminal(&mut rx, ids[0]).await;
    let TransferEvent::Completed { entry_id, .. } = event else {
        panic!("expected completion, got {event:?}");
    };

    let manifest = handle.snapshot();
    let meta = manifest.get(entry_id).unwrap().file_meta().unwrap();
    let path = zkv_crypto::storage_path(
        &handle.vault_id,
        &zkv_crypto::chunk_id(&meta.file_uid, 0),
    );
    assert!(store.chunk_exists(&path).await.unwrap());
    assert!(store.list_upload_records().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_exhausted_retries_fail_item_and_keep_record() {
    let (_session, handle, store) = unlocked().await;
    let cfg = TransferConfig {
        chunk_retries: 2,
        ..small_chunks()
    };
    let queue = UploadQueue::new(handle.clone(), cfg);
    let mut rx = queue.subscribe();

    // Both permitted attempts fail; the item must go terminal
    store.fail_chunk_puts(0, 2);
    let ids = queue.enqueue(vec![file("cursed.bin", pattern(1024))], None);

    let event = wait_for_terminal(&mut rx, ids[0]).await;
    assert!(matches!(event, TransferEvent::Failed { .. }));

    // The item stays visible with its error; no manifest entry exists
    let items = queue.snapshot();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].status, UploadStatus::Error);
    assert!(items[0].error.is_some());
    assert!(handle.snapshot().is_empty());

    // The upload record survives terminal failure for a later resume
    let records = store.list_upload_records().await.unwrap();
    assert_eq!(records.len(), 1);
    let record = store.fetch_upload_record(&records[0]).await.unwrap();
    assert_eq!(record.total_chunks, 1);
    assert!(record.received_chunks.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_global_cap_bounds_active_uploads() {
    let (_session, handle, _store) = unlocked().await;
    let cfg = TransferConfig {
        max_active_uploads: 3,
        chunk_workers: 1,
        chunk_retries: 3,
        chunk_size: 256,
    };
    let queue = UploadQueue::new(handle.clone(), cfg);

    let files = (0..10).map(|_| file("drop.bin", pattern(2048))).collect();
    let ids = queue.enqueue(files, None);
    assert_eq!(ids.len(), 10);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(30);
    loop {
        let items = queue.snapshot();
        let uploading = items
            .iter()
            .filter(|i| i.status == UploadStatus::Uploading)
            .count();
        assert!(uploading <= 3, "cap breached: {uploading} items uploading");
        assert!(
            items.iter().all(|i| i.status != UploadStatus::Error),
            "unexpected failure: {items:?}"
        );

        let completed = items
            .iter()
            .filter(|i| i.status == UploadStatus::Completed)
            .count();
        if completed == 10 {
            break;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "uploads did not finish"
        );
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // Ten identically named files all landed under distinct names
    let manifest = handle.snapshot();
    assert_eq!(manifest.len(), 10);
    let mut names: Vec<String> = manifest.entries.iter().map(|e| e.name.clone()).collect();
    names.sort();
    names.dedup();
    assert_eq!(names.len(), 10);
}
