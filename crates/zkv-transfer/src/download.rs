//! Sequential download and reassembly
//!
//! Chunks are fetched and decrypted strictly in index order and appended
//! to one in-memory buffer. The first failure aborts the whole download;
//! there is no per-chunk retry on this path.

use tracing::debug;
use uuid::Uuid;

use zkv_core::types::DownloadStatus;
use zkv_core::{VaultError, VaultResult};
use zkv_session::SessionHandle;

/// Callback invoked at each phase change of the download.
pub type ProgressFn = Box<dyn Fn(DownloadProgress) + Send + Sync>;

#[derive(Debug, Clone, Copy)]
pub struct DownloadProgress {
    pub status: DownloadStatus,
    pub chunks_done: u32,
    pub total_chunks: u32,
}

pub struct DownloadedFile {
    pub name: String,
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

/// Fetch, decrypt, and reassemble one file entry.
///
/// An authentication failure on any chunk means corruption, tampering,
/// or a key mismatch; the buffer assembled so far is discarded.
pub async fn download_file(
    session: &SessionHandle,
    entry_id: Uuid,
    progress: Option<ProgressFn>,
) -> VaultResult<DownloadedFile> {
    let manifest = session.snapshot();
    let entry = manifest
        .get(entry_id)
        .ok_or_else(|| VaultError::InvalidOperation(format!("no such entry: {entry_id}")))?;
    let meta = entry
        .file_meta()
        .ok_or_else(|| VaultError::InvalidOperation(format!("not a file: {}", entry.name)))?
        .clone();
    let name = entry.name.clone();

    let report = |status: DownloadStatus, chunks_done: u32| {
        if let Some(f) = &progress {
            f(DownloadProgress {
                status,
                chunks_done,
                total_chunks: meta.chunk_count,
            });
        }
    };

    let mut bytes = Vec::with_capacity(meta.size as usize);
    for index in 0..meta.chunk_count {
        if session.cancellation().is_cancelled() {
            report(DownloadStatus::Failed, index);
            return Err(VaultError::Cancelled);
        }

        report(DownloadStatus::Downloading, index);
        let path = zkv_crypto::storage_path(
            &session.vault_id,
            &zkv_crypto::chunk_id(&meta.file_uid, index),
        );
        let blob = match session.store().get_chunk(&path).await {
            Ok(blob) => blob,
            Err(e) => {
                report(DownloadStatus::Failed, index);
                return Err(e);
            }
        };

        report(DownloadStatus::Decrypting, index);
        let plain = match session.decrypt(&blob) {
            Ok(plain) => plain,
            Err(e) => {
                report(DownloadStatus::Failed, index);
                return Err(e);
            }
        };
        bytes.extend_from_slice(&plain);
    }

    if bytes.len() as u64 != meta.size {
        report(DownloadStatus::Failed, meta.chunk_count);
        return Err(VaultError::TransferTerminal(format!(
            "reassembled {} bytes, manifest says {}",
            bytes.len(),
            meta.size
        )));
    }

    report(DownloadStatus::Done, meta.chunk_count);
    debug!(%entry_id, size = bytes.len(), chunks = meta.chunk_count, "download complete");
    Ok(DownloadedFile {
        name,
        mime_type: meta.mime_type,
        bytes,
    })
}
