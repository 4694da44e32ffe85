//! Broadcast events emitted by the transfer engine
//!
//! The presentation layer subscribes; a lagging subscriber loses old
//! events, never blocks the engine.

use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum TransferEvent {
    Progress {
        item_id: Uuid,
        chunks_done: u32,
        total_chunks: u32,
        bytes_done: u64,
        total_bytes: u64,
        /// Rolling average since the item started uploading
        speed_bps: u64,
    },
    Completed {
        item_id: Uuid,
        /// Manifest entry the finished file was committed under
        entry_id: Uuid,
    },
    Failed {
        item_id: Uuid,
        error: String,
    },
    Cancelled {
        item_id: Uuid,
    },
}

impl TransferEvent {
    pub fn item_id(&self) -> Uuid {
        match self {
            TransferEvent::Progress { item_id, .. }
            | TransferEvent::Completed { item_id, .. }
            | TransferEvent::Failed { item_id, .. }
            | TransferEvent::Cancelled { item_id } => *item_id,
        }
    }
}
