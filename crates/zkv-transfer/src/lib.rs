//! zkv-transfer: the transfer engine
//!
//! Uploads run through a queue bounded by a global concurrency cap, with
//! per-item chunk workers, bounded retries, and cancellation at every
//! wait point. Downloads are sequential. Both sides speak to the store
//! through a live [`SessionHandle`](zkv_session::SessionHandle) and die
//! with it when the session locks.

pub mod download;
pub mod events;
pub mod upload;

pub use download::{download_file, DownloadProgress, DownloadedFile, ProgressFn};
pub use events::TransferEvent;
pub use upload::{UploadFile, UploadItem, UploadQueue};
