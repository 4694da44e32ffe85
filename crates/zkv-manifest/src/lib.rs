//! zkv-manifest: the encrypted file/folder manifest
//!
//! Pure, synchronous operations over an in-memory forest — no I/O and no
//! crypto. The session layer serializes the whole document to JSON,
//! encrypts it, and replaces it wholesale on every mutation; there are no
//! partial or delta updates.
//!
//! Invariants:
//! - parent pointers form a forest rooted at `None` (no cycles)
//! - sibling names are unique case-insensitively, enforced at creation
//!   time through the rename-on-collision policy in [`names`]

pub mod model;
pub mod names;

pub use model::{Crumb, Entry, EntryKind, FileMeta, Manifest};
pub use names::{truncate_name, MAX_NAME_LEN};
