//! zkv-session: the single live session and its key custody
//!
//! One `Session` value per process walks the transition table
//! `Locked → {Creating | Unlocking} → Unlocked → Locked`. While unlocked
//! it owns the encryption key and hands out [`SessionHandle`]s; every
//! manifest mutation in the process flows through the handle into one
//! actor with an mpsc inbox, so manifest writes are totally ordered and
//! no merge logic is ever needed.
//!
//! Logout (explicit, idle, or network loss) zeroes the key synchronously,
//! trips the session cancellation token, and abandons in-flight
//! transfers without draining them.

pub mod actor;
pub mod handle;
pub mod session;

pub use handle::{KeySlot, MutationOutcome, SessionHandle};
pub use session::{Session, SessionState};
