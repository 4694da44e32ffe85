use thiserror::Error;

pub type VaultResult<T> = Result<T, VaultError>;

/// Error taxonomy for the vault core.
///
/// `Cancelled` is a silent outcome, never surfaced as a user-facing
/// failure. `Authentication` and not-found both collapse into
/// `VaultInaccessible` at the session boundary so that unlock attempts
/// cannot be used as an existence oracle.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("cipher failure: {0}")]
    Cipher(String),

    #[error("invalid mnemonic: {0}")]
    Mnemonic(String),

    #[error("authentication failed: wrong key, corruption, or tampering")]
    Authentication,

    #[error("vault inaccessible")]
    VaultInaccessible,

    #[error("transient transfer error: {0}")]
    TransferTransient(String),

    #[error("transfer failed: {0}")]
    TransferTerminal(String),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("chunk object already exists: {0}")]
    ChunkExists(String),

    #[error("no unlocked session")]
    SessionLocked,

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VaultError {
    /// Whether the transfer engine may retry this error in place.
    pub fn is_transient(&self) -> bool {
        matches!(self, VaultError::TransferTransient(_) | VaultError::Storage(_))
    }
}
