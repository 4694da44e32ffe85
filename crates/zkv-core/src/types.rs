use serde::{Deserialize, Serialize};

/// Lifecycle state of a queued upload item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    /// Enqueued, waiting for a global upload slot
    Pending,
    /// Chunk workers active
    Uploading,
    /// All chunks stored and the manifest entry committed
    Completed,
    /// Terminal failure (upload record left in place for future resume)
    Error,
}

/// Phase of a sequential download
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DownloadStatus {
    Downloading,
    Decrypting,
    Done,
    Failed,
}

/// Time-to-live policy chosen at vault creation.
///
/// The expiry sweep itself runs server-side; the client only records the
/// deadline in the vault row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BurnPolicy {
    Never,
    After { days: u32 },
}

impl BurnPolicy {
    /// Absolute burn deadline in unix seconds, or `None` for a permanent vault.
    pub fn burn_at(&self, now_secs: u64) -> Option<u64> {
        match self {
            BurnPolicy::Never => None,
            BurnPolicy::After { days } => Some(now_secs + u64::from(*days) * 86_400),
        }
    }
}

/// Current unix time in seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burn_at_never() {
        assert_eq!(BurnPolicy::Never.burn_at(1_000), None);
    }

    #[test]
    fn test_burn_at_after_days() {
        let policy = BurnPolicy::After { days: 7 };
        assert_eq!(policy.burn_at(1_000), Some(1_000 + 7 * 86_400));
    }
}
