use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level client configuration (loaded from zkv.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ZkvConfig {
    pub storage: StorageConfig,
    pub kdf: KdfConfig,
    pub transfer: TransferConfig,
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// S3-compatible endpoint of the hosted row/blob store
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// Bucket holding vault rows, upload records, and chunk blobs
    pub bucket: String,
    /// Access key file path (optional; env vars take precedence)
    pub credentials_file: Option<PathBuf>,
    /// Enforce HTTPS for store connections
    pub enforce_tls: bool,
}

/// Argon2id cost parameters.
///
/// Defaults are the production, wire-compatible values: changing them
/// changes every derived vault identity. Tests may lower them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// Memory cost in KiB (default: 16384 = 16 MiB)
    pub mem_cost_kib: u32,
    /// Time cost / passes (default: 2)
    pub time_cost: u32,
    /// Parallelism lanes (default: 1)
    pub parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Items uploading at once (default: 3)
    pub max_active_uploads: usize,
    /// Chunk workers per item (default: 3)
    pub chunk_workers: usize,
    /// Attempts per chunk before the item fails (default: 3)
    pub chunk_retries: u32,
    /// Plaintext chunk size in bytes (default: 10 MiB). Changing this
    /// changes the addressing of every file uploaded afterwards; it is a
    /// knob for tests, not an operational tuning parameter.
    pub chunk_size: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "zkv".into(),
            credentials_file: None,
            enforce_tls: false,
        }
    }
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            mem_cost_kib: 16 * 1024,
            time_cost: 2,
            parallelism: 1,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            max_active_uploads: 3,
            chunk_workers: 3,
            chunk_retries: 3,
            chunk_size: 10 * 1024 * 1024,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
log_level = "debug"

[storage]
endpoint = "https://store.example.com"
region = "eu-west-1"
bucket = "vaults"
enforce_tls = true

[kdf]
mem_cost_kib = 32768
time_cost = 3

[transfer]
max_active_uploads = 2
chunk_workers = 4
chunk_retries = 5
"#;
        let config: ZkvConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.storage.endpoint, "https://store.example.com");
        assert!(config.storage.enforce_tls);
        assert_eq!(config.kdf.mem_cost_kib, 32768);
        assert_eq!(config.kdf.time_cost, 3);
        assert_eq!(config.transfer.max_active_uploads, 2);
        assert_eq!(config.transfer.chunk_workers, 4);
        assert_eq!(config.transfer.chunk_retries, 5);
    }

    #[test]
    fn test_parse_defaults() {
        let config: ZkvConfig = toml::from_str("").unwrap();

        assert_eq!(config.storage.endpoint, "http://localhost:8333");
        assert_eq!(config.storage.bucket, "zkv");
        assert!(!config.storage.enforce_tls);
        assert_eq!(config.kdf.mem_cost_kib, 16 * 1024);
        assert_eq!(config.kdf.time_cost, 2);
        assert_eq!(config.kdf.parallelism, 1);
        assert_eq!(config.transfer.max_active_uploads, 3);
        assert_eq!(config.transfer.chunk_size, 10 * 1024 * 1024);
    }

    #[test]
    fn test_parse_partial_config() {
        let toml_str = r#"
[storage]
bucket = "my-vaults"
"#;
        let config: ZkvConfig = toml::from_str(toml_str).unwrap();

        assert_eq!(config.storage.bucket, "my-vaults");
        assert_eq!(config.storage.region, "us-east-1");
        assert_eq!(config.transfer.chunk_retries, 3);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = ZkvConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: ZkvConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.storage.endpoint, parsed.storage.endpoint);
        assert_eq!(config.kdf.mem_cost_kib, parsed.kdf.mem_cost_kib);
        assert_eq!(
            config.transfer.max_active_uploads,
            parsed.transfer.max_active_uploads
        );
    }
}
