//! OpenDAL Operator factory for the zkv store backend

use anyhow::Context;
use opendal::Operator;

use zkv_core::config::StorageConfig;
use zkv_core::{VaultError, VaultResult};

/// Build an OpenDAL Operator for an S3-compatible store endpoint.
///
/// Path-style addressing (the opendal 0.55 default) is required by
/// SeaweedFS and MinIO deployments.
pub fn build_operator(
    cfg: &StorageConfig,
    access_key_id: &str,
    secret_access_key: &str,
) -> VaultResult<Operator> {
    if cfg.endpoint.starts_with("http://") {
        if cfg.enforce_tls {
            return Err(VaultError::Config(format!(
                "store endpoint uses plaintext HTTP ({}) but enforce_tls is enabled",
                cfg.endpoint
            )));
        }
        tracing::warn!(
            endpoint = %cfg.endpoint,
            "store endpoint uses plaintext HTTP; use HTTPS in production"
        );
    }

    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(access_key_id)
        .secret_access_key(secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
        .finish();

    Ok(op)
}

/// In-memory operator for tests and local experiments.
pub fn memory_operator() -> Operator {
    Operator::new(opendal::services::Memory::default())
        .expect("memory operator")
        .finish()
}
