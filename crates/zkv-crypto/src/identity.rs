//! Identity derivation: seed phrase → {encryption key, vault identifier}

use argon2::{Algorithm, Argon2, Params, Version};
use hkdf::Hkdf;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use zkv_core::config::KdfConfig;
use zkv_core::{VaultError, VaultResult};

use crate::KEY_SIZE;

/// Fixed application salt for the accountless design.
///
/// There is no pre-authentication location to store a per-user salt, so
/// security rests on seed-phrase entropy (≥128 bits). Changing this value
/// changes every derived vault identity.
const IDENTITY_SALT: &[u8; 16] = b"zkv-identity-v1\0";

const ENCRYPTION_INFO: &[u8] = b"zkv:encryption";
const IDENTITY_INFO: &[u8] = b"zkv:identity";

/// The session's 256-bit symmetric encryption key. Zeroized on drop.
#[derive(Clone)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Everything a session needs: the private key and the public identifier.
#[derive(Debug)]
pub struct VaultIdentity {
    pub encryption_key: EncryptionKey,
    /// Deterministic public value: store primary key and bearer credential
    pub vault_id: String,
}

/// Derive a vault identity with the production KDF parameters.
///
/// Deterministic: the same seed phrase always yields the same identity.
/// Any input string produces a key — seed validity is checked upstream.
pub fn derive_identity(seed_phrase: &SecretString) -> VaultResult<VaultIdentity> {
    derive_identity_with_params(seed_phrase, &KdfConfig::default())
}

/// Derive with explicit Argon2id cost parameters (tests lower them).
pub fn derive_identity_with_params(
    seed_phrase: &SecretString,
    params: &KdfConfig,
) -> VaultResult<VaultIdentity> {
    let mut master = derive_master_secret(seed_phrase, params)?;

    let hkdf = Hkdf::<Sha256>::new(None, &master);

    let mut encryption = [0u8; KEY_SIZE];
    let mut identity = [0u8; KEY_SIZE];
    let expand = hkdf
        .expand(ENCRYPTION_INFO, &mut encryption)
        .and_then(|_| hkdf.expand(IDENTITY_INFO, &mut identity));
    master.zeroize();
    expand.map_err(|e| VaultError::KeyDerivation(format!("HKDF expand failed: {e}")))?;

    // Re-hash the identity subkey so the public id reveals nothing about it
    let vault_id = blake3::hash(&identity).to_hex().to_string();
    identity.zeroize();

    Ok(VaultIdentity {
        encryption_key: EncryptionKey::from_bytes(encryption),
        vault_id,
    })
}

/// Argon2id over (seed phrase, fixed salt). The caller zeroizes the output.
fn derive_master_secret(
    seed_phrase: &SecretString,
    params: &KdfConfig,
) -> VaultResult<[u8; KEY_SIZE]> {
    let argon2_params = Params::new(
        params.mem_cost_kib,
        params.time_cost,
        params.parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| VaultError::KeyDerivation(format!("invalid Argon2id params: {e}")))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut secret = [0u8; KEY_SIZE];
    argon2
        .hash_password_into(
            seed_phrase.expose_secret().as_bytes(),
            IDENTITY_SALT,
            &mut secret,
        )
        .map_err(|e| VaultError::KeyDerivation(format!("Argon2id failed: {e}")))?;

    Ok(secret)
}

#[cfg(test)]
pub(crate) fn test_kdf_params() -> KdfConfig {
    KdfConfig {
        mem_cost_kib: 1024,
        time_cost: 1,
        parallelism: 1,
    }
}
