//! Authenticated encryption framing
//!
//! Blob format (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```
//!
//! The same framing is used for the manifest document and for every chunk.
//! The 192-bit nonce space tolerates random generation without counter
//! bookkeeping; nonces are drawn fresh per call.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;

use zkv_core::{VaultError, VaultResult};

use crate::identity::EncryptionKey;
use crate::{BLOB_OVERHEAD, NONCE_SIZE};

/// Encrypt a byte blob under the session key.
///
/// Returns `[24-byte nonce][ciphertext][16-byte tag]`.
pub fn encrypt(plaintext: &[u8], key: &EncryptionKey) -> VaultResult<Vec<u8>> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| VaultError::Cipher(format!("AEAD encrypt failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt a blob produced by [`encrypt`].
///
/// Fails with [`VaultError::Authentication`] when the blob is shorter than
/// the framing minimum or the tag check fails. Wrong key, corruption, and
/// tampering are indistinguishable by design.
pub fn decrypt(blob: &[u8], key: &EncryptionKey) -> VaultResult<Vec<u8>> {
    if blob.len() < BLOB_OVERHEAD {
        return Err(VaultError::Authentication);
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_SIZE);
    let nonce = XNonce::from_slice(nonce_bytes);
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| VaultError::Authentication)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KEY_SIZE, TAG_SIZE};

    fn test_key() -> EncryptionKey {
        EncryptionKey::from_bytes([42u8; KEY_SIZE])
    }

    #[test]
    fn test_roundtrip() {
        let key = test_key();
        let plaintext = b"hello, encrypted vault!";

        let blob = encrypt(plaintext, &key).unwrap();
        let decrypted = decrypt(&blob, &key).unwrap();

        assert_eq!(&decrypted, plaintext);
    }

    #[test]
    fn test_roundtrip_empty() {
        let key = test_key();
        let blob = encrypt(b"", &key).unwrap();
        assert_eq!(blob.len(), BLOB_OVERHEAD);
        assert_eq!(decrypt(&blob, &key).unwrap(), b"");
    }

    #[test]
    fn test_blob_overhead() {
        let key = test_key();
        let blob = encrypt(&[0u8; 1000], &key).unwrap();
        // nonce (24) + plaintext (1000) + tag (16)
        assert_eq!(blob.len(), 1000 + BLOB_OVERHEAD);
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = encrypt(b"secret", &test_key()).unwrap();
        let other = EncryptionKey::from_bytes([7u8; KEY_SIZE]);

        assert!(matches!(
            decrypt(&blob, &other),
            Err(VaultError::Authentication)
        ));
    }

    #[test]
    fn test_truncated_blob_fails() {
        let key = test_key();
        assert!(matches!(
            decrypt(&[0u8; BLOB_OVERHEAD - 1], &key),
            Err(VaultError::Authentication)
        ));
        assert!(matches!(decrypt(b"", &key), Err(VaultError::Authentication)));
    }

    #[test]
    fn test_tamper_any_tag_bit_fails() {
        let key = test_key();
        let blob = encrypt(b"tamper target", &key).unwrap();
        let tag_start = blob.len() - TAG_SIZE;

        for byte in tag_start..blob.len() {
            for bit in 0..8 {
                let mut corrupted = blob.clone();
                corrupted[byte] ^= 1 << bit;
                assert!(
                    matches!(decrypt(&corrupted, &key), Err(VaultError::Authentication)),
                    "flipping bit {bit} of tag byte {byte} must fail"
                );
            }
        }
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key();
        let mut blob = encrypt(b"secret data", &key).unwrap();
        blob[NONCE_SIZE] ^= 0xFF;

        assert!(matches!(
            decrypt(&blob, &key),
            Err(VaultError::Authentication)
        ));
    }

    #[test]
    fn test_nonces_differ_per_call() {
        let key = test_key();
        let a = encrypt(b"same plaintext", &key).unwrap();
        let b = encrypt(b"same plaintext", &key).unwrap();
        assert_ne!(a[..NONCE_SIZE], b[..NONCE_SIZE]);
        assert_ne!(a, b);
    }
}
