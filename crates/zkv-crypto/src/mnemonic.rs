//! BIP-39 seed phrase helpers
//!
//! The seed phrase is the vault's sole, permanent identity — there is no
//! rotation. Generation happens once at vault creation; the phrase is
//! displayed to the user and never stored digitally. Validation is the
//! pre-derivation step for user input: `derive_identity` itself accepts
//! any string.

use bip39::Mnemonic;
use rand::RngCore;

use zkv_core::{VaultError, VaultResult};

/// Generate a fresh English mnemonic with 12 or 24 words.
pub fn generate_mnemonic(word_count: usize) -> VaultResult<String> {
    let entropy_len = match word_count {
        12 => 16,
        24 => 32,
        other => {
            return Err(VaultError::Mnemonic(format!(
                "unsupported length: {other} words (use 12 or 24)"
            )))
        }
    };

    let mut entropy = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut entropy[..entropy_len]);

    let mnemonic = Mnemonic::from_entropy(&entropy[..entropy_len])
        .map_err(|e| VaultError::Mnemonic(format!("generation failed: {e}")))?;

    Ok(mnemonic.to_string())
}

/// Check that `words` is a well-formed BIP-39 mnemonic (wordlist + checksum).
pub fn validate_mnemonic(words: &str) -> VaultResult<()> {
    words
        .parse::<Mnemonic>()
        .map(|_| ())
        .map_err(|e| VaultError::Mnemonic(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_12_words() {
        let words = generate_mnemonic(12).unwrap();
        assert_eq!(words.split_whitespace().count(), 12);
        validate_mnemonic(&words).unwrap();
    }

    #[test]
    fn test_generate_24_words() {
        let words = generate_mnemonic(24).unwrap();
        assert_eq!(words.split_whitespace().count(), 24);
        validate_mnemonic(&words).unwrap();
    }

    #[test]
    fn test_generate_unsupported_length() {
        assert!(generate_mnemonic(15).is_err());
        assert!(generate_mnemonic(0).is_err());
    }

    #[test]
    fn test_generated_mnemonics_differ() {
        let a = generate_mnemonic(12).unwrap();
        let b = generate_mnemonic(12).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_validate_rejects_garbage() {
        assert!(validate_mnemonic("definitely not a mnemonic").is_err());
        assert!(validate_mnemonic("").is_err());
    }

    #[test]
    fn test_validate_known_vector() {
        // Standard BIP-39 test vector (all-zero entropy)
        let words = "abandon abandon abandon abandon abandon abandon \
                     abandon abandon abandon abandon abandon about";
        validate_mnemonic(words).unwrap();
    }
}
