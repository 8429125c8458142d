//! BIP39 mnemonic generation and validation.

use bip39::{Language, Mnemonic};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::core::errors::WalletError;
use crate::security::SecretText;

/// Generates a fresh English mnemonic.
///
/// `word_count` must be 12 (128 bits of entropy) or 24 (256 bits).
pub fn generate_mnemonic(word_count: usize) -> Result<SecretText, WalletError> {
    let entropy_len = match word_count {
        12 => 16,
        24 => 32,
        other => {
            return Err(WalletError::Validation(format!(
                "unsupported mnemonic length {}, expected 12 or 24 words",
                other
            )))
        }
    };

    let mut entropy = Zeroizing::new(vec![0u8; entropy_len]);
    rand::rngs::OsRng.fill_bytes(&mut entropy);
    mnemonic_from_entropy(&entropy)
}

/// Encodes raw entropy (16..=32 bytes, multiple of 4) as a mnemonic.
pub fn mnemonic_from_entropy(entropy: &[u8]) -> Result<SecretText, WalletError> {
    let mnemonic = Mnemonic::from_entropy_in(Language::English, entropy)
        .map_err(|e| WalletError::Crypto(format!("Failed to encode entropy: {}", e)))?;
    Ok(Zeroizing::new(mnemonic.to_string()))
}

/// Lowercases and collapses whitespace so pasted phrases compare equal.
pub fn normalize_phrase(phrase: &str) -> SecretText {
    let words: Vec<&str> = phrase.split_whitespace().collect();
    Zeroizing::new(words.join(" ").to_lowercase())
}

/// Recomputes the checksum of `phrase`. Pure; never mutates state.
pub fn validate_mnemonic(phrase: &str) -> bool {
    let normalized = normalize_phrase(phrase);
    Mnemonic::parse_in_normalized(Language::English, &normalized).is_ok()
}

/// Like [`validate_mnemonic`] but returns the normalized phrase or `InvalidMnemonic`.
pub fn parse_mnemonic(phrase: &str) -> Result<SecretText, WalletError> {
    let normalized = normalize_phrase(phrase);
    Mnemonic::parse_in_normalized(Language::English, &normalized)
        .map_err(|_| WalletError::InvalidMnemonic)?;
    Ok(normalized)
}
